//! Sequence plans, acquisition events and layer identities
//!
//! A [`SequencePlan`] is the declarative description of a multi-dimensional
//! acquisition. The acquisition engine turns it into one [`AcquisitionEvent`] per
//! capture and delivers each event together with a frame.
//!
//! # Submodules
//!
//! - [`planner`] - decides how many backing arrays a plan needs and their shape
//! - [`router`] - maps a delivered event to its array, coordinate and layer name

pub mod planner;
pub mod router;

pub use planner::{axis_labels, plan_layers, LayerPlan, PlannedLayer};
pub use router::{route, Route};

use crate::error::StreamError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Time axis
pub const AXIS_TIME: &str = "t";
/// Stage position axis
pub const AXIS_POSITION: &str = "p";
/// Channel axis
pub const AXIS_CHANNEL: &str = "c";
/// Z-stack axis
pub const AXIS_Z: &str = "z";
/// Grid axis of a per-position sub-plan
pub const AXIS_GRID: &str = "g";
/// Spatial axes appended after every plan axis
pub const SPATIAL_AXES: [&str; 2] = ["y", "x"];

/// Key under which [`SequenceMeta`] is stored in [`SequencePlan::metadata`]
pub const STREAM_META_KEY: &str = "mda_stream";

/// Name prefix used for layers of plans that are not being saved
pub const DEFAULT_NAME_PREFIX: &str = "Exp";

/// Stable key identifying one backing array and its display surface
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerId(String);

impl LayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Layer of a whole plan
    pub fn for_sequence(uid: &Uuid) -> Self {
        Self(uid.to_string())
    }

    /// Layer of one channel of a plan in split-channel mode
    pub fn for_channel(uid: &Uuid, tag: &str) -> Self {
        Self(format!("{}_{}", uid, tag))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-channel tag used in layer ids and names under split-channel mode, e.g. `DAPI_000`
pub fn channel_tag(config: &str, ordinal: usize) -> String {
    format!("{}_{:03}", config, ordinal)
}

/// One named dimension of a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisSpec {
    pub name: String,
    /// Number of steps; 0 means the axis is degenerate
    #[serde(default)]
    pub size: usize,
}

impl AxisSpec {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

/// Illumination/filter configuration of one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    /// Preset name, e.g. `DAPI`
    pub config: String,
    /// Config group the preset belongs to
    #[serde(default = "default_channel_group")]
    pub group: String,
    /// Exposure in milliseconds
    #[serde(default)]
    pub exposure: Option<f64>,
}

fn default_channel_group() -> String {
    "Channel".to_string()
}

impl Channel {
    pub fn new(config: impl Into<String>) -> Self {
        Self {
            config: config.into(),
            group: default_channel_group(),
            exposure: None,
        }
    }
}

/// A stage position, optionally with its own nested plan (e.g. a tile grid)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StagePosition {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    #[serde(default)]
    pub z: Option<f64>,
    /// Nested plan acquired at this position
    #[serde(default)]
    pub sequence: Option<Arc<SequencePlan>>,
}

impl StagePosition {
    pub fn at(x: f64, y: f64, z: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            z: Some(z),
            ..Default::default()
        }
    }

    pub fn with_sequence(mut self, sequence: SequencePlan) -> Self {
        self.sequence = Some(Arc::new(sequence));
        self
    }
}

/// Presentation options attached to plans started through this pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceMeta {
    #[serde(default = "default_mode")]
    pub mode: String,
    /// One backing array per channel instead of a shared channel axis
    #[serde(default)]
    pub split_channels: bool,
    /// Base name used for layers when the acquisition is being saved
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub should_save: bool,
}

fn default_mode() -> String {
    "mda".to_string()
}

impl Default for SequenceMeta {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            split_channels: false,
            file_name: String::new(),
            should_save: false,
        }
    }
}

impl SequenceMeta {
    /// Prefix for display names of this plan's layers
    pub fn name_prefix<'a>(&'a self, default_prefix: &'a str) -> &'a str {
        if self.should_save && !self.file_name.is_empty() {
            &self.file_name
        } else {
            default_prefix
        }
    }
}

/// Declarative description of a multi-dimensional acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencePlan {
    #[serde(default = "Uuid::new_v4")]
    pub uid: Uuid,
    /// Axes in declared (acquisition) order
    #[serde(default)]
    pub axes: Vec<AxisSpec>,
    #[serde(default)]
    pub stage_positions: Vec<StagePosition>,
    #[serde(default)]
    pub channels: Vec<Channel>,
    /// Z step in micrometers, used for display scale
    #[serde(default)]
    pub z_step: Option<f64>,
    /// Free-form metadata; presentation options live under [`STREAM_META_KEY`]
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl SequencePlan {
    pub fn builder() -> SequencePlanBuilder {
        SequencePlanBuilder::default()
    }

    /// Axis names in declared order
    pub fn axis_names(&self) -> impl Iterator<Item = &str> {
        self.axes.iter().map(|a| a.name.as_str())
    }

    pub fn has_axis(&self, axis: &str) -> bool {
        self.axes.iter().any(|a| a.name == axis)
    }

    /// Declared size of `axis`, if the plan has it
    pub fn size(&self, axis: &str) -> Option<usize> {
        self.axes.iter().find(|a| a.name == axis).map(|a| a.size)
    }

    /// Nested plans carried by stage positions
    pub fn sub_sequences(&self) -> impl Iterator<Item = &Arc<SequencePlan>> {
        self.stage_positions
            .iter()
            .filter_map(|p| p.sequence.as_ref())
    }

    /// Stream metadata, `Ok(None)` when the plan was not started through this pipeline
    pub fn stream_meta(&self) -> Result<Option<SequenceMeta>, StreamError> {
        match self.metadata.get(STREAM_META_KEY) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| StreamError::Metadata(format!("sequence {}: {}", self.uid, e))),
        }
    }

    pub fn set_stream_meta(&mut self, meta: &SequenceMeta) {
        // SequenceMeta only holds plain fields, serialization cannot fail
        if let Ok(value) = serde_json::to_value(meta) {
            self.metadata.insert(STREAM_META_KEY.to_string(), value);
        }
    }

    /// Expand the plan into its capture events.
    ///
    /// The first declared axis varies slowest. Axes contributed only by a
    /// position's nested plan are iterated innermost, and only at that position.
    pub fn events(self: &Arc<Self>) -> Vec<AcquisitionEvent> {
        let top: Vec<(String, usize)> = self
            .axes
            .iter()
            .map(|a| (a.name.clone(), a.size.max(1)))
            .collect();

        let mut events = Vec::new();
        for base in cartesian(&top) {
            let position = base
                .get(AXIS_POSITION)
                .and_then(|&p| self.stage_positions.get(p))
                .cloned();
            let sub = position.as_ref().and_then(|p| p.sequence.clone());

            let nested: Vec<(String, usize)> = sub
                .as_ref()
                .map(|s| {
                    s.axes
                        .iter()
                        .filter(|a| !self.has_axis(&a.name))
                        .map(|a| (a.name.clone(), a.size.max(1)))
                        .collect()
                })
                .unwrap_or_default();

            for extra in cartesian(&nested) {
                let mut index = base.clone();
                index.extend(extra);
                let channel = index
                    .get(AXIS_CHANNEL)
                    .and_then(|&c| self.channels.get(c))
                    .cloned();
                events.push(AcquisitionEvent {
                    index,
                    channel,
                    position: position.clone(),
                    sequence: Arc::clone(self),
                    sub_sequence: sub.clone(),
                });
            }
        }
        events
    }
}

/// Every index combination of `axes`, first axis slowest
fn cartesian(axes: &[(String, usize)]) -> Vec<BTreeMap<String, usize>> {
    let mut out = vec![BTreeMap::new()];
    for (name, size) in axes {
        out = out
            .into_iter()
            .flat_map(|prefix| {
                (0..*size).map(move |i| {
                    let mut next = prefix.clone();
                    next.insert(name.clone(), i);
                    next
                })
            })
            .collect();
    }
    out
}

/// Builder for [`SequencePlan`]; plans it builds carry stream metadata by default
#[derive(Debug, Clone)]
pub struct SequencePlanBuilder {
    plan: SequencePlan,
    meta: Option<SequenceMeta>,
}

impl Default for SequencePlanBuilder {
    fn default() -> Self {
        Self {
            plan: SequencePlan {
                uid: Uuid::new_v4(),
                axes: Vec::new(),
                stage_positions: Vec::new(),
                channels: Vec::new(),
                z_step: None,
                metadata: HashMap::new(),
            },
            meta: Some(SequenceMeta::default()),
        }
    }
}

impl SequencePlanBuilder {
    pub fn uid(mut self, uid: Uuid) -> Self {
        self.plan.uid = uid;
        self
    }

    pub fn axis(mut self, name: impl Into<String>, size: usize) -> Self {
        self.plan.axes.push(AxisSpec::new(name, size));
        self
    }

    pub fn channels<I, S>(mut self, configs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.plan.channels = configs.into_iter().map(Channel::new).collect();
        self
    }

    pub fn position(mut self, position: StagePosition) -> Self {
        self.plan.stage_positions.push(position);
        self
    }

    pub fn z_step(mut self, step: f64) -> Self {
        self.plan.z_step = Some(step);
        self
    }

    pub fn split_channels(mut self, split: bool) -> Self {
        if let Some(meta) = self.meta.as_mut() {
            meta.split_channels = split;
        }
        self
    }

    pub fn save_as(mut self, file_name: impl Into<String>) -> Self {
        if let Some(meta) = self.meta.as_mut() {
            meta.file_name = file_name.into();
            meta.should_save = true;
        }
        self
    }

    /// Build a plan that looks like it was started by someone else
    pub fn without_stream_meta(mut self) -> Self {
        self.meta = None;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.plan.metadata.insert(key.into(), value);
        self
    }

    pub fn build(self) -> SequencePlan {
        let mut plan = self.plan;
        if let Some(meta) = self.meta {
            plan.set_stream_meta(&meta);
        }
        plan
    }
}

/// One capture step of a plan, delivered once together with its frame
#[derive(Debug, Clone)]
pub struct AcquisitionEvent {
    /// Position along each axis this event covers
    pub index: BTreeMap<String, usize>,
    pub channel: Option<Channel>,
    pub position: Option<StagePosition>,
    /// Plan that produced this event
    pub sequence: Arc<SequencePlan>,
    /// Nested plan of the event's stage position, if any
    pub sub_sequence: Option<Arc<SequencePlan>>,
}

impl AcquisitionEvent {
    /// An event with only an index, owned by `sequence`
    pub fn new(sequence: Arc<SequencePlan>, index: &[(&str, usize)]) -> Self {
        let index: BTreeMap<String, usize> =
            index.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        let channel = index
            .get(AXIS_CHANNEL)
            .and_then(|&c| sequence.channels.get(c))
            .cloned();
        Self {
            index,
            channel,
            position: None,
            sequence,
            sub_sequence: None,
        }
    }

    /// Index along `axis`, `None` when the event does not cover it
    pub fn resolve(&self, axis: &str) -> Option<usize> {
        self.index.get(axis).copied()
    }
}
