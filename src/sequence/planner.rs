//! Layer planning
//!
//! Called once when a plan starts. Decides the axis layout shared by every
//! backing array of the plan, the shape of those arrays, and whether the plan
//! gets one array or one per channel.

use super::{channel_tag, LayerId, SequenceMeta, SequencePlan, AXIS_CHANNEL, SPATIAL_AXES};
use crate::error::Result;

/// One backing array to allocate for a plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedLayer {
    pub id: LayerId,
    /// Plan-axis sizes, without the spatial dimensions
    pub shape: Vec<usize>,
    /// Channel tag (e.g. `DAPI_000`) in split-channel mode
    pub channel_tag: Option<String>,
}

/// Result of planning a sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerPlan {
    /// Axis names for the viewer's dimension sliders, ending in `y`, `x`
    pub axis_labels: Vec<String>,
    pub layers: Vec<PlannedLayer>,
    pub split_channels: bool,
}

impl LayerPlan {
    /// Axis labels without the trailing spatial axes
    pub fn plan_axes(&self) -> &[String] {
        &self.axis_labels[..self.axis_labels.len() - SPATIAL_AXES.len()]
    }
}

/// Ordered union of the plan's axes and those of its nested sub-plans.
///
/// Top-level axes come first in declared order; axes found only in nested plans
/// follow in first-seen order. Spatial axes are not included.
pub fn axis_labels(plan: &SequencePlan) -> Vec<String> {
    let mut labels: Vec<String> = plan.axis_names().map(str::to_string).collect();
    for sub in plan.sub_sequences() {
        for name in sub.axis_names() {
            if !labels.iter().any(|l| l == name) {
                labels.push(name.to_string());
            }
        }
    }
    labels
}

/// Whether `plan` is laid out as one array per channel
pub(crate) fn split_active(plan: &SequencePlan, meta: &SequenceMeta, labels: &[String]) -> bool {
    meta.split_channels
        && !plan.channels.is_empty()
        && labels.iter().any(|l| l == AXIS_CHANNEL)
}

/// Size of every label in `labels`. A top-level axis keeps its declared size;
/// an axis only nested plans declare takes the largest extent among them.
/// Missing or zero sizes become 1.
fn layer_shape(plan: &SequencePlan, labels: &[String]) -> Vec<usize> {
    labels
        .iter()
        .map(|label| match plan.size(label) {
            Some(size) => size.max(1),
            None => plan
                .sub_sequences()
                .filter_map(|sub| sub.size(label))
                .fold(0, usize::max)
                .max(1),
        })
        .collect()
}

/// Plan the backing arrays for `plan`.
///
/// Plans without stream metadata are planned with default options. Fails only
/// when the stream metadata is present but malformed.
pub fn plan_layers(plan: &SequencePlan) -> Result<LayerPlan> {
    let meta = plan.stream_meta()?.unwrap_or_default();

    let mut labels = axis_labels(plan);
    let mut shape = layer_shape(plan, &labels);
    let split = split_active(plan, &meta, &labels);

    let layers = if split {
        if let Some(c) = labels.iter().position(|l| l == AXIS_CHANNEL) {
            labels.remove(c);
            shape.remove(c);
        }
        plan.channels
            .iter()
            .enumerate()
            .map(|(i, ch)| {
                let tag = channel_tag(&ch.config, i);
                PlannedLayer {
                    id: LayerId::for_channel(&plan.uid, &tag),
                    shape: shape.clone(),
                    channel_tag: Some(tag),
                }
            })
            .collect()
    } else {
        vec![PlannedLayer {
            id: LayerId::for_sequence(&plan.uid),
            shape,
            channel_tag: None,
        }]
    };

    labels.extend(SPATIAL_AXES.iter().map(|s| s.to_string()));

    Ok(LayerPlan {
        axis_labels: labels,
        layers,
        split_channels: split,
    })
}
