//! In-memory viewer for headless runs
//!
//! Keeps the state a real viewer would (surfaces, slider labels, current
//! position, visibility, stage-position log) without drawing anything. Used by
//! the demo binary and as the reference [`DisplayHost`] in tests.

use super::{DisplayHost, PositionRecord, SurfaceSpec};
use crate::error::DisplayError;
use std::collections::BTreeMap;

/// One surface as tracked by the [`HeadlessViewer`]
#[derive(Debug, Clone)]
pub struct HeadlessSurface {
    pub spec: SurfaceSpec,
    pub visible: bool,
    /// Number of visibility changes seen
    pub visibility_toggles: usize,
    pub positions: Vec<PositionRecord>,
}

#[derive(Debug, Default)]
pub struct HeadlessViewer {
    surfaces: BTreeMap<String, HeadlessSurface>,
    axis_labels: Vec<String>,
    current_step: Vec<usize>,
}

impl HeadlessViewer {
    pub fn surface(&self, name: &str) -> Option<&HeadlessSurface> {
        self.surfaces.get(name)
    }

    pub fn surface_names(&self) -> Vec<&str> {
        self.surfaces.keys().map(String::as_str).collect()
    }

    pub fn axis_labels(&self) -> &[String] {
        &self.axis_labels
    }

    pub fn current_step(&self) -> &[usize] {
        &self.current_step
    }
}

impl DisplayHost for HeadlessViewer {
    fn create_surface(&mut self, spec: SurfaceSpec) -> Result<(), DisplayError> {
        if self.surfaces.contains_key(&spec.name) {
            return Err(DisplayError::Rejected(format!(
                "surface '{}' already exists",
                spec.name
            )));
        }
        tracing::debug!("Headless viewer: new surface {}", spec.name);
        self.surfaces.insert(
            spec.name.clone(),
            HeadlessSurface {
                visible: spec.visible,
                visibility_toggles: 0,
                positions: Vec::new(),
                spec,
            },
        );
        Ok(())
    }

    fn set_axis_labels(&mut self, labels: &[String]) {
        self.axis_labels = labels.to_vec();
        self.current_step.resize(labels.len(), 0);
    }

    fn set_current_index(&mut self, coordinate: &[usize]) {
        if self.current_step.len() < coordinate.len() {
            self.current_step.resize(coordinate.len(), 0);
        }
        self.current_step[..coordinate.len()].copy_from_slice(coordinate);
    }

    fn set_visible(&mut self, name: &str, visible: bool) {
        match self.surfaces.get_mut(name) {
            Some(surface) => {
                if surface.visible != visible {
                    surface.visibility_toggles += 1;
                }
                surface.visible = visible;
            }
            None => tracing::debug!("Headless viewer: no surface named {}", name),
        }
    }

    fn append_position(&mut self, name: &str, record: PositionRecord) {
        if let Some(surface) = self.surfaces.get_mut(name) {
            surface.positions.push(record);
        }
    }
}
