//! Mock construction helpers

use mda_stream::acquisition::AcquisitionEngine;
use mda_stream::display::{Display, PositionRecord, SurfaceSpec};
use mda_stream::error::DisplayError;
use std::sync::Mutex;

mockall::mock! {
    pub Camera {}

    impl AcquisitionEngine for Camera {
        fn set_paused(&self, paused: bool);
        fn image_size(&self) -> (usize, usize);
        fn bit_depth(&self) -> u32;
        fn pixel_size_um(&self) -> f64;
        fn stage_position(&self) -> Option<[f64; 3]>;
    }
}

/// A camera mock with fixed geometry; pause expectations are left to the test
pub fn mock_camera(image_size: (usize, usize), bit_depth: u32) -> MockCamera {
    let mut camera = MockCamera::new();
    camera.expect_image_size().return_const(image_size);
    camera.expect_bit_depth().return_const(bit_depth);
    camera.expect_pixel_size_um().return_const(0.0);
    camera.expect_stage_position().return_const(None);
    camera
}

/// One call made on a [`RecordingDisplay`]
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayCall {
    CreateSurface(String),
    AxisLabels(Vec<String>),
    CurrentIndex(Vec<usize>),
    Visible(String, bool),
    Position(String, PositionRecord),
}

/// [`Display`] that records every call instead of drawing
#[derive(Debug, Default)]
pub struct RecordingDisplay {
    calls: Mutex<Vec<DisplayCall>>,
    surfaces: Mutex<Vec<SurfaceSpec>>,
    /// Reject every surface creation
    pub reject_surfaces: bool,
    /// Fail every update other than surface creation
    pub disconnected: bool,
}

impl RecordingDisplay {
    pub fn rejecting_surfaces() -> Self {
        Self {
            reject_surfaces: true,
            ..Default::default()
        }
    }

    pub fn disconnected() -> Self {
        Self {
            disconnected: true,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> Vec<DisplayCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn surfaces(&self) -> Vec<SurfaceSpec> {
        self.surfaces.lock().unwrap().clone()
    }

    pub fn surface(&self, name: &str) -> Option<SurfaceSpec> {
        self.surfaces().into_iter().find(|s| s.name == name)
    }

    /// Positions recorded for surface `name`
    pub fn positions(&self, name: &str) -> Vec<PositionRecord> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                DisplayCall::Position(n, record) if n == name => Some(record),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: DisplayCall) -> Result<(), DisplayError> {
        if self.disconnected {
            return Err(DisplayError::Disconnected);
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

impl Display for RecordingDisplay {
    fn create_surface(&self, spec: SurfaceSpec) -> Result<(), DisplayError> {
        if self.reject_surfaces {
            return Err(DisplayError::Rejected("surfaces disabled".to_string()));
        }
        self.calls
            .lock()
            .unwrap()
            .push(DisplayCall::CreateSurface(spec.name.clone()));
        self.surfaces.lock().unwrap().push(spec);
        Ok(())
    }

    fn set_axis_labels(&self, labels: Vec<String>) -> Result<(), DisplayError> {
        self.record(DisplayCall::AxisLabels(labels))
    }

    fn set_current_index(&self, coordinate: Vec<usize>) -> Result<(), DisplayError> {
        self.record(DisplayCall::CurrentIndex(coordinate))
    }

    fn set_visible(&self, name: &str, visible: bool) -> Result<(), DisplayError> {
        self.record(DisplayCall::Visible(name.to_string(), visible))
    }

    fn append_position(&self, name: &str, record: PositionRecord) -> Result<(), DisplayError> {
        self.record(DisplayCall::Position(name.to_string(), record))
    }
}
