//! Test data builders for plans and pipelines

use super::mock_helpers::RecordingDisplay;
use super::test_config;
use mda_stream::acquisition::SimulatedAcquisition;
use mda_stream::config::StreamConfig;
use mda_stream::sequence::{
    SequencePlan, StagePosition, AXIS_CHANNEL, AXIS_GRID, AXIS_POSITION, AXIS_TIME,
};
use mda_stream::stream::StreamingEngine;
use std::sync::Arc;
use tempfile::TempDir;

/// `t`-step time-lapse
pub fn timelapse(t: usize) -> SequencePlan {
    SequencePlan::builder().axis(AXIS_TIME, t).build()
}

/// `t` time points over DAPI and FITC, one layer per channel
pub fn split_two_channel(t: usize) -> SequencePlan {
    SequencePlan::builder()
        .axis(AXIS_TIME, t)
        .axis(AXIS_CHANNEL, 2)
        .channels(["DAPI", "FITC"])
        .split_channels(true)
        .build()
}

/// Two positions; only the first carries a `grid`-tile sub-plan
pub fn grid_at_first_position(grid: usize) -> SequencePlan {
    SequencePlan::builder()
        .axis(AXIS_POSITION, 2)
        .position(
            StagePosition::at(10.0, 20.0, 1.0)
                .with_sequence(SequencePlan::builder().axis(AXIS_GRID, grid).build()),
        )
        .position(StagePosition::at(500.0, 20.0, 1.0))
        .build()
}

/// A simulated camera, a recording display and an engine wired together
pub struct Pipeline {
    pub camera: Arc<SimulatedAcquisition>,
    pub display: Arc<RecordingDisplay>,
    pub engine: StreamingEngine,
    /// Scratch root; dropped last
    pub scratch: TempDir,
}

/// Builder for a [`Pipeline`]
pub struct PipelineBuilder {
    image_size: (usize, usize),
    bit_depth: u32,
    pixel_size_um: f64,
    cancel_after: Option<usize>,
    display: RecordingDisplay,
    configure: Option<Box<dyn FnOnce(&mut StreamConfig)>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self {
            image_size: (16, 16),
            bit_depth: 8,
            pixel_size_um: 0.0,
            cancel_after: None,
            display: RecordingDisplay::default(),
            configure: None,
        }
    }

    pub fn image_size(mut self, height: usize, width: usize) -> Self {
        self.image_size = (height, width);
        self
    }

    pub fn bit_depth(mut self, bit_depth: u32) -> Self {
        self.bit_depth = bit_depth;
        self
    }

    pub fn pixel_size(mut self, pixel_size_um: f64) -> Self {
        self.pixel_size_um = pixel_size_um;
        self
    }

    pub fn cancel_after(mut self, frames: usize) -> Self {
        self.cancel_after = Some(frames);
        self
    }

    pub fn display(mut self, display: RecordingDisplay) -> Self {
        self.display = display;
        self
    }

    pub fn configure(mut self, f: impl FnOnce(&mut StreamConfig) + 'static) -> Self {
        self.configure = Some(Box::new(f));
        self
    }

    pub fn build(self) -> Pipeline {
        let scratch = tempfile::tempdir().expect("scratch root");
        let mut config = test_config(scratch.path());
        if let Some(configure) = self.configure {
            configure(&mut config);
        }

        let mut camera = SimulatedAcquisition::new(self.image_size, self.bit_depth)
            .with_pixel_size(self.pixel_size_um);
        if let Some(frames) = self.cancel_after {
            camera = camera.with_cancel_after(frames);
        }
        let camera = Arc::new(camera);
        let display = Arc::new(self.display);
        let engine = StreamingEngine::new(config, camera.clone(), display.clone());

        Pipeline {
            camera,
            display,
            engine,
            scratch,
        }
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_plan_builder() {
        let plan = split_two_channel(3);
        assert_eq!(plan.size(AXIS_TIME), Some(3));
        assert!(plan.stream_meta().unwrap().unwrap().split_channels);
    }
}
