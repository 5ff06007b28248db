//! Boundary to the acquisition engine
//!
//! The pipeline never talks to hardware. It receives notifications through
//! [`SequenceObserver`] and uses the small [`AcquisitionEngine`] surface to pause
//! and resume the running plan and to learn the camera geometry. The engine is
//! injected as an `Arc<dyn AcquisitionEngine>` by whoever assembles the pipeline.
//!
//! [`SimulatedAcquisition`] implements both sides of the contract in software and
//! is what the tests and the demo binary run against.

pub mod simulated;

pub use simulated::{SimulatedAcquisition, SimulationReport};

use crate::error::Result;
use crate::sequence::{AcquisitionEvent, SequencePlan};
use crate::types::Frame;
use std::sync::Arc;

/// Controls and camera properties the pipeline needs from the acquisition engine
#[cfg_attr(test, mockall::automock)]
pub trait AcquisitionEngine: Send + Sync {
    /// Hold (or release) delivery of further frames
    fn set_paused(&self, paused: bool);

    /// Frame size as (height, width)
    fn image_size(&self) -> (usize, usize);

    /// Bits per pixel of delivered frames
    fn bit_depth(&self) -> u32;

    /// Pixel size in micrometers, 0 when uncalibrated
    fn pixel_size_um(&self) -> f64;

    /// Current stage position (x, y, z), if the engine knows it
    fn stage_position(&self) -> Option<[f64; 3]>;
}

/// Notifications emitted by the acquisition engine while it runs a plan.
///
/// All methods may be called from a thread the pipeline does not control.
pub trait SequenceObserver: Send + Sync {
    /// A plan is about to produce frames. Returning an error aborts the plan.
    fn sequence_started(&self, plan: Arc<SequencePlan>) -> Result<()>;

    /// One frame for one event. Must return quickly.
    fn frame_ready(&self, frame: Frame, event: AcquisitionEvent);

    /// The plan produced its last frame
    fn sequence_finished(&self, plan: Arc<SequencePlan>);

    /// The plan was stopped early. Frames already delivered are still kept.
    fn sequence_cancelled(&self, plan: Arc<SequencePlan>) {
        self.sequence_finished(plan);
    }
}
