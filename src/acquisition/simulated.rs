//! Software acquisition engine
//!
//! Expands a plan into its events and delivers a synthetic frame for each one to
//! a [`SequenceObserver`], honoring pause requests the way a real engine would:
//! no frame is delivered while paused.
//!
//! Frames are gradients offset by the event's ordinal, so every frame of a run
//! is distinct and can be checked byte-for-byte after it has been stored.

use super::{AcquisitionEngine, SequenceObserver};
use crate::error::{Result, StreamError};
use crate::sequence::SequencePlan;
use crate::types::{ElementType, Frame};
use ndarray::Array2;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// How long [`SimulatedAcquisition::run`] waits for a pause to be lifted
const PAUSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of a simulated run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationReport {
    pub frames_delivered: usize,
    pub cancelled: bool,
}

#[derive(Debug)]
pub struct SimulatedAcquisition {
    image_size: (usize, usize),
    bit_depth: u32,
    pixel_size_um: f64,
    paused: AtomicBool,
    pause_log: Mutex<Vec<bool>>,
    stage: Mutex<[f64; 3]>,
    /// Delay between frames
    interval: Duration,
    /// Cancel after this many frames
    cancel_after: Option<usize>,
}

impl SimulatedAcquisition {
    pub fn new(image_size: (usize, usize), bit_depth: u32) -> Self {
        Self {
            image_size,
            bit_depth,
            pixel_size_um: 0.0,
            paused: AtomicBool::new(false),
            pause_log: Mutex::new(Vec::new()),
            stage: Mutex::new([0.0; 3]),
            interval: Duration::ZERO,
            cancel_after: None,
        }
    }

    pub fn with_pixel_size(mut self, pixel_size_um: f64) -> Self {
        self.pixel_size_um = pixel_size_um;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_cancel_after(mut self, frames: usize) -> Self {
        self.cancel_after = Some(frames);
        self
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Every `set_paused` call received, in order
    pub fn pause_log(&self) -> Vec<bool> {
        self.pause_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Synthetic frame for the `ordinal`-th event of a run
    pub fn frame_for(&self, ordinal: usize) -> Frame {
        let (h, w) = self.image_size;
        let value = move |(r, c): (usize, usize)| ordinal * 31 + r * w + c;
        // Bit depth is validated by the observer; an unknown depth still gets 16-bit frames
        match ElementType::from_bit_depth(self.bit_depth).unwrap_or(ElementType::U16) {
            ElementType::U8 => Frame::U8(Array2::from_shape_fn((h, w), |p| value(p) as u8)),
            ElementType::U16 => Frame::U16(Array2::from_shape_fn((h, w), |p| value(p) as u16)),
            ElementType::U32 => Frame::U32(Array2::from_shape_fn((h, w), |p| value(p) as u32)),
        }
    }

    fn wait_while_paused(&self) -> Result<()> {
        let deadline = Instant::now() + PAUSE_TIMEOUT;
        while self.is_paused() {
            if Instant::now() >= deadline {
                return Err(StreamError::Worker(
                    "acquisition stayed paused".to_string(),
                ));
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    /// Run `plan` to completion (or cancellation), delivering to `observer`
    pub fn run(
        &self,
        plan: SequencePlan,
        observer: &dyn SequenceObserver,
    ) -> Result<SimulationReport> {
        let plan = Arc::new(plan);
        observer.sequence_started(Arc::clone(&plan))?;

        let mut report = SimulationReport::default();
        for (ordinal, event) in plan.events().into_iter().enumerate() {
            if self.cancel_after == Some(ordinal) {
                tracing::info!("Simulated acquisition cancelled after {} frames", ordinal);
                report.cancelled = true;
                observer.sequence_cancelled(Arc::clone(&plan));
                return Ok(report);
            }

            self.wait_while_paused()?;
            if let Some(pos) = &event.position {
                let mut stage = self.stage.lock().unwrap_or_else(PoisonError::into_inner);
                *stage = [
                    pos.x.unwrap_or(stage[0]),
                    pos.y.unwrap_or(stage[1]),
                    pos.z.unwrap_or(stage[2]),
                ];
            }

            observer.frame_ready(self.frame_for(ordinal), event);
            report.frames_delivered += 1;

            if !self.interval.is_zero() {
                std::thread::sleep(self.interval);
            }
        }

        observer.sequence_finished(plan);
        Ok(report)
    }
}

impl AcquisitionEngine for SimulatedAcquisition {
    fn set_paused(&self, paused: bool) {
        self.pause_log
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(paused);
        self.paused.store(paused, Ordering::SeqCst);
    }

    fn image_size(&self) -> (usize, usize) {
        self.image_size
    }

    fn bit_depth(&self) -> u32 {
        self.bit_depth
    }

    fn pixel_size_um(&self) -> f64 {
        self.pixel_size_um
    }

    fn stage_position(&self) -> Option<[f64; 3]> {
        Some(*self.stage.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::{AcquisitionEvent, AXIS_TIME};

    #[derive(Default)]
    struct Counter {
        started: Mutex<usize>,
        frames: Mutex<Vec<usize>>,
        finished: Mutex<usize>,
    }

    impl SequenceObserver for Counter {
        fn sequence_started(&self, _plan: Arc<SequencePlan>) -> Result<()> {
            *self.started.lock().unwrap() += 1;
            Ok(())
        }

        fn frame_ready(&self, _frame: Frame, event: AcquisitionEvent) {
            self.frames
                .lock()
                .unwrap()
                .push(event.resolve(AXIS_TIME).unwrap());
        }

        fn sequence_finished(&self, _plan: Arc<SequencePlan>) {
            *self.finished.lock().unwrap() += 1;
        }
    }

    #[test]
    fn test_run_delivers_every_event() {
        let sim = SimulatedAcquisition::new((4, 4), 8);
        let counter = Counter::default();
        let plan = SequencePlan::builder().axis(AXIS_TIME, 3).build();

        let report = sim.run(plan, &counter).unwrap();
        assert_eq!(report.frames_delivered, 3);
        assert!(!report.cancelled);
        assert_eq!(*counter.frames.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(*counter.finished.lock().unwrap(), 1);
    }

    #[test]
    fn test_cancel_uses_finish_path_by_default() {
        let sim = SimulatedAcquisition::new((4, 4), 8).with_cancel_after(2);
        let counter = Counter::default();
        let plan = SequencePlan::builder().axis(AXIS_TIME, 5).build();

        let report = sim.run(plan, &counter).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.frames_delivered, 2);
        assert_eq!(*counter.finished.lock().unwrap(), 1);
    }

    #[test]
    fn test_frames_are_distinct_per_ordinal() {
        let sim = SimulatedAcquisition::new((2, 2), 16);
        assert_ne!(sim.frame_for(0), sim.frame_for(1));
        assert_eq!(sim.frame_for(3).element_type(), ElementType::U16);
    }

    #[test]
    fn test_pause_log_records_calls() {
        let sim = SimulatedAcquisition::new((2, 2), 8);
        sim.set_paused(true);
        assert!(sim.is_paused());
        sim.set_paused(false);
        assert_eq!(sim.pause_log(), vec![true, false]);
    }
}
