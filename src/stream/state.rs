//! Engine state and per-run reporting

use crate::sequence::LayerId;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::Serialize;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Lifecycle of the streaming engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum StreamState {
    /// No plan running, nothing buffered
    #[default]
    Idle,
    /// A plan started; arrays and surfaces are being set up while acquisition is paused
    Planning,
    /// Frames are accepted and written as they arrive
    Buffering,
    /// The plan ended; already buffered frames are still being written
    Draining,
}

impl StreamState {
    pub fn is_idle(&self) -> bool {
        matches!(self, StreamState::Idle)
    }

    /// Whether new frames are accepted
    pub fn is_accepting(&self) -> bool {
        matches!(self, StreamState::Buffering)
    }

    /// Whether a worker is (or may be) still writing
    pub fn is_active(&self) -> bool {
        matches!(self, StreamState::Buffering | StreamState::Draining)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            StreamState::Idle => "Idle",
            StreamState::Planning => "Planning",
            StreamState::Buffering => "Buffering",
            StreamState::Draining => "Draining",
        }
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// State shared between the engine and its worker, with change notification
#[derive(Debug, Default)]
pub(crate) struct StateCell {
    state: Mutex<StreamState>,
    changed: Condvar,
}

impl StateCell {
    pub fn get(&self) -> StreamState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, next: StreamState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != next {
            tracing::debug!("Stream state: {} -> {}", *state, next);
            *state = next;
        }
        self.changed.notify_all();
    }

    /// Block until the state is [`StreamState::Idle`]; false on timeout
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        while !state.is_idle() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            state = self
                .changed
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

/// A frame that reached the worker but could not be stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteFailure {
    pub sequence_uid: Uuid,
    pub layer_id: LayerId,
    pub coordinate: Vec<usize>,
    pub message: String,
}

/// Write failures waiting to be read, capped at a fixed backlog
#[derive(Debug, Clone)]
pub(crate) struct FailureLog {
    tx: Sender<WriteFailure>,
    rx: Receiver<WriteFailure>,
}

impl FailureLog {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity.max(1));
        Self { tx, rx }
    }

    /// Record `failure`, evicting the oldest unread one if the backlog is full
    pub fn push(&self, mut failure: WriteFailure) {
        loop {
            match self.tx.try_send(failure) {
                Ok(()) => return,
                Err(TrySendError::Full(back)) => {
                    if let Ok(dropped) = self.rx.try_recv() {
                        tracing::debug!(
                            "Failure backlog full; dropping failure at {:?} in {}",
                            dropped.coordinate,
                            dropped.layer_id
                        );
                    }
                    failure = back;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Take every unread failure, oldest first
    pub fn drain(&self) -> Vec<WriteFailure> {
        self.rx.try_iter().collect()
    }
}

/// Counters for one plan's run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub sequence_uid: Uuid,
    /// Frames accepted from the acquisition engine
    pub frames_received: u64,
    /// Frames the worker took off the buffer
    pub frames_processed: u64,
    pub frames_written: u64,
    pub routing_failures: u64,
    pub write_failures: u64,
    /// Display operations that could not be delivered
    pub display_skipped: u64,
}

impl RunReport {
    pub fn new(sequence_uid: Uuid) -> Self {
        Self {
            sequence_uid,
            ..Default::default()
        }
    }

    /// Frames that reached the worker but were not written
    pub fn frames_dropped(&self) -> u64 {
        self.routing_failures + self.write_failures
    }

    /// Whether every accepted frame was written
    pub fn is_complete(&self) -> bool {
        self.frames_written == self.frames_received
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_state_helpers() {
        assert!(StreamState::default().is_idle());
        assert!(StreamState::Buffering.is_accepting());
        assert!(!StreamState::Draining.is_accepting());
        assert!(StreamState::Draining.is_active());
        assert_eq!(StreamState::Planning.to_string(), "Planning");
    }

    #[test]
    fn test_wait_idle_wakes_on_transition() {
        let cell = Arc::new(StateCell::default());
        cell.set(StreamState::Draining);

        let worker = Arc::clone(&cell);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            worker.set(StreamState::Idle);
        });

        assert!(cell.wait_idle(Duration::from_secs(2)));
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_idle_times_out() {
        let cell = StateCell::default();
        cell.set(StreamState::Buffering);
        assert!(!cell.wait_idle(Duration::from_millis(10)));
    }

    #[test]
    fn test_report_completeness() {
        let mut report = RunReport::new(Uuid::nil());
        report.frames_received = 3;
        report.frames_written = 2;
        report.write_failures = 1;
        assert!(!report.is_complete());
        assert_eq!(report.frames_dropped(), 1);
    }

    fn failure(t: usize) -> WriteFailure {
        WriteFailure {
            sequence_uid: Uuid::nil(),
            layer_id: LayerId::for_sequence(&Uuid::nil()),
            coordinate: vec![t],
            message: "disk full".to_string(),
        }
    }

    #[test]
    fn test_failure_log_drops_oldest_when_full() {
        let log = FailureLog::new(3);
        for t in 0..5 {
            log.push(failure(t));
        }

        let kept: Vec<_> = log.drain().into_iter().map(|f| f.coordinate[0]).collect();
        assert_eq!(kept, vec![2, 3, 4]);
        assert!(log.drain().is_empty());
    }
}
