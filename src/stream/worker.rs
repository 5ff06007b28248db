//! Background writer
//!
//! One [`StreamWorker`] runs per plan. It takes buffered frames in arrival
//! order, routes each one, writes it into its backing array and keeps the
//! viewer pointed at the newest data.
//!
//! # Loop
//!
//! While the plan is accepting frames the worker blocks on the buffer for at
//! most `idle_poll`, so it notices the end of the plan promptly even when no
//! frames arrive. Once the accepting flag is cleared it keeps taking frames
//! without blocking and exits the first time the buffer is empty.
//!
//! A frame that cannot be routed or written is counted and skipped; it never
//! stops the loop. Display problems are counted too but never prevent a write.
//!
//! # Display refresh
//!
//! Viewer updates are coalesced: the newest coordinate and every touched
//! layer are remembered and pushed at most once per `refresh_interval`, plus
//! once more when the buffer runs dry and when the worker exits.

use super::state::{FailureLog, RunReport, StateCell, StreamState, WriteFailure};
use crate::acquisition::AcquisitionEngine;
use crate::display::{Display, PositionRecord};
use crate::error::{DisplayError, StoreError};
use crate::sequence::router::route_with_prefix;
use crate::sequence::AcquisitionEvent;
use crate::store::BackingStore;
use crate::types::Frame;
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A frame waiting to be written, with the event it belongs to
#[derive(Debug)]
pub struct BufferedFrame {
    pub frame: Frame,
    pub event: AcquisitionEvent,
}

/// Everything a worker needs from the engine
pub(crate) struct WorkerContext {
    pub store: Arc<BackingStore>,
    pub display: Arc<dyn Display>,
    pub acquisition: Arc<dyn AcquisitionEngine>,
    pub errors: FailureLog,
    pub state: Arc<StateCell>,
    pub default_prefix: String,
    pub idle_poll: Duration,
    pub refresh_interval: Duration,
}

pub(crate) struct StreamWorker {
    ctx: WorkerContext,
    frames: Receiver<BufferedFrame>,
    accepting: Arc<AtomicBool>,
    report: RunReport,
    /// Layers written since the last refresh
    dirty: BTreeSet<String>,
    latest_coordinate: Option<Vec<usize>>,
    last_refresh: Option<Instant>,
    display_warned: bool,
}

impl StreamWorker {
    pub fn new(
        ctx: WorkerContext,
        frames: Receiver<BufferedFrame>,
        accepting: Arc<AtomicBool>,
        report: RunReport,
    ) -> Self {
        Self {
            ctx,
            frames,
            accepting,
            report,
            dirty: BTreeSet::new(),
            latest_coordinate: None,
            last_refresh: None,
            display_warned: false,
        }
    }

    /// Run until the plan stops accepting frames and the buffer is empty
    pub fn run(mut self) -> RunReport {
        tracing::debug!("Stream worker started for {}", self.report.sequence_uid);

        loop {
            let item = if self.accepting.load(Ordering::SeqCst) {
                match self.frames.recv_timeout(self.ctx.idle_poll) {
                    Ok(item) => item,
                    Err(RecvTimeoutError::Timeout) => {
                        self.flush_refresh();
                        continue;
                    }
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            } else {
                match self.frames.try_recv() {
                    Ok(item) => item,
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            };

            self.process(item);

            if self.frames.is_empty() || self.refresh_due() {
                self.flush_refresh();
            }
        }

        self.flush_refresh();
        tracing::info!(
            "Stream worker finished {}: {} written, {} dropped",
            self.report.sequence_uid,
            self.report.frames_written,
            self.report.frames_dropped()
        );
        self.ctx.state.set(StreamState::Idle);
        self.report
    }

    fn process(&mut self, item: BufferedFrame) {
        let BufferedFrame { frame, event } = item;
        self.report.frames_processed += 1;

        let route = match route_with_prefix(&event, &self.ctx.default_prefix) {
            Ok(route) => route,
            Err(e) => {
                tracing::warn!("Dropping frame {:?}: {}", event.index, e);
                self.report.routing_failures += 1;
                return;
            }
        };

        let written = self
            .ctx
            .store
            .handle(&route.layer_id)
            .ok_or_else(|| StoreError::UnknownHandle(route.layer_id.clone()))
            .and_then(|handle| self.ctx.store.write(&handle, &route.coordinate, &frame));

        if let Err(e) = written {
            tracing::error!(
                "Failed to write frame at {:?} to {}: {}",
                route.coordinate,
                route.layer_id,
                e
            );
            self.report.write_failures += 1;
            self.ctx.errors.push(WriteFailure {
                sequence_uid: event.sequence.uid,
                layer_id: route.layer_id,
                coordinate: route.coordinate,
                message: e.to_string(),
            });
            return;
        }
        self.report.frames_written += 1;

        let record = self.position_record(&event, &route.coordinate);
        let appended = self.ctx.display.append_position(&route.display_name, record);
        self.note_display(appended);

        self.dirty.insert(route.display_name);
        self.latest_coordinate = Some(route.coordinate);
    }

    /// Current stage position, falling back to the event's planned position
    fn position_record(&self, event: &AcquisitionEvent, coordinate: &[usize]) -> PositionRecord {
        let current = self.ctx.acquisition.stage_position();
        let planned = event.position.as_ref();
        let pick = |planned: Option<f64>, axis: usize| current.map(|c| c[axis]).or(planned);
        PositionRecord {
            coordinate: coordinate.to_vec(),
            x: pick(planned.and_then(|p| p.x), 0),
            y: pick(planned.and_then(|p| p.y), 1),
            z: pick(planned.and_then(|p| p.z), 2),
        }
    }

    fn refresh_due(&self) -> bool {
        self.last_refresh
            .map_or(true, |t| t.elapsed() >= self.ctx.refresh_interval)
    }

    fn flush_refresh(&mut self) {
        if self.dirty.is_empty() && self.latest_coordinate.is_none() {
            return;
        }

        if let Some(coordinate) = self.latest_coordinate.take() {
            let moved = self.ctx.display.set_current_index(coordinate);
            self.note_display(moved);
        }
        for name in std::mem::take(&mut self.dirty) {
            let refreshed = self.ctx.display.refresh_layer(&name);
            self.note_display(refreshed);
        }
        self.last_refresh = Some(Instant::now());
    }

    fn note_display(&mut self, result: Result<(), DisplayError>) {
        if let Err(e) = result {
            self.report.display_skipped += 1;
            if !self.display_warned {
                tracing::warn!("Display update failed, continuing without preview: {}", e);
                self.display_warned = true;
            } else {
                tracing::debug!("Display update skipped: {}", e);
            }
        }
    }
}
