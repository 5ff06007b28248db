//! Streaming engine
//!
//! [`StreamingEngine`] connects the acquisition engine to the backing store and
//! the viewer. It implements [`SequenceObserver`]:
//!
//! - **sequence started**: pause the acquisition, plan the layers, allocate one
//!   array and one (hidden) display surface per layer, label the viewer's axes,
//!   start a worker, then resume.
//! - **frame ready**: push the frame onto the run's buffer. Never blocks and
//!   never touches storage.
//! - **sequence finished / cancelled**: stop accepting frames; the worker
//!   writes whatever is still buffered and goes idle.
//!
//! ```text
//!  acquisition thread            worker thread               UI thread
//!  frame_ready ──► [buffer] ──► route ─► write ─► Display ──► DisplayHost
//! ```
//!
//! Arrays outlive their run so a finished acquisition can still be browsed.
//! They are released with [`StreamingEngine::release_sequence`], by
//! [`StreamingEngine::shutdown`], or when the engine is dropped.

pub mod state;
pub mod worker;

pub use state::{RunReport, StreamState, WriteFailure};
pub use worker::BufferedFrame;

use crate::acquisition::{AcquisitionEngine, SequenceObserver};
use crate::config::StreamConfig;
use crate::display::{Display, LayerMetadata, SurfaceSpec};
use crate::error::{Result, ResultExt, StreamError};
use crate::sequence::router::display_name;
use crate::sequence::{
    plan_layers, AcquisitionEvent, LayerPlan, SequenceMeta, SequencePlan, AXIS_Z, STREAM_META_KEY,
};
use crate::store::{ArrayHandle, BackingStore};
use crate::types::{ElementType, Frame};
use crossbeam_channel::{unbounded, Sender};
use state::{FailureLog, StateCell};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use uuid::Uuid;
use worker::{StreamWorker, WorkerContext};

/// The plan currently owning the buffer
struct ActiveRun {
    sequence_uid: Uuid,
    frames: Sender<BufferedFrame>,
    accepting: Arc<AtomicBool>,
    received: u64,
    worker: JoinHandle<RunReport>,
}

pub struct StreamingEngine {
    config: StreamConfig,
    acquisition: Arc<dyn AcquisitionEngine>,
    display: Arc<dyn Display>,
    store: Arc<BackingStore>,
    state: Arc<StateCell>,
    run: Mutex<Option<ActiveRun>>,
    last_report: Mutex<Option<RunReport>>,
    /// Arrays allocated per plan, kept until released
    sequences: Mutex<HashMap<Uuid, Vec<ArrayHandle>>>,
    failures: FailureLog,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl StreamingEngine {
    pub fn new(
        config: StreamConfig,
        acquisition: Arc<dyn AcquisitionEngine>,
        display: Arc<dyn Display>,
    ) -> Self {
        let store = Arc::new(BackingStore::new(config.store.clone()));
        let failures = FailureLog::new(config.worker.failure_backlog);
        Self {
            config,
            acquisition,
            display,
            store,
            state: Arc::new(StateCell::default()),
            run: Mutex::new(None),
            last_report: Mutex::new(None),
            sequences: Mutex::new(HashMap::new()),
            failures,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state.get()
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// The backing store holding every plan's arrays
    pub fn store(&self) -> &Arc<BackingStore> {
        &self.store
    }

    /// Write failures reported since the last call, up to the configured backlog
    pub fn errors(&self) -> Vec<WriteFailure> {
        self.failures.drain()
    }

    /// Arrays allocated for a plan
    pub fn layers(&self, sequence_uid: &Uuid) -> Vec<ArrayHandle> {
        lock(&self.sequences)
            .get(sequence_uid)
            .cloned()
            .unwrap_or_default()
    }

    /// Report of the most recently completed run
    pub fn last_report(&self) -> Option<RunReport> {
        lock(&self.last_report).clone()
    }

    /// Wait until every buffered frame is written, then return the run's report.
    ///
    /// Returns `Ok(None)` if no plan has run yet.
    pub fn wait_idle(&self, timeout: Duration) -> Result<Option<RunReport>> {
        if !self.state.wait_idle(timeout) {
            return Err(StreamError::Worker(format!(
                "engine still {} after {} ms",
                self.state(),
                timeout.as_millis()
            )));
        }

        let finished = lock(&self.run).take();
        if let Some(run) = finished {
            self.retire(run)?;
        }
        Ok(self.last_report())
    }

    /// Release a plan's arrays. Its display surfaces stop resolving.
    pub fn release_sequence(&self, sequence_uid: &Uuid) {
        let handles = lock(&self.sequences)
            .remove(sequence_uid)
            .unwrap_or_default();
        for handle in &handles {
            self.store.release(handle);
        }
    }

    /// Finish any active run, wait for its worker and release every array
    pub fn shutdown(&self) {
        let active = lock(&self.run).take();
        if let Some(run) = active {
            tracing::info!("Shutting down; draining sequence {}", run.sequence_uid);
            if let Err(e) = self.retire(run) {
                tracing::error!("Stream worker did not finish cleanly: {}", e);
            }
        }
        lock(&self.sequences).clear();
        self.store.release_all();
        self.state.set(StreamState::Idle);
    }

    /// Stop accepting frames for `run`, join its worker and keep its report
    fn retire(&self, run: ActiveRun) -> Result<RunReport> {
        run.accepting.store(false, Ordering::SeqCst);
        drop(run.frames);

        let mut report = run.worker.join().map_err(|_| {
            self.state.set(StreamState::Idle);
            StreamError::Worker(format!("worker for {} panicked", run.sequence_uid))
        })?;
        report.frames_received = run.received;

        if !report.is_complete() {
            tracing::warn!(
                "Sequence {}: {} of {} frames written",
                report.sequence_uid,
                report.frames_written,
                report.frames_received
            );
        }
        *lock(&self.last_report) = Some(report.clone());
        Ok(report)
    }

    /// Allocate every planned layer; on failure nothing stays allocated
    fn allocate_layers(
        &self,
        plan: &SequencePlan,
        layer_plan: &LayerPlan,
    ) -> Result<Vec<ArrayHandle>> {
        let frame_shape = self.acquisition.image_size();
        let element_type = ElementType::from_bit_depth(self.acquisition.bit_depth())?;

        let mut handles = Vec::with_capacity(layer_plan.layers.len());
        for layer in &layer_plan.layers {
            let attrs = BTreeMap::from([
                ("sequence_uid".to_string(), serde_json::json!(plan.uid)),
                (
                    "axis_labels".to_string(),
                    serde_json::json!(layer_plan.axis_labels),
                ),
            ]);
            match self
                .store
                .allocate_with_attrs(layer, frame_shape, element_type, attrs)
                .with_context(|| format!("allocating layer {}", layer.id))
            {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    for handle in &handles {
                        self.store.release(handle);
                    }
                    return Err(e);
                }
            }
        }
        Ok(handles)
    }

    /// Create one hidden surface per layer and label the viewer's axes.
    ///
    /// Display failures degrade to running without live preview.
    fn create_surfaces(
        &self,
        plan: &SequencePlan,
        meta: &SequenceMeta,
        layer_plan: &LayerPlan,
        handles: &[ArrayHandle],
    ) {
        let prefix = meta.name_prefix(&self.config.default_name_prefix);
        let scale = surface_scale(plan, layer_plan, self.acquisition.pixel_size_um());

        for (layer, handle) in layer_plan.layers.iter().zip(handles) {
            let array = match self.store.array_ref(handle) {
                Ok(array) => array,
                Err(e) => {
                    tracing::warn!("No view of {} for display: {}", layer.id, e);
                    continue;
                }
            };
            let spec = SurfaceSpec {
                name: display_name(prefix, &layer.id),
                array,
                visible: false,
                metadata: LayerMetadata {
                    sequence_uid: plan.uid,
                    mode: meta.mode.clone(),
                    layer_tag: layer.channel_tag.clone(),
                },
                scale: scale.clone(),
            };
            if let Err(e) = self.display.create_surface(spec) {
                tracing::warn!(
                    "Could not create display surface for {}, continuing without preview: {}",
                    layer.id,
                    e
                );
            }
        }

        if let Err(e) = self.display.set_axis_labels(layer_plan.axis_labels.clone()) {
            tracing::warn!("Could not label viewer axes: {}", e);
        }
    }

    fn worker_context(&self) -> WorkerContext {
        WorkerContext {
            store: Arc::clone(&self.store),
            display: Arc::clone(&self.display),
            acquisition: Arc::clone(&self.acquisition),
            errors: self.failures.clone(),
            state: Arc::clone(&self.state),
            default_prefix: self.config.default_name_prefix.clone(),
            idle_poll: self.config.worker.idle_poll(),
            refresh_interval: self.config.display.refresh_interval(),
        }
    }

    fn start_run(&self, plan: &SequencePlan, meta: &SequenceMeta) -> Result<usize> {
        let layer_plan = plan_layers(plan)?;
        let handles = self.allocate_layers(plan, &layer_plan)?;
        self.create_surfaces(plan, meta, &layer_plan, &handles);

        let (frames, receiver) = unbounded();
        let accepting = Arc::new(AtomicBool::new(true));
        let worker = StreamWorker::new(
            self.worker_context(),
            receiver,
            Arc::clone(&accepting),
            RunReport::new(plan.uid),
        );
        let spawned = std::thread::Builder::new()
            .name(format!("mda-stream-{}", plan.uid.simple()))
            .spawn(move || worker.run());
        let worker = match spawned {
            Ok(worker) => worker,
            Err(e) => {
                for handle in &handles {
                    self.store.release(handle);
                }
                return Err(StreamError::Worker(format!("failed to spawn worker: {}", e)));
            }
        };

        let layers = handles.len();
        lock(&self.sequences).insert(plan.uid, handles);
        *lock(&self.run) = Some(ActiveRun {
            sequence_uid: plan.uid,
            frames,
            accepting,
            received: 0,
            worker,
        });
        Ok(layers)
    }

    /// Stop accepting frames for `plan`; the worker drains what is buffered
    fn end_run(&self, plan: &SequencePlan, how: &str) {
        let run = lock(&self.run);
        match run.as_ref() {
            Some(active) if active.sequence_uid == plan.uid => {
                // Draining must be visible before the worker can go idle
                self.state.set(StreamState::Draining);
                active.accepting.store(false, Ordering::SeqCst);
                tracing::info!(
                    "Sequence {} {}; {} frame(s) left to write",
                    plan.uid,
                    how,
                    active.frames.len()
                );
            }
            _ => tracing::debug!("Sequence {} {} without an active run", plan.uid, how),
        }
    }
}

impl SequenceObserver for StreamingEngine {
    fn sequence_started(&self, plan: Arc<SequencePlan>) -> Result<()> {
        let meta = match plan.stream_meta()? {
            Some(meta) => meta,
            None => {
                tracing::debug!("Ignoring sequence {} without stream metadata", plan.uid);
                return Ok(());
            }
        };

        self.acquisition.set_paused(true);

        let previous = lock(&self.run).take();
        if let Some(run) = previous {
            tracing::info!(
                "Waiting for sequence {} to drain before starting {}",
                run.sequence_uid,
                plan.uid
            );
            if let Err(e) = self.retire(run) {
                tracing::error!("Previous stream worker failed: {}", e);
            }
        }

        self.state.set(StreamState::Planning);
        match self.start_run(&plan, &meta) {
            Ok(layers) => {
                self.state.set(StreamState::Buffering);
                self.acquisition.set_paused(false);
                tracing::info!("Streaming sequence {} into {} layer(s)", plan.uid, layers);
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    "Planning sequence {} failed, acquisition stays paused: {}",
                    plan.uid,
                    e
                );
                self.state.set(StreamState::Idle);
                Err(e)
            }
        }
    }

    fn frame_ready(&self, frame: Frame, event: AcquisitionEvent) {
        let mut run = lock(&self.run);
        match run.as_mut() {
            Some(active)
                if active.sequence_uid == event.sequence.uid
                    && active.accepting.load(Ordering::SeqCst) =>
            {
                let index = event.index.clone();
                if active.frames.send(BufferedFrame { frame, event }).is_ok() {
                    active.received += 1;
                } else {
                    tracing::warn!("Stream worker is gone, dropping frame {:?}", index);
                }
            }
            Some(active) if active.sequence_uid == event.sequence.uid => {
                tracing::warn!(
                    "Frame {:?} arrived after sequence {} ended, dropping it",
                    event.index,
                    event.sequence.uid
                );
            }
            _ if !event.sequence.metadata.contains_key(STREAM_META_KEY) => {
                tracing::debug!("Skipping frame of foreign sequence {}", event.sequence.uid);
            }
            _ => tracing::warn!(
                "Frame {:?} of sequence {} arrived outside a running plan",
                event.index,
                event.sequence.uid
            ),
        }
    }

    fn sequence_finished(&self, plan: Arc<SequencePlan>) {
        self.end_run(&plan, "finished");
    }

    fn sequence_cancelled(&self, plan: Arc<SequencePlan>) {
        self.end_run(&plan, "cancelled");
    }
}

impl Drop for StreamingEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Per-dimension display scale, `None` without a pixel calibration
fn surface_scale(
    plan: &SequencePlan,
    layer_plan: &LayerPlan,
    pixel_size_um: f64,
) -> Option<Vec<f64>> {
    if pixel_size_um <= 0.0 {
        return None;
    }
    let mut scale: Vec<f64> = layer_plan
        .plan_axes()
        .iter()
        .map(|axis| match (axis.as_str(), plan.z_step) {
            (AXIS_Z, Some(step)) => step,
            _ => 1.0,
        })
        .collect();
    scale.extend([pixel_size_um, pixel_size_um]);
    Some(scale)
}
