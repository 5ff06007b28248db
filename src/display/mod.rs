//! Display boundary between the pipeline and the host viewer
//!
//! The pipeline talks to the viewer through the [`Display`] trait. Viewers
//! usually insist on being driven from their own UI thread, so the standard
//! implementation is [`DisplayBridge`]: it queues [`DisplayCommand`]s on a
//! bounded crossbeam channel, and the UI thread applies them to its
//! [`DisplayHost`] by calling [`DisplayReceiver::pump`] from its event loop.
//!
//! ```text
//!  engine / worker threads             UI thread
//!  ┌───────────────┐   DisplayCommand  ┌─────────────────┐
//!  │ DisplayBridge │ ────────────────► │ DisplayReceiver │ ──► DisplayHost
//!  └───────────────┘ ◄──── ack ─────── └─────────────────┘
//! ```
//!
//! Only surface creation waits for the UI thread (with a timeout); every other
//! command is fire-and-forget and fails fast when the queue is full or the UI
//! has gone away.

pub mod headless;

pub use headless::HeadlessViewer;

use crate::config::DisplaySettings;
use crate::error::DisplayError;
use crate::store::ArrayRef;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Metadata attached to every surface the pipeline creates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerMetadata {
    /// Plan the surface belongs to
    pub sequence_uid: Uuid,
    pub mode: String,
    /// Channel tag in split-channel mode
    pub layer_tag: Option<String>,
}

/// Stage position at the time a frame was written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    pub coordinate: Vec<usize>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

/// Everything a viewer needs to show one backing array
#[derive(Debug, Clone)]
pub struct SurfaceSpec {
    /// Unique display name; later updates address the surface by it
    pub name: String,
    pub array: ArrayRef,
    pub visible: bool,
    pub metadata: LayerMetadata,
    /// Per-dimension scale including the spatial axes, `None` for unit scale
    pub scale: Option<Vec<f64>>,
}

/// Display operations the pipeline issues.
///
/// Implementations must be callable from any thread.
#[cfg_attr(test, mockall::automock)]
pub trait Display: Send + Sync {
    /// Create a surface backed by `spec.array`. Returns once it exists.
    fn create_surface(&self, spec: SurfaceSpec) -> Result<(), DisplayError>;

    /// Label the viewer's dimension sliders
    fn set_axis_labels(&self, labels: Vec<String>) -> Result<(), DisplayError>;

    /// Move the viewer's current position to `coordinate`
    fn set_current_index(&self, coordinate: Vec<usize>) -> Result<(), DisplayError>;

    fn set_visible(&self, name: &str, visible: bool) -> Result<(), DisplayError>;

    /// Record where the stage was when a frame of `name` was written
    fn append_position(&self, name: &str, record: PositionRecord) -> Result<(), DisplayError>;

    /// Hide and re-show a surface so viewers that only redraw on visibility
    /// changes pick up new data
    fn refresh_layer(&self, name: &str) -> Result<(), DisplayError> {
        self.set_visible(name, false)?;
        self.set_visible(name, true)
    }
}

/// Viewer-side counterpart of [`Display`], driven on the UI thread
pub trait DisplayHost {
    fn create_surface(&mut self, spec: SurfaceSpec) -> Result<(), DisplayError>;
    fn set_axis_labels(&mut self, labels: &[String]);
    fn set_current_index(&mut self, coordinate: &[usize]);
    fn set_visible(&mut self, name: &str, visible: bool);
    fn append_position(&mut self, name: &str, record: PositionRecord);
}

/// A display operation in transit to the UI thread
#[derive(Debug)]
pub enum DisplayCommand {
    CreateSurface {
        spec: SurfaceSpec,
        reply: Sender<Result<(), DisplayError>>,
    },
    SetAxisLabels(Vec<String>),
    SetCurrentIndex(Vec<usize>),
    SetVisible {
        name: String,
        visible: bool,
    },
    AppendPosition {
        name: String,
        record: PositionRecord,
    },
}

/// Pipeline-side [`Display`] that forwards to the UI thread
#[derive(Debug, Clone)]
pub struct DisplayBridge {
    cmd_tx: Sender<DisplayCommand>,
    surface_timeout: Duration,
}

impl DisplayBridge {
    /// Create a bridge pair. The UI thread owns the receiver.
    pub fn new(settings: &DisplaySettings) -> (Self, DisplayReceiver) {
        let (cmd_tx, cmd_rx) = bounded(settings.queue_capacity.max(1));
        (
            Self {
                cmd_tx,
                surface_timeout: settings.surface_timeout(),
            },
            DisplayReceiver { cmd_rx },
        )
    }

    fn push(&self, cmd: DisplayCommand) -> Result<(), DisplayError> {
        self.cmd_tx.try_send(cmd).map_err(|e| match e {
            TrySendError::Full(_) => DisplayError::Full,
            TrySendError::Disconnected(_) => DisplayError::Disconnected,
        })
    }
}

impl Display for DisplayBridge {
    fn create_surface(&self, spec: SurfaceSpec) -> Result<(), DisplayError> {
        let timeout_ms = self.surface_timeout.as_millis() as u64;
        let (reply_tx, reply_rx) = bounded(1);
        self.cmd_tx
            .send_timeout(
                DisplayCommand::CreateSurface {
                    spec,
                    reply: reply_tx,
                },
                self.surface_timeout,
            )
            .map_err(|e| {
                if e.is_disconnected() {
                    DisplayError::Disconnected
                } else {
                    DisplayError::Timeout(timeout_ms)
                }
            })?;

        match reply_rx.recv_timeout(self.surface_timeout) {
            Ok(result) => result,
            Err(e) if e.is_timeout() => Err(DisplayError::Timeout(timeout_ms)),
            Err(_) => Err(DisplayError::Disconnected),
        }
    }

    fn set_axis_labels(&self, labels: Vec<String>) -> Result<(), DisplayError> {
        self.push(DisplayCommand::SetAxisLabels(labels))
    }

    fn set_current_index(&self, coordinate: Vec<usize>) -> Result<(), DisplayError> {
        self.push(DisplayCommand::SetCurrentIndex(coordinate))
    }

    fn set_visible(&self, name: &str, visible: bool) -> Result<(), DisplayError> {
        self.push(DisplayCommand::SetVisible {
            name: name.to_string(),
            visible,
        })
    }

    fn append_position(&self, name: &str, record: PositionRecord) -> Result<(), DisplayError> {
        self.push(DisplayCommand::AppendPosition {
            name: name.to_string(),
            record,
        })
    }
}

/// UI-side end of a [`DisplayBridge`]
#[derive(Debug)]
pub struct DisplayReceiver {
    cmd_rx: Receiver<DisplayCommand>,
}

impl DisplayReceiver {
    /// Try to receive a single command without blocking
    pub fn try_recv(&self) -> Option<DisplayCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// Drain all pending commands
    pub fn drain(&self) -> Vec<DisplayCommand> {
        let mut cmds = Vec::new();
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            cmds.push(cmd);
        }
        cmds
    }

    /// Apply all pending commands to `host`; returns how many were applied
    pub fn pump<H: DisplayHost + ?Sized>(&self, host: &mut H) -> usize {
        let mut applied = 0;
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            apply(host, cmd);
            applied += 1;
        }
        applied
    }

    /// Wait up to `timeout` for the first command, then apply everything pending
    pub fn pump_timeout<H: DisplayHost + ?Sized>(&self, host: &mut H, timeout: Duration) -> usize {
        match self.cmd_rx.recv_timeout(timeout) {
            Ok(cmd) => {
                apply(host, cmd);
                1 + self.pump(host)
            }
            Err(_) => 0,
        }
    }
}

fn apply<H: DisplayHost + ?Sized>(host: &mut H, cmd: DisplayCommand) {
    match cmd {
        DisplayCommand::CreateSurface { spec, reply } => {
            let result = host.create_surface(spec);
            // The requester may have timed out and gone away
            let _ = reply.send(result);
        }
        DisplayCommand::SetAxisLabels(labels) => host.set_axis_labels(&labels),
        DisplayCommand::SetCurrentIndex(coordinate) => host.set_current_index(&coordinate),
        DisplayCommand::SetVisible { name, visible } => host.set_visible(&name, visible),
        DisplayCommand::AppendPosition { name, record } => host.append_position(&name, record),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreSettings;
    use crate::sequence::{LayerId, PlannedLayer};
    use crate::store::BackingStore;
    use crate::types::ElementType;

    fn spec(store: &BackingStore, name: &str) -> SurfaceSpec {
        let layer = PlannedLayer {
            id: LayerId::new(name),
            shape: vec![2],
            channel_tag: None,
        };
        let handle = store.allocate(&layer, (2, 2), ElementType::U8).unwrap();
        SurfaceSpec {
            name: name.to_string(),
            array: store.array_ref(&handle).unwrap(),
            visible: false,
            metadata: LayerMetadata {
                sequence_uid: Uuid::nil(),
                mode: "mda".to_string(),
                layer_tag: None,
            },
            scale: None,
        }
    }

    #[test]
    fn test_fire_and_forget_commands_reach_host() {
        let (bridge, receiver) = DisplayBridge::new(&DisplaySettings::default());
        bridge.set_axis_labels(vec!["t".into(), "y".into(), "x".into()]).unwrap();
        bridge.set_current_index(vec![2]).unwrap();
        bridge.refresh_layer("layer").unwrap();

        let mut viewer = HeadlessViewer::default();
        assert_eq!(receiver.pump(&mut viewer), 4);
        assert_eq!(viewer.axis_labels(), &["t", "y", "x"]);
        assert_eq!(viewer.current_step(), &[2, 0, 0]);
    }

    #[test]
    fn test_create_surface_waits_for_ui_thread() {
        let root = tempfile::tempdir().unwrap();
        let store = BackingStore::new(StoreSettings::in_dir(root.path()));
        let (bridge, receiver) = DisplayBridge::new(&DisplaySettings::default());

        let ui = std::thread::spawn(move || {
            let mut viewer = HeadlessViewer::default();
            receiver.pump_timeout(&mut viewer, Duration::from_secs(2));
            viewer
        });

        bridge.create_surface(spec(&store, "Exp_1")).unwrap();
        let viewer = ui.join().unwrap();
        assert!(viewer.surface("Exp_1").is_some());
    }

    #[test]
    fn test_create_surface_times_out_without_ui() {
        let root = tempfile::tempdir().unwrap();
        let store = BackingStore::new(StoreSettings::in_dir(root.path()));
        let settings = DisplaySettings {
            surface_timeout_ms: 20,
            ..Default::default()
        };
        let (bridge, _receiver) = DisplayBridge::new(&settings);

        assert_eq!(
            bridge.create_surface(spec(&store, "Exp_1")),
            Err(DisplayError::Timeout(20))
        );
    }

    #[test]
    fn test_disconnected_and_full_queue() {
        let settings = DisplaySettings {
            queue_capacity: 1,
            ..Default::default()
        };
        let (bridge, receiver) = DisplayBridge::new(&settings);
        bridge.set_current_index(vec![0]).unwrap();
        assert_eq!(bridge.set_current_index(vec![1]), Err(DisplayError::Full));

        drop(receiver);
        assert_eq!(
            bridge.set_visible("x", true),
            Err(DisplayError::Disconnected)
        );
    }
}
