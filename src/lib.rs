//! # mda-stream: acquisition-to-array streaming
//!
//! Streams the frames of a multi-dimensional microscope acquisition (time,
//! stage position, channel, z, tile grid) into chunked backing arrays while the
//! acquisition is running, and keeps a viewer showing them live.
//!
//! ## Architecture
//!
//! - **Planner** (`sequence::planner`): decides the arrays a plan needs, their
//!   axis layout and shape
//! - **Router** (`sequence::router`): maps each delivered event to an array,
//!   coordinate and layer name
//! - **Backing store** (`store`): owns one chunked array per layer in scratch
//!   storage that is removed on teardown
//! - **Streaming engine** (`stream`): reacts to start/frame/finish
//!   notifications, buffers frames and writes them from a background worker
//! - **Display** (`display`): marshals viewer updates onto the UI thread over
//!   crossbeam channels
//!
//! ## Configuration
//!
//! Tunables are stored as TOML in the platform configuration directory under
//! `dev.mda-stream` (see [`config`]).
//!
//! ## Example
//!
//! ```ignore
//! use mda_stream::{
//!     acquisition::SimulatedAcquisition,
//!     config::StreamConfig,
//!     display::{DisplayBridge, HeadlessViewer},
//!     sequence::{SequencePlan, AXIS_TIME},
//!     stream::StreamingEngine,
//! };
//! use std::sync::Arc;
//!
//! let config = StreamConfig::load_or_default();
//! let (bridge, receiver) = DisplayBridge::new(&config.display);
//! let camera = Arc::new(SimulatedAcquisition::new((512, 512), 16));
//! let engine = StreamingEngine::new(config, camera.clone(), Arc::new(bridge));
//!
//! // The UI thread keeps calling `receiver.pump(&mut viewer)`
//! let plan = SequencePlan::builder().axis(AXIS_TIME, 10).build();
//! camera.run(plan, &engine)?;
//! let report = engine.wait_idle(std::time::Duration::from_secs(10))?;
//! ```

pub mod acquisition;
pub mod config;
pub mod display;
pub mod error;
pub mod sequence;
pub mod store;
pub mod stream;
pub mod types;

// Re-export commonly used types
pub use acquisition::{AcquisitionEngine, SequenceObserver, SimulatedAcquisition};
pub use config::StreamConfig;
pub use display::{Display, DisplayBridge, DisplayHost, DisplayReceiver, HeadlessViewer};
pub use error::{Result, StreamError};
pub use sequence::{AcquisitionEvent, LayerId, SequencePlan};
pub use store::{ArrayHandle, BackingStore};
pub use stream::{RunReport, StreamState, StreamingEngine};
pub use types::{ElementType, Frame};
