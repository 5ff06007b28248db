//! Error handling for the streaming pipeline
//!
//! Each stage of the pipeline has its own error type so callers can tell a
//! dropped frame from a failed plan. [`StreamError`] wraps all of them and is
//! what the public API returns.

use crate::sequence::LayerId;
use thiserror::Error;

/// A frame could not be mapped to a layer and coordinate.
///
/// Fatal for that single frame only; the worker logs it and moves on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    /// The plan that owns the event was not started through this pipeline
    #[error("Sequence {0} carries no stream metadata")]
    ForeignSequence(String),

    /// The plan's stream metadata could not be parsed
    #[error("Invalid stream metadata: {0}")]
    InvalidMetadata(String),

    /// An axis of the backing array has no index in the event
    #[error("Axis '{axis}' cannot be resolved for layer {layer}")]
    UnresolvedAxis { axis: String, layer: LayerId },
}

/// Errors raised by the backing store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Bit depth the store has no element type for
    #[error("Unsupported bit depth: {0}")]
    UnsupportedBitDepth(u32),

    /// Array shape contains a zero-length dimension
    #[error("Invalid shape {shape:?} for layer {layer}")]
    InvalidShape { layer: LayerId, shape: Vec<usize> },

    /// A layer with this id is already allocated
    #[error("Layer {0} is already allocated")]
    AlreadyAllocated(LayerId),

    /// Handle was never allocated or has been released
    #[error("No array allocated for layer {0}")]
    UnknownHandle(LayerId),

    /// Coordinate has the wrong number of axes
    #[error("Coordinate {coordinate:?} has rank {actual}, array expects {expected}")]
    RankMismatch {
        coordinate: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    /// Coordinate lies outside the array
    #[error("Coordinate {coordinate:?} out of bounds for shape {shape:?}")]
    OutOfBounds {
        coordinate: Vec<usize>,
        shape: Vec<usize>,
    },

    /// Frame dimensions differ from the array's chunk
    #[error("Frame is {actual:?}, array expects {expected:?}")]
    FrameShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    /// Frame element type differs from the array's
    #[error("Frame element type {actual}, array expects {expected}")]
    ElementTypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// Stored chunk is not the size the metadata claims
    #[error("Chunk {path} is corrupt: {message}")]
    CorruptChunk { path: String, message: String },

    /// The handle table lock was poisoned by a panicking thread
    #[error("Store lock poisoned: {0}")]
    Lock(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Array metadata could not be (de)serialized
    #[error("Metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// Errors raised while marshaling operations onto the display thread.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DisplayError {
    /// The UI side has gone away
    #[error("Display is no longer available")]
    Disconnected,

    /// The display queue is full
    #[error("Display queue is full")]
    Full,

    /// The UI thread did not acknowledge in time
    #[error("Display did not respond within {0} ms")]
    Timeout(u64),

    /// The host rejected the operation
    #[error("Display rejected operation: {0}")]
    Rejected(String),
}

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Display error: {0}")]
    Display(#[from] DisplayError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Sequence metadata could not be parsed
    #[error("Sequence metadata error: {0}")]
    Metadata(String),

    /// The worker thread could not be spawned or panicked
    #[error("Worker error: {0}")]
    Worker(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<StreamError>,
    },
}

impl StreamError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        StreamError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, StreamError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<StreamError>,
{
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.into().with_context(f()))
    }
}
