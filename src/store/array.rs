//! Chunked N-dimensional array in a scratch directory
//!
//! Every frame is one chunk: for an array of shape `[a, b, h, w]` the chunk
//! shape is `[1, 1, h, w]`, so writing a frame touches exactly one file. Chunks
//! are stored as raw little-endian pixels named by their chunk index
//! (`"2.0.0.0"`), next to an `array.json` describing the array. A chunk that was
//! never written reads back as zeros.

use crate::error::StoreError;
use crate::sequence::LayerId;
use crate::types::{ElementType, Frame};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use tempfile::TempDir;

/// Name of the metadata file inside an array directory
pub const ARRAY_METADATA_FILE: &str = "array.json";

/// Contents of `array.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayMetadata {
    pub layer_id: LayerId,
    /// Full shape, spatial dimensions last
    pub shape: Vec<usize>,
    pub chunks: Vec<usize>,
    pub dtype: ElementType,
    pub fill_value: u32,
    pub created: DateTime<Utc>,
    /// Free-form attributes (owning sequence, channel tag, axis labels)
    #[serde(default)]
    pub attrs: BTreeMap<String, serde_json::Value>,
}

/// One backing array. Owned by the [`BackingStore`](super::BackingStore).
#[derive(Debug)]
pub struct ChunkedArray {
    metadata: ArrayMetadata,
    /// Plan-axis dimensions (the leading part of the full shape)
    plan_shape: Vec<usize>,
    frame_shape: (usize, usize),
    dir: TempDir,
}

impl ChunkedArray {
    /// Create an empty array in a fresh directory under `root`
    pub fn create(
        root: &Path,
        dir_prefix: &str,
        layer_id: LayerId,
        plan_shape: &[usize],
        frame_shape: (usize, usize),
        element_type: ElementType,
        attrs: BTreeMap<String, serde_json::Value>,
    ) -> Result<Self, StoreError> {
        let mut shape = plan_shape.to_vec();
        shape.extend([frame_shape.0, frame_shape.1]);
        if shape.iter().any(|&d| d == 0) {
            return Err(StoreError::InvalidShape {
                layer: layer_id,
                shape,
            });
        }

        let mut chunks = vec![1; plan_shape.len()];
        chunks.extend([frame_shape.0, frame_shape.1]);

        std::fs::create_dir_all(root)?;
        let dir = tempfile::Builder::new()
            .prefix(dir_prefix)
            .tempdir_in(root)?;

        let metadata = ArrayMetadata {
            layer_id,
            shape,
            chunks,
            dtype: element_type,
            fill_value: 0,
            created: Utc::now(),
            attrs,
        };
        let json = serde_json::to_vec_pretty(&metadata)?;
        std::fs::write(dir.path().join(ARRAY_METADATA_FILE), json)?;

        Ok(Self {
            metadata,
            plan_shape: plan_shape.to_vec(),
            frame_shape,
            dir,
        })
    }

    pub fn layer_id(&self) -> &LayerId {
        &self.metadata.layer_id
    }

    pub fn metadata(&self) -> &ArrayMetadata {
        &self.metadata
    }

    /// Full shape, spatial dimensions last
    pub fn shape(&self) -> &[usize] {
        &self.metadata.shape
    }

    /// Leading (non-spatial) dimensions
    pub fn plan_shape(&self) -> &[usize] {
        &self.plan_shape
    }

    pub fn frame_shape(&self) -> (usize, usize) {
        self.frame_shape
    }

    pub fn element_type(&self) -> ElementType {
        self.metadata.dtype
    }

    /// Scratch directory holding the chunks
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    fn check_coordinate(&self, coordinate: &[usize]) -> Result<(), StoreError> {
        if coordinate.len() != self.plan_shape.len() {
            return Err(StoreError::RankMismatch {
                coordinate: coordinate.to_vec(),
                expected: self.plan_shape.len(),
                actual: coordinate.len(),
            });
        }
        if coordinate
            .iter()
            .zip(&self.plan_shape)
            .any(|(&i, &size)| i >= size)
        {
            return Err(StoreError::OutOfBounds {
                coordinate: coordinate.to_vec(),
                shape: self.metadata.shape.clone(),
            });
        }
        Ok(())
    }

    fn chunk_key(coordinate: &[usize]) -> String {
        coordinate
            .iter()
            .chain([0, 0].iter())
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(".")
    }

    fn chunk_path(&self, coordinate: &[usize]) -> PathBuf {
        self.dir.path().join(Self::chunk_key(coordinate))
    }

    /// Store `frame` at `coordinate`, replacing whatever was there
    pub fn write(&self, coordinate: &[usize], frame: &Frame) -> Result<(), StoreError> {
        self.check_coordinate(coordinate)?;
        if frame.shape() != self.frame_shape {
            return Err(StoreError::FrameShapeMismatch {
                expected: self.frame_shape,
                actual: frame.shape(),
            });
        }
        if frame.element_type() != self.metadata.dtype {
            return Err(StoreError::ElementTypeMismatch {
                expected: self.metadata.dtype.name(),
                actual: frame.element_type().name(),
            });
        }

        // Write then rename so a concurrent reader never sees half a chunk
        let key = Self::chunk_key(coordinate);
        let path = self.dir.path().join(&key);
        let staging = self.dir.path().join(format!("{}.partial", key));
        std::fs::write(&staging, frame.to_le_bytes())?;
        std::fs::rename(&staging, &path)?;
        Ok(())
    }

    /// Frame stored at `coordinate`, zeros if it was never written
    pub fn read(&self, coordinate: &[usize]) -> Result<Frame, StoreError> {
        self.check_coordinate(coordinate)?;
        let path = self.chunk_path(coordinate);
        if !path.exists() {
            return Ok(Frame::zeros(self.metadata.dtype, self.frame_shape));
        }

        let bytes = std::fs::read(&path)?;
        Frame::from_le_bytes(self.metadata.dtype, self.frame_shape, &bytes).ok_or_else(|| {
            StoreError::CorruptChunk {
                path: path.display().to_string(),
                message: format!("{} bytes", bytes.len()),
            }
        })
    }

    /// Number of chunks written so far
    pub fn written_chunks(&self) -> Result<usize, StoreError> {
        let mut count = 0;
        for entry in std::fs::read_dir(self.dir.path())? {
            let path = entry?.path();
            let is_chunk = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.chars().all(|c| c.is_ascii_digit() || c == '.'))
                .unwrap_or(false);
            if is_chunk {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Delete the scratch directory
    pub fn close(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

/// Read-only view of an array for display surfaces.
///
/// Does not keep the array alive: once the store releases it, every read fails
/// with [`StoreError::UnknownHandle`].
#[derive(Debug, Clone)]
pub struct ArrayRef {
    layer_id: LayerId,
    array: Weak<ChunkedArray>,
}

impl ArrayRef {
    pub(crate) fn new(array: &Arc<ChunkedArray>) -> Self {
        Self {
            layer_id: array.layer_id().clone(),
            array: Arc::downgrade(array),
        }
    }

    pub fn layer_id(&self) -> &LayerId {
        &self.layer_id
    }

    /// Whether the array still exists
    pub fn is_live(&self) -> bool {
        self.array.strong_count() > 0
    }

    /// Full shape, `None` once released
    pub fn shape(&self) -> Option<Vec<usize>> {
        self.array.upgrade().map(|a| a.shape().to_vec())
    }

    pub fn read(&self, coordinate: &[usize]) -> Result<Frame, StoreError> {
        let array = self
            .array
            .upgrade()
            .ok_or_else(|| StoreError::UnknownHandle(self.layer_id.clone()))?;
        array.read(coordinate)
    }
}
