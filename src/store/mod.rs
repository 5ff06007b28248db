//! Backing store for acquired frames
//!
//! The [`BackingStore`] owns one [`ChunkedArray`] per planned layer, each in its
//! own scratch directory. Arrays live until they are released or the store is
//! dropped; a finished plan keeps its arrays so the acquisition can still be
//! browsed.
//!
//! # Ownership
//!
//! The store holds the only strong reference to each array. Display surfaces get
//! an [`ArrayRef`], which stops resolving once the array is released, so a
//! surface can never keep scratch storage alive past teardown.
//!
//! # Example
//!
//! ```ignore
//! use mda_stream::store::BackingStore;
//!
//! let store = BackingStore::new(StoreSettings::default());
//! let handle = store.allocate(&layer, (512, 512), ElementType::U16)?;
//! store.write(&handle, &[0, 1], &frame)?;
//! store.release_all();
//! ```

pub mod array;

pub use array::{ArrayMetadata, ArrayRef, ChunkedArray, ARRAY_METADATA_FILE};

use crate::config::StoreSettings;
use crate::error::StoreError;
use crate::sequence::{LayerId, PlannedLayer};
use crate::types::{ElementType, Frame};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};

/// Handle to an allocated array, valid until released
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArrayHandle(LayerId);

impl ArrayHandle {
    pub fn layer_id(&self) -> &LayerId {
        &self.0
    }
}

/// Owner of every backing array
#[derive(Debug)]
pub struct BackingStore {
    settings: StoreSettings,
    arrays: RwLock<HashMap<LayerId, Arc<ChunkedArray>>>,
}

impl BackingStore {
    pub fn new(settings: StoreSettings) -> Self {
        Self {
            settings,
            arrays: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Allocate an array for `layer` with frames of `frame_shape` (height, width)
    pub fn allocate(
        &self,
        layer: &PlannedLayer,
        frame_shape: (usize, usize),
        element_type: ElementType,
    ) -> Result<ArrayHandle, StoreError> {
        self.allocate_with_attrs(layer, frame_shape, element_type, BTreeMap::new())
    }

    /// Allocate with extra attributes recorded in the array's metadata
    pub fn allocate_with_attrs(
        &self,
        layer: &PlannedLayer,
        frame_shape: (usize, usize),
        element_type: ElementType,
        mut attrs: BTreeMap<String, serde_json::Value>,
    ) -> Result<ArrayHandle, StoreError> {
        let mut arrays = self
            .arrays
            .write()
            .map_err(|e| StoreError::Lock(e.to_string()))?;
        if arrays.contains_key(&layer.id) {
            return Err(StoreError::AlreadyAllocated(layer.id.clone()));
        }

        if let Some(tag) = &layer.channel_tag {
            attrs.insert("channel".to_string(), serde_json::Value::from(tag.clone()));
        }

        let array = ChunkedArray::create(
            &self.settings.root(),
            &self.settings.dir_prefix,
            layer.id.clone(),
            &layer.shape,
            frame_shape,
            element_type,
            attrs,
        )?;

        tracing::debug!(
            "Allocated array {} with shape {:?} ({}) at {}",
            layer.id,
            array.shape(),
            element_type,
            array.path().display()
        );

        arrays.insert(layer.id.clone(), Arc::new(array));
        Ok(ArrayHandle(layer.id.clone()))
    }

    /// Handle of an allocated layer
    pub fn handle(&self, layer_id: &LayerId) -> Option<ArrayHandle> {
        let arrays = self.arrays.read().ok()?;
        arrays
            .contains_key(layer_id)
            .then(|| ArrayHandle(layer_id.clone()))
    }

    fn get(&self, handle: &ArrayHandle) -> Result<Arc<ChunkedArray>, StoreError> {
        let arrays = self
            .arrays
            .read()
            .map_err(|e| StoreError::Lock(e.to_string()))?;
        arrays
            .get(&handle.0)
            .cloned()
            .ok_or_else(|| StoreError::UnknownHandle(handle.0.clone()))
    }

    /// Non-owning view for display surfaces
    pub fn array_ref(&self, handle: &ArrayHandle) -> Result<ArrayRef, StoreError> {
        self.get(handle).map(|a| ArrayRef::new(&a))
    }

    /// Full shape of an allocated array
    pub fn shape(&self, handle: &ArrayHandle) -> Result<Vec<usize>, StoreError> {
        self.get(handle).map(|a| a.shape().to_vec())
    }

    /// Assign `frame` at `coordinate`
    pub fn write(
        &self,
        handle: &ArrayHandle,
        coordinate: &[usize],
        frame: &Frame,
    ) -> Result<(), StoreError> {
        // Lock is held only for the lookup; the write itself touches one chunk file
        let array = self.get(handle)?;
        array.write(coordinate, frame)
    }

    pub fn read(&self, handle: &ArrayHandle, coordinate: &[usize]) -> Result<Frame, StoreError> {
        self.get(handle)?.read(coordinate)
    }

    /// Number of chunks written to an array
    pub fn written_chunks(&self, handle: &ArrayHandle) -> Result<usize, StoreError> {
        self.get(handle)?.written_chunks()
    }

    /// Ids of all allocated layers, sorted
    pub fn layer_ids(&self) -> Vec<LayerId> {
        let arrays = self.arrays.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<_> = arrays.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.arrays
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Free one array. Unknown or already released handles are ignored.
    pub fn release(&self, handle: &ArrayHandle) {
        let removed = self
            .arrays
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle.0);
        if let Some(array) = removed {
            close_array(array);
        }
    }

    /// Free every array. Never fails; cleanup problems are logged.
    pub fn release_all(&self) {
        let drained: Vec<_> = self
            .arrays
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, array)| array)
            .collect();

        if !drained.is_empty() {
            tracing::info!("Releasing {} backing arrays", drained.len());
        }
        for array in drained {
            close_array(array);
        }
    }
}

impl Drop for BackingStore {
    fn drop(&mut self) {
        self.release_all();
    }
}

fn close_array(array: Arc<ChunkedArray>) {
    let id = array.layer_id().clone();
    match Arc::try_unwrap(array) {
        Ok(array) => {
            let path = array.path().to_path_buf();
            if let Err(e) = array.close() {
                tracing::warn!(
                    "Failed to remove scratch storage {} for {}: {}",
                    path.display(),
                    id,
                    e
                );
            }
        }
        Err(shared) => {
            // A reader is mid-read; the directory goes away when it lets go
            tracing::debug!("Array {} still borrowed, deferring cleanup", id);
            drop(shared);
        }
    }
}
