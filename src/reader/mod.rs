//! Chunked, lazily-read access to multi-dimensional microscopy arrays.

use std::path::Path;
use std::sync::Arc;

use crate::foundation::error::{TimelapseError, TimelapseResult};

/// Chunk sources and their coordinate types.
pub mod source;
/// Zarr-v2-style on-disk plane store.
pub mod store;
/// Lazy named-axis views.
pub mod view;

use self::store::PlaneStore;
use self::view::ArrayView;

/// Open `path` and return a full lazy view over it.
///
/// Only metadata is read here; pixel data is read by [`ArrayView::materialize`].
pub fn open(path: impl AsRef<Path>) -> TimelapseResult<ArrayView> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(TimelapseError::unreadable(format!(
            "'{}' does not exist",
            path.display()
        )));
    }
    if path.is_dir() && path.join(".zarray").is_file() {
        let store = PlaneStore::open(path)?;
        return Ok(ArrayView::new(Arc::new(store)));
    }
    Err(TimelapseError::unreadable(format!(
        "'{}' is not a recognized array source (expected a plane store directory with .zarray)",
        path.display()
    )))
}
