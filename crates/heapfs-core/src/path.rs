//! Path resolution: absolute slash-separated path → (parent, leaf) pair.
//!
//! Pure functions, no hidden state; safe to call concurrently.

use heapfs_error::{HeapFsError, Result};
use heapfs_types::{LayoutError, LeafName, ParentPath};

/// Split an absolute path into its normalized parent directory and leaf
/// name, with standard dirname/basename semantics.
///
/// - `"/"` maps to the sentinel root pair `("/", "/")`.
/// - Trailing slashes on non-root inputs are tolerated (`"/a/"` → `"/a"`).
/// - Empty or non-absolute input fails with `InvalidPath`.
/// - Components exceeding the record bounds fail with `NameTooLong`.
pub fn resolve(path: &str) -> Result<(ParentPath, LeafName)> {
    if path.is_empty() || !path.starts_with('/') {
        return Err(HeapFsError::InvalidPath(path.to_owned()));
    }

    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok((ParentPath::root(), LeafName::root()));
    }

    let Some(cut) = trimmed.rfind('/') else {
        return Err(HeapFsError::InvalidPath(path.to_owned()));
    };
    let leaf = &trimmed[cut + 1..];
    let parent = match trimmed[..cut].trim_end_matches('/') {
        "" => "/",
        parent => parent,
    };

    let leaf = LeafName::new(leaf).map_err(|err| name_error(path, err))?;
    let parent = ParentPath::new(parent).map_err(|err| name_error(path, err))?;
    Ok((parent, leaf))
}

/// Display-form full path for a (parent, leaf) pair.
pub(crate) fn join_display(parent: &ParentPath, leaf: &LeafName) -> String {
    if leaf.is_root() {
        "/".to_owned()
    } else if parent.is_root() {
        format!("/{leaf}")
    } else {
        format!("{parent}/{leaf}")
    }
}

fn name_error(path: &str, err: LayoutError) -> HeapFsError {
    match err {
        LayoutError::NameTooLong { .. } => HeapFsError::NameTooLong,
        _ => HeapFsError::InvalidPath(path.to_owned()),
    }
}
