use std::path::{Component, Path, PathBuf};

use crate::error::{Result, StoreError};

/// Resolve `name` as a single file directly inside `base`.
///
/// Rejects separators, `..` and anything that would not stay a plain child
/// of `base` once joined.
pub(crate) fn child_file(base: &Path, name: &str) -> Result<PathBuf> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(StoreError::PathTraversal);
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => return Err(StoreError::PathTraversal),
    }

    let resolved = base.join(name);
    if !resolved.starts_with(base) {
        return Err(StoreError::PathTraversal);
    }
    Ok(resolved)
}
