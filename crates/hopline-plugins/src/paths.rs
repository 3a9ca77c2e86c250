//! Path checks shared by the directory host and the resolver.

use std::path::{Component, Path, PathBuf};

use crate::error::{PluginError, PluginResult};

/// Lexically normalise a relative path and require it to name something
/// strictly below its base: no absolute paths, no root or prefix
/// components, no `..` that climbs out, and not the base itself.
pub(crate) fn normalize_relative(relative: &str) -> PluginResult<PathBuf> {
    let traversal = || PluginError::PathTraversal {
        path: relative.to_owned(),
    };

    let path = Path::new(relative);
    if path.is_absolute() {
        return Err(traversal());
    }

    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {},
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(traversal());
                }
            },
            Component::RootDir | Component::Prefix(_) => return Err(traversal()),
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err(traversal());
    }
    Ok(normalized)
}

/// `base` joined with the normalised form of `relative`.
pub(crate) fn join_within(base: &Path, relative: &str) -> PluginResult<PathBuf> {
    Ok(base.join(normalize_relative(relative)?))
}

/// Defense-in-depth after parent directories exist: the canonical parent of
/// `target` must still be inside `canonical_base`. Catches symlinked
/// directories that lexical checks cannot see.
pub(crate) fn ensure_within(canonical_base: &Path, target: &Path, original: &str) -> PluginResult<()> {
    let escaped = match target.parent().map(Path::canonicalize) {
        Some(Ok(parent)) => !parent.starts_with(canonical_base),
        Some(Err(e)) => return Err(PluginError::Io(e)),
        None => true,
    };
    if escaped {
        return Err(PluginError::PathTraversal {
            path: original.to_owned(),
        });
    }
    Ok(())
}

/// Whether `path` is a regular file the current user may execute.
#[must_use]
pub fn is_executable(path: &Path) -> bool {
    path.metadata().is_ok_and(|m| m.is_file())
        && nix::unistd::access(path, nix::unistd::AccessFlags::X_OK).is_ok()
}
