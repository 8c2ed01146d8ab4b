use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Validate the archive file path and return it absolute and normalized.
///
/// `extension` is skipped when empty. When `require_parent` is false a
/// missing parent directory is accepted so that it can be created later.
pub fn sanitize_archive_path(
    path: impl AsRef<Path>,
    extension: &str,
    require_parent: bool,
) -> Result<PathBuf> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Err(Error::PathEmpty);
    }
    let absolute = absolutize(path)?;

    if !extension.is_empty() {
        let matches = absolute
            .file_name()
            .is_some_and(|name| name.to_string_lossy().ends_with(extension));
        if !matches {
            return Err(Error::ExtensionMissing {
                path: absolute,
                extension: extension.to_string(),
            });
        }
    }

    let parent = absolute.parent().ok_or_else(|| Error::DirectoryInvalid {
        path: absolute.clone(),
    })?;
    match std::fs::metadata(parent) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(Error::DirectoryInvalid {
                path: parent.to_path_buf(),
            });
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            if require_parent {
                return Err(Error::DirectoryMissing {
                    path: parent.to_path_buf(),
                });
            }
        }
        Err(e) => {
            return Err(Error::Resolve {
                path: parent.to_path_buf(),
                source: e,
            });
        }
    }

    Ok(absolute)
}

/// Validate the raw directory path and return it absolute and normalized.
///
/// With `must_exist` the directory has to be present already (compression);
/// otherwise only an existing non-directory is rejected (extraction).
pub fn sanitize_raw_path(path: impl AsRef<Path>, must_exist: bool) -> Result<PathBuf> {
    let path = path.as_ref();
    if path.as_os_str().is_empty() {
        return Err(Error::PathEmpty);
    }
    let absolute = absolutize(path)?;

    match std::fs::metadata(&absolute) {
        Ok(meta) if meta.is_dir() => Ok(absolute),
        Ok(_) => Err(Error::NotDirectory { path: absolute }),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            if must_exist {
                Err(Error::Missing { path: absolute })
            } else {
                Ok(absolute)
            }
        }
        Err(e) => Err(Error::Resolve {
            path: absolute,
            source: e,
        }),
    }
}

/// Join `candidate` onto `root` and reject the result unless it stays under `root`.
///
/// An absolute candidate replaces the root during the join, so it only passes
/// when it already points inside the root.
pub fn sanitize_entry_path(root: impl AsRef<Path>, candidate: impl AsRef<Path>) -> Result<PathBuf> {
    let root = absolutize(root.as_ref())?;
    let candidate = candidate.as_ref();
    let resolved = normalize_path(&root.join(candidate));

    if !resolved.starts_with(&root) {
        return Err(Error::PathOutOfBound {
            root,
            entry: candidate.to_path_buf(),
            resolved,
        });
    }

    Ok(resolved)
}

/// Destination of an archive entry name. Names carrying a root or drive
/// prefix are rejected outright, wherever they point.
pub fn sanitize_entry_name(root: impl AsRef<Path>, name: &str) -> Result<PathBuf> {
    let root = root.as_ref();
    let candidate = Path::new(name);

    let anchored = candidate
        .components()
        .any(|c| matches!(c, Component::RootDir | Component::Prefix(_)));
    if anchored || name.contains('\0') {
        return Err(Error::PathOutOfBound {
            root: root.to_path_buf(),
            entry: candidate.to_path_buf(),
            resolved: candidate.to_path_buf(),
        });
    }

    sanitize_entry_path(root, candidate)
}

/// Check that a symlink stored at `link` with text `target` resolves under `root`.
pub fn sanitize_symlink_target(
    root: impl AsRef<Path>,
    link: impl AsRef<Path>,
    target: &str,
) -> Result<PathBuf> {
    let link = link.as_ref();
    let base = link.parent().unwrap_or(link);
    sanitize_entry_path(root, base.join(target))
}

/// Fully resolve the symlink at `link` and require the final target to lie under `root`.
///
/// `root` must be canonical for the comparison to be meaningful.
pub fn eval_symlink(root: impl AsRef<Path>, link: impl AsRef<Path>) -> Result<PathBuf> {
    let link = link.as_ref();
    let resolved = std::fs::canonicalize(link).map_err(|e| Error::ReadLink {
        path: link.to_path_buf(),
        source: e,
    })?;
    sanitize_entry_path(root, &resolved).map_err(|err| match err {
        Error::PathOutOfBound { root, resolved, .. } => Error::PathOutOfBound {
            root,
            entry: link.to_path_buf(),
            resolved,
        },
        other => other,
    })
}

/// Root-relative, `/`-separated entry name for a path under `root`.
pub fn entry_name(root: impl AsRef<Path>, path: impl AsRef<Path>) -> Result<String> {
    let root = absolutize(root.as_ref())?;
    let resolved = sanitize_entry_path(&root, path)?;
    let relative = resolved.strip_prefix(&root).unwrap_or(Path::new(""));
    Ok(join_components(relative))
}

/// Symlink text leading from the directory of entry `link_name` to the
/// root-relative `target`.
pub fn relative_link_target(link_name: &str, target: &Path) -> String {
    let from: Vec<&str> = link_name.split('/').filter(|s| !s.is_empty()).collect();
    let from = &from[..from.len().saturating_sub(1)];
    let to: Vec<String> = target
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();

    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| **a == b.as_str())
        .count();

    let mut parts: Vec<&str> = std::iter::repeat_n("..", from.len() - common).collect();
    parts.extend(to[common..].iter().map(String::as_str));
    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

fn join_components(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path).map_err(|e| Error::Resolve {
        path: path.to_path_buf(),
        source: e,
    })?;
    Ok(normalize_path(&absolute))
}

/// Resolve `.` and `..` lexically without touching the filesystem.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut result = PathBuf::new();

    for component in path.components() {
        match component {
            Component::ParentDir => {
                result.pop();
            }
            Component::Normal(part) => result.push(part),
            Component::RootDir => result.push(Component::RootDir.as_os_str()),
            Component::Prefix(prefix) => result.push(prefix.as_os_str()),
            Component::CurDir => {}
        }
    }

    result
}
