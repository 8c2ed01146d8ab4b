use std::path::Path;
use std::time::SystemTime;

use parcel_fs::{MetadataAccess, Support};

use crate::error::{Error, Result};

/// Stamp `path` with its archived timestamps and permission bits.
///
/// Values are validated first: `mode` must fit in `0o777` and neither
/// timestamp may be zero. With `is_symlink` the link itself is stamped; a
/// platform that cannot do so is logged and skipped. Any other failure is
/// returned.
pub fn restore_metadata(
    access: &dyn MetadataAccess,
    path: &Path,
    accessed: SystemTime,
    modified: SystemTime,
    mode: u32,
    is_symlink: bool,
) -> Result<()> {
    if mode > 0o777 {
        return Err(Error::InvalidMode {
            path: path.to_path_buf(),
            mode,
        });
    }
    if accessed == SystemTime::UNIX_EPOCH {
        return Err(Error::InvalidAccessTime {
            path: path.to_path_buf(),
        });
    }
    if modified == SystemTime::UNIX_EPOCH {
        return Err(Error::InvalidModifyTime {
            path: path.to_path_buf(),
        });
    }

    if is_symlink {
        let support = access
            .set_symlink_times(path, accessed, modified)
            .map_err(chtimes_failed)?;
        if support == Support::Unsupported {
            tracing::debug!(path = %path.display(), "skipped symlink timestamps");
        }
        let support = access.set_symlink_mode(path, mode).map_err(chmod_failed)?;
        if support == Support::Unsupported {
            tracing::debug!(path = %path.display(), "skipped symlink permissions");
        }
    } else {
        access
            .set_times(path, accessed, modified)
            .map_err(chtimes_failed)?;
        access.set_mode(path, mode).map_err(chmod_failed)?;
    }

    Ok(())
}

/// Apply archived ownership. Failures are logged and never returned.
pub fn restore_owner(
    access: &dyn MetadataAccess,
    path: &Path,
    uid: Option<u32>,
    gid: Option<u32>,
    is_symlink: bool,
) {
    match access.set_owner(path, uid, gid, is_symlink) {
        Ok(Support::Applied) => {}
        Ok(Support::Unsupported) => {
            tracing::debug!(path = %path.display(), "ownership unsupported on this platform");
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), ?uid, ?gid, error = %err, "failed to restore ownership");
        }
    }
}

fn chtimes_failed(err: parcel_fs::Error) -> Error {
    Error::ChtimesFailed {
        path: err.path().to_path_buf(),
        source: err.into_io(),
    }
}

fn chmod_failed(err: parcel_fs::Error) -> Error {
    Error::ChmodFailed {
        path: err.path().to_path_buf(),
        source: err.into_io(),
    }
}
