use crate::{Error, Result};
use std::path::Path;

/// Permission bits used for directories when a platform cannot report them.
pub const FALLBACK_DIR_MODE: u32 = 0o755;

/// Permission bits used for files when a platform cannot report them.
pub const FALLBACK_FILE_MODE: u32 = 0o644;

/// Apply 9-bit POSIX permission bits to a path, following symlinks.
///
/// # Platform Behavior
/// - **Unix**: Sets mode bits via `PermissionsExt::from_mode()`
/// - **Windows**: Maps the bits onto the `readonly` attribute:
///   any write bit clears it, no write bit sets it
pub fn apply_mode(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(mode);
        std::fs::set_permissions(path, perms).map_err(|e| Error::Permissions {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    #[cfg(not(unix))]
    {
        let mut perms = std::fs::metadata(path)
            .map_err(|e| Error::Permissions {
                path: path.to_path_buf(),
                source: e,
            })?
            .permissions();
        perms.set_readonly(mode & 0o222 == 0);
        std::fs::set_permissions(path, perms).map_err(|e| Error::Permissions {
            path: path.to_path_buf(),
            source: e,
        })?;
    }

    Ok(())
}

/// Extract the 9-bit permission set from platform metadata.
///
/// On Windows only the `readonly` attribute exists, so the result is one of
/// the fallback modes with the write bits cleared when it is set.
pub fn mode_from_metadata(meta: &std::fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o777
    }

    #[cfg(not(unix))]
    {
        let base = if meta.is_dir() {
            FALLBACK_DIR_MODE
        } else {
            FALLBACK_FILE_MODE
        };
        if meta.permissions().readonly() {
            base & !0o222
        } else {
            base
        }
    }
}
