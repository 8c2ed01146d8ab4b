use std::path::Path;
use std::time::SystemTime;

use filetime::FileTime;

use crate::permissions::{apply_mode, mode_from_metadata};
use crate::{Error, Result};

/// Outcome of a metadata write that some platforms cannot perform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Support {
    Applied,
    Unsupported,
}

impl Support {
    pub fn is_applied(self) -> bool { matches!(self, Self::Applied) }
}

/// Type of a filesystem node, as seen without following symlinks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
    Symlink,
    /// Sockets, FIFOs, block and character devices.
    Other,
}

/// Metadata of a single filesystem node.
#[derive(Clone, Debug)]
pub struct FileStat {
    pub kind:     NodeKind,
    pub len:      u64,
    /// Permission bits only, `0..=0o777`.
    pub mode:     u32,
    pub accessed: SystemTime,
    pub modified: SystemTime,
    pub uid:      Option<u32>,
    pub gid:      Option<u32>,
}

impl FileStat {
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        let file_type = meta.file_type();
        let kind = if file_type.is_symlink() {
            NodeKind::Symlink
        } else if file_type.is_dir() {
            NodeKind::Directory
        } else if file_type.is_file() {
            NodeKind::File
        } else {
            NodeKind::Other
        };

        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let accessed = meta.accessed().unwrap_or(modified);

        #[cfg(unix)]
        let (uid, gid) = {
            use std::os::unix::fs::MetadataExt;
            (Some(meta.uid()), Some(meta.gid()))
        };
        #[cfg(not(unix))]
        let (uid, gid) = (None, None);

        Self {
            kind,
            len: meta.len(),
            mode: mode_from_metadata(meta),
            accessed,
            modified,
            uid,
            gid,
        }
    }
}

/// Read and write access to timestamps, permission bits and ownership.
///
/// Symlink-specific writes return [`Support::Unsupported`] on platforms that
/// cannot address a link separately from its target; they never silently act
/// on the target instead.
pub trait MetadataAccess {
    /// Stat a path without following a final symlink.
    fn stat(&self, path: &Path) -> Result<FileStat>;

    fn set_times(&self, path: &Path, accessed: SystemTime, modified: SystemTime) -> Result<()>;

    fn set_symlink_times(
        &self,
        path: &Path,
        accessed: SystemTime,
        modified: SystemTime,
    ) -> Result<Support>;

    fn set_mode(&self, path: &Path, mode: u32) -> Result<()>;

    fn set_symlink_mode(&self, path: &Path, mode: u32) -> Result<Support>;

    fn set_owner(
        &self,
        path: &Path,
        uid: Option<u32>,
        gid: Option<u32>,
        is_symlink: bool,
    ) -> Result<Support>;
}

/// [`MetadataAccess`] backed by the host operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct NativeMetadata;

impl MetadataAccess for NativeMetadata {
    fn stat(&self, path: &Path) -> Result<FileStat> {
        let meta = std::fs::symlink_metadata(path).map_err(|e| Error::Stat {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(FileStat::from_metadata(&meta))
    }

    fn set_times(&self, path: &Path, accessed: SystemTime, modified: SystemTime) -> Result<()> {
        filetime::set_file_times(
            path,
            FileTime::from_system_time(accessed),
            FileTime::from_system_time(modified),
        )
        .map_err(|e| Error::Times {
            path: path.to_path_buf(),
            source: e,
        })
    }

    fn set_symlink_times(
        &self,
        path: &Path,
        accessed: SystemTime,
        modified: SystemTime,
    ) -> Result<Support> {
        match filetime::set_symlink_file_times(
            path,
            FileTime::from_system_time(accessed),
            FileTime::from_system_time(modified),
        ) {
            Ok(()) => Ok(Support::Applied),
            Err(e) if e.kind() == std::io::ErrorKind::Unsupported => {
                tracing::debug!(path = %path.display(), "symlink timestamps unsupported");
                Ok(Support::Unsupported)
            }
            Err(e) => Err(Error::Times {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    fn set_mode(&self, path: &Path, mode: u32) -> Result<()> { apply_mode(path, mode) }

    // No supported platform offers a portable lchmod; chmod would follow the
    // link and rewrite the target's bits.
    fn set_symlink_mode(&self, _path: &Path, _mode: u32) -> Result<Support> {
        Ok(Support::Unsupported)
    }

    fn set_owner(
        &self,
        path: &Path,
        uid: Option<u32>,
        gid: Option<u32>,
        is_symlink: bool,
    ) -> Result<Support> {
        #[cfg(unix)]
        {
            if uid.is_none() && gid.is_none() {
                return Ok(Support::Applied);
            }
            let result = if is_symlink {
                std::os::unix::fs::lchown(path, uid, gid)
            } else {
                nix::unistd::chown(
                    path,
                    uid.map(nix::unistd::Uid::from_raw),
                    gid.map(nix::unistd::Gid::from_raw),
                )
                .map_err(std::io::Error::from)
            };
            result.map_err(|e| Error::Owner {
                path: path.to_path_buf(),
                source: e,
            })?;
            Ok(Support::Applied)
        }

        #[cfg(not(unix))]
        {
            let _ = (path, uid, gid, is_symlink);
            Ok(Support::Unsupported)
        }
    }
}
