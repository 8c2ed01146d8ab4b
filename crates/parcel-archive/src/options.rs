use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default chunk size used when streaming entry content.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Per-entry compression method, honored by the zip format only.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Store,
    Deflate,
}

impl Compression {
    /// Method number as written into zip headers.
    pub fn method_id(self) -> u16 {
        match self {
            Self::Store => 0,
            Self::Deflate => 8,
        }
    }
}

/// Resource limits applied while extracting untrusted archives.
///
/// `None` means unlimited.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    pub max_entries: Option<u64>,
    pub max_entry_size: Option<u64>,
    pub max_total_size: Option<u64>,
}

impl Limits {
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = Some(n);
        self
    }

    pub fn max_entry_size(mut self, bytes: u64) -> Self {
        self.max_entry_size = Some(bytes);
        self
    }

    pub fn max_total_size(mut self, bytes: u64) -> Self {
        self.max_total_size = Some(bytes);
        self
    }
}

/// Codec-wide defaults that are not tied to a particular archive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecSettings {
    /// Mode used for files whose own mode is missing or out of range, both
    /// when writing headers and when extracting.
    pub file_mode: u32,
    /// Same as `file_mode`, for directories.
    pub dir_mode: u32,
    pub chunk_size: usize,
    /// How many symlinked directories may be nested while following links.
    pub max_symlink_depth: usize,
    pub limits: Limits,
}

impl Default for CodecSettings {
    fn default() -> Self {
        Self {
            file_mode: 0o644,
            dir_mode: 0o755,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_symlink_depth: 32,
            limits: Limits::default(),
        }
    }
}

/// Inputs of a single compress or extract operation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveOptions {
    pub archive: PathBuf,
    pub raw: PathBuf,
    /// Create the raw directory on extraction when it is missing.
    pub create_directory: bool,
    /// Replace existing archives and conflicting extracted entries.
    pub overwrite: bool,
    /// Skip the canonical extension check on the archive path.
    pub relief_extension: bool,
    /// Archive what symlinks point to instead of the links themselves.
    pub follow_symlink: bool,
    pub compression: Compression,
    /// Restore uid/gid from the archive on a best-effort basis.
    pub preserve_owner: bool,
    pub settings: CodecSettings,
}

impl ArchiveOptions {
    pub fn new(archive: impl Into<PathBuf>, raw: impl Into<PathBuf>) -> Self {
        Self {
            archive: archive.into(),
            raw: raw.into(),
            ..Self::default()
        }
    }

    pub fn create_directory(mut self, enabled: bool) -> Self {
        self.create_directory = enabled;
        self
    }

    pub fn overwrite(mut self, enabled: bool) -> Self {
        self.overwrite = enabled;
        self
    }

    pub fn relief_extension(mut self, enabled: bool) -> Self {
        self.relief_extension = enabled;
        self
    }

    pub fn follow_symlink(mut self, enabled: bool) -> Self {
        self.follow_symlink = enabled;
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn preserve_owner(mut self, enabled: bool) -> Self {
        self.preserve_owner = enabled;
        self
    }

    pub fn settings(mut self, settings: CodecSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.settings.limits = limits;
        self
    }
}
