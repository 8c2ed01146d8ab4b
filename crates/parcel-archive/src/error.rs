use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("path is empty")]
    PathEmpty,

    #[error("archive path '{path}' does not end with '{extension}'")]
    ExtensionMissing { path: PathBuf, extension: String },

    #[error("directory '{path}' does not exist")]
    DirectoryMissing { path: PathBuf },

    #[error("'{path}' exists but is not a directory")]
    DirectoryInvalid { path: PathBuf },

    #[error("'{path}' is not a directory")]
    NotDirectory { path: PathBuf },

    #[error("'{path}' does not exist")]
    Missing { path: PathBuf },

    #[error("entry '{entry}' resolves to '{resolved}' outside of '{root}'")]
    PathOutOfBound {
        root: PathBuf,
        entry: PathBuf,
        resolved: PathBuf,
    },

    #[error("symlink '{path}' leads back into '{target}'")]
    SymlinkCycle { path: PathBuf, target: PathBuf },

    #[error("'{path}' already exists")]
    TargetExists { path: PathBuf },

    #[error("cannot tell the archive format of '{path}'")]
    UnsupportedFormat { path: PathBuf },

    #[error("unsupported file type {kind} at '{path}'")]
    UnsupportedFileType { path: PathBuf, kind: String },

    #[error("invalid permission bits {mode:#o} for '{path}'")]
    InvalidMode { path: PathBuf, mode: u32 },

    #[error("invalid access time for '{path}'")]
    InvalidAccessTime { path: PathBuf },

    #[error("invalid modify time for '{path}'")]
    InvalidModifyTime { path: PathBuf },

    #[error("failed to copy content into '{path}': {source}")]
    ExtractCopyFailed { path: PathBuf, source: io::Error },

    #[error("failed to set timestamps on '{path}': {source}")]
    ChtimesFailed { path: PathBuf, source: io::Error },

    #[error("failed to set permissions on '{path}': {source}")]
    ChmodFailed { path: PathBuf, source: io::Error },

    #[error("failed to create directory '{path}': {source}")]
    CreateDirectory { path: PathBuf, source: io::Error },

    #[error("failed to create file '{path}': {source}")]
    CreateFile { path: PathBuf, source: io::Error },

    #[error("failed to open '{path}': {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("failed to remove '{path}': {source}")]
    Remove { path: PathBuf, source: io::Error },

    #[error("failed to resolve '{path}': {source}")]
    Resolve { path: PathBuf, source: io::Error },

    #[error("failed to resolve symlink '{path}': {source}")]
    ReadLink { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Fs(#[from] parcel_fs::Error),

    #[error("failed to walk '{path}': {source}")]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },

    #[error("tar stream error at '{path}': {source}")]
    Tar { path: PathBuf, source: io::Error },

    #[cfg(feature = "zip")]
    #[error("zip container error at '{path}': {source}")]
    Zip {
        path: PathBuf,
        source: zip::result::ZipError,
    },

    #[error("{limit} limit of {max} exceeded at '{path}'")]
    LimitExceeded {
        path: PathBuf,
        limit: &'static str,
        max: u64,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
