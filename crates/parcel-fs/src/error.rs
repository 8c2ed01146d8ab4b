use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read metadata of '{path}': {source}")]
    Stat { path: PathBuf, source: io::Error },

    #[error("failed to set timestamps on '{path}': {source}")]
    Times { path: PathBuf, source: io::Error },

    #[error("failed to set permissions on '{path}': {source}")]
    Permissions { path: PathBuf, source: io::Error },

    #[error("failed to change owner of '{path}': {source}")]
    Owner { path: PathBuf, source: io::Error },

    #[error("failed to create symlink '{link}' -> '{target}': {source}")]
    Symlink {
        target: PathBuf,
        link:   PathBuf,
        source: io::Error,
    },
}

impl Error {
    /// The path the failing primitive was applied to.
    pub fn path(&self) -> &std::path::Path {
        match self {
            Self::Stat { path, .. }
            | Self::Times { path, .. }
            | Self::Permissions { path, .. }
            | Self::Owner { path, .. } => path,
            Self::Symlink { link, .. } => link,
        }
    }

    /// Unwrap the underlying I/O cause.
    pub fn into_io(self) -> io::Error {
        match self {
            Self::Stat { source, .. }
            | Self::Times { source, .. }
            | Self::Permissions { source, .. }
            | Self::Owner { source, .. }
            | Self::Symlink { source, .. } => source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
