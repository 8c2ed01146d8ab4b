//! tar.gz and zip codec for whole directory trees.
//!
//! # Architecture
//!
//! - `sanitize.rs` - Archive, raw and entry path validation (zip-slip prevention)
//! - `copy.rs` - Chunked, bounded content copy
//! - `restore.rs` - Timestamp, permission and ownership restoration
//! - `walk.rs` - Raw tree walk feeding a format writer
//! - `unpack.rs` - Entry materialization shared by every format reader
//! - `archiver/` - Compress and extract drivers plus per-format implementations
//!
//! Every entry name read from an archive is re-validated against the raw
//! root, even for archives this crate produced.

pub use archiver::{ArchiveCodec, Archiver, SanitizedPaths, SharedMetadata, codec_for, codec_for_path};
#[cfg(feature = "tar")]
pub use archiver::TarGzArchiver;
#[cfg(feature = "zip")]
pub use archiver::ZipArchiver;
pub use copy::{ByteLimit, copy_bounded};
pub use entry::{ArchiveReport, Entry, EntryKind, normalize_mode};
pub use error::{Error, Result};
pub use format::ArchiveFormat;
pub use options::{ArchiveOptions, CodecSettings, Compression, DEFAULT_CHUNK_SIZE, Limits};
pub use restore::{restore_metadata, restore_owner};
pub use sanitize::{
    entry_name, eval_symlink, relative_link_target, sanitize_archive_path, sanitize_entry_name,
    sanitize_entry_path, sanitize_raw_path, sanitize_symlink_target,
};

pub use parcel_fs::{MetadataAccess, NativeMetadata, Support};

mod archiver;
mod copy;
pub mod entry;
mod error;
mod format;
pub mod options;
mod restore;
mod sanitize;
mod unpack;
mod walk;
