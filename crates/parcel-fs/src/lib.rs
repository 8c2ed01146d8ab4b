//! Filesystem metadata capability for the parcel archive codec.
//!
//! Wraps the per-platform primitives (timestamps, permission bits, ownership,
//! symlink creation) behind [`MetadataAccess`], so callers never scatter
//! `cfg` blocks through their own logic. Writes that a platform cannot
//! perform on a symlink itself report [`Support::Unsupported`].

mod error;
mod metadata;
mod permissions;
mod symlink;

pub use error::{Error, Result};
pub use metadata::{FileStat, MetadataAccess, NativeMetadata, NodeKind, Support};
pub use permissions::{FALLBACK_DIR_MODE, FALLBACK_FILE_MODE, apply_mode, mode_from_metadata};
pub use symlink::create_symlink;
