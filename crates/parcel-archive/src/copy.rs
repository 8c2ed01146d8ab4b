use std::io::{ErrorKind, Read, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// Upper bound on the bytes a single copy may move.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ByteLimit {
    pub name: &'static str,
    pub max: u64,
}

impl ByteLimit {
    pub fn new(name: &'static str, max: u64) -> Self { Self { name, max } }

    /// The tighter of two optional limits.
    pub fn tighter(a: Option<Self>, b: Option<Self>) -> Option<Self> {
        match (a, b) {
            (Some(a), Some(b)) => Some(if b.max < a.max { b } else { a }),
            (a, b) => a.or(b),
        }
    }
}

/// Copy `src` into `dst` in chunks of `chunk_size` bytes and return the byte count.
///
/// Read and write failures become [`Error::ExtractCopyFailed`] for `path`.
/// Crossing `limit` stops the copy with [`Error::LimitExceeded`] before the
/// offending chunk is written.
pub fn copy_bounded<W, R>(
    dst: &mut W,
    src: &mut R,
    chunk_size: usize,
    path: &Path,
    limit: Option<ByteLimit>,
) -> Result<u64>
where
    W: Write + ?Sized,
    R: Read + ?Sized,
{
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut written: u64 = 0;

    loop {
        let n = match src.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(Error::ExtractCopyFailed {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };

        written += n as u64;
        if let Some(limit) = limit.filter(|l| written > l.max) {
            return Err(Error::LimitExceeded {
                path: path.to_path_buf(),
                limit: limit.name,
                max: limit.max,
            });
        }

        dst.write_all(&buf[..n])
            .map_err(|e| Error::ExtractCopyFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
    }

    Ok(written)
}
