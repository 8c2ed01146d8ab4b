use std::time::SystemTime;

use parcel_fs::FileStat;

use crate::format::ArchiveFormat;

const TYPE_BITS: u32 = 0o170000;

/// One filesystem object inside an archive, independent of the format's header layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    /// Root-relative, `/`-separated, without a trailing separator.
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    /// Raw mode as stored, possibly with file-type bits. `None` when the
    /// format carried no permissions.
    pub mode: Option<u32>,
    /// `UNIX_EPOCH` when the format carried no value.
    pub accessed: SystemTime,
    pub modified: SystemTime,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
    Symlink { target: String },
}

impl Entry {
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
            size: 0,
            mode: None,
            accessed: SystemTime::UNIX_EPOCH,
            modified: SystemTime::UNIX_EPOCH,
            uid: None,
            gid: None,
        }
    }

    /// Build an entry from on-disk metadata. Symlink entries carry no size.
    pub fn from_stat(name: impl Into<String>, kind: EntryKind, stat: &FileStat) -> Self {
        let size = match kind {
            EntryKind::File => stat.len,
            _ => 0,
        };
        Self {
            name: name.into(),
            kind,
            size,
            mode: Some(stat.mode),
            accessed: stat.accessed,
            modified: stat.modified,
            uid: stat.uid,
            gid: stat.gid,
        }
    }

    pub fn is_file(&self) -> bool { matches!(self.kind, EntryKind::File) }

    pub fn is_directory(&self) -> bool { matches!(self.kind, EntryKind::Directory) }

    pub fn is_symlink(&self) -> bool { matches!(self.kind, EntryKind::Symlink { .. }) }

    pub fn symlink_target(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::Symlink { target } => Some(target),
            _ => None,
        }
    }

    /// Permission bits to restore, or `fallback` when the mode is absent or out of range.
    pub fn effective_mode(&self, fallback: u32) -> u32 {
        self.mode.map_or(fallback, |mode| normalize_mode(mode, fallback))
    }

    /// Access and modify times to restore, with zero values replaced by `now`.
    pub fn effective_times(&self, now: SystemTime) -> (SystemTime, SystemTime) {
        let pick = |t: SystemTime| if t == SystemTime::UNIX_EPOCH { now } else { t };
        (pick(self.accessed), pick(self.modified))
    }
}

/// Strip file-type bits, then fall back when anything beyond `0o777` remains.
pub fn normalize_mode(raw: u32, fallback: u32) -> u32 {
    let mode = raw & !TYPE_BITS;
    if mode > 0o777 { fallback } else { mode }
}

/// Summary of a finished compress or extract call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ArchiveReport {
    pub format: ArchiveFormat,
    pub entry_count: usize,
    /// Sum of regular-file content sizes.
    pub total_bytes: u64,
}

impl ArchiveReport {
    pub(crate) fn new(format: ArchiveFormat) -> Self {
        Self {
            format,
            entry_count: 0,
            total_bytes: 0,
        }
    }

    pub(crate) fn record(&mut self, entry: &Entry) {
        self.entry_count += 1;
        if entry.is_file() {
            self.total_bytes += entry.size;
        }
    }
}
