use std::fs::{self, OpenOptions};
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parcel_fs::MetadataAccess;

use crate::copy::{ByteLimit, copy_bounded};
use crate::entry::{ArchiveReport, Entry, EntryKind};
use crate::error::{Error, Result};
use crate::options::CodecSettings;
use crate::restore::{restore_metadata, restore_owner};
use crate::sanitize::{normalize_path, sanitize_entry_name, sanitize_symlink_target};

/// An entry read from an archive, with its content stream for regular files.
pub(crate) struct PendingEntry<'a> {
    pub entry:   Entry,
    pub content: Option<&'a mut dyn Read>,
}

/// Format-side producer of entries in archive order.
pub(crate) trait EntrySource {
    fn for_each_entry(
        &mut self,
        visit: &mut dyn FnMut(PendingEntry<'_>) -> Result<()>,
    ) -> Result<()>;
}

/// Materializes entries under a raw root, one at a time, all-or-nothing.
pub(crate) struct Unpacker<'a> {
    /// Absolute raw root as sanitized.
    root:           PathBuf,
    /// Same root with symlinks resolved.
    canonical_root: PathBuf,
    overwrite:      bool,
    preserve_owner: bool,
    settings:       &'a CodecSettings,
    access:         &'a dyn MetadataAccess,
    now:            SystemTime,
    /// Directory metadata is applied once every child has been written.
    deferred:       Vec<(PathBuf, Entry)>,
    report:         ArchiveReport,
}

impl<'a> Unpacker<'a> {
    /// `root` must exist.
    pub fn new(
        root: &Path,
        settings: &'a CodecSettings,
        access: &'a dyn MetadataAccess,
        report: ArchiveReport,
    ) -> Result<Self> {
        let canonical_root = fs::canonicalize(root).map_err(|e| Error::Resolve {
            path: root.to_path_buf(),
            source: e,
        })?;
        Ok(Self {
            root: root.to_path_buf(),
            canonical_root,
            overwrite: false,
            preserve_owner: false,
            settings,
            access,
            now: SystemTime::now(),
            deferred: Vec::new(),
            report,
        })
    }

    pub fn overwrite(mut self, enabled: bool) -> Self {
        self.overwrite = enabled;
        self
    }

    pub fn preserve_owner(mut self, enabled: bool) -> Self {
        self.preserve_owner = enabled;
        self
    }

    pub fn unpack(mut self, source: &mut dyn EntrySource) -> Result<ArchiveReport> {
        source.for_each_entry(&mut |pending| self.unpack_entry(pending))?;
        self.finish_directories()?;
        Ok(self.report)
    }

    fn unpack_entry(&mut self, pending: PendingEntry<'_>) -> Result<()> {
        let PendingEntry { mut entry, content } = pending;
        let dest = sanitize_entry_name(&self.root, &entry.name)?;
        self.check_entry_limits(&dest, &entry)?;

        if dest == self.root {
            if entry.is_directory() {
                tracing::debug!(name = %entry.name, "skipping root directory entry");
                return Ok(());
            }
            return Err(Error::PathOutOfBound {
                root:     self.root.clone(),
                entry:    PathBuf::from(&entry.name),
                resolved: dest,
            });
        }

        match &entry.kind {
            EntryKind::Directory => {
                tracing::debug!(name = %entry.name, "extracting directory");
                self.prepare_parent(&dest)?;
                self.clear_target(&dest, &entry)?;
                if !dest.is_dir() {
                    fs::create_dir(&dest).map_err(|e| Error::CreateDirectory {
                        path: dest.clone(),
                        source: e,
                    })?;
                }
                self.report.record(&entry);
                self.deferred.push((dest, entry));
            }
            EntryKind::File => {
                tracing::debug!(name = %entry.name, size = entry.size, "extracting file");
                self.prepare_parent(&dest)?;
                self.clear_target(&dest, &entry)?;
                let written = match content {
                    Some(reader) => self.write_file(&dest, reader)?,
                    None => self.write_file(&dest, &mut std::io::empty())?,
                };
                entry.size = written;
                self.restore(&dest, &entry, self.settings.file_mode)?;
                self.report.record(&entry);
            }
            EntryKind::Symlink { target } => {
                tracing::debug!(name = %entry.name, target = %target, "extracting symlink");
                if target.is_empty() || target.contains('\0') {
                    return Err(Error::PathOutOfBound {
                        root:     self.root.clone(),
                        entry:    PathBuf::from(&entry.name),
                        resolved: dest,
                    });
                }
                sanitize_symlink_target(&self.root, &dest, target)?;
                self.prepare_parent(&dest)?;
                self.clear_target(&dest, &entry)?;
                self.check_link_on_disk(&dest, &entry.name, target)?;
                parcel_fs::create_symlink(target, &dest)?;
                self.restore(&dest, &entry, 0o777)?;
                self.report.record(&entry);
            }
        }

        Ok(())
    }

    fn check_entry_limits(&self, dest: &Path, entry: &Entry) -> Result<()> {
        let limits = &self.settings.limits;
        if let Some(max) = limits.max_entries {
            if self.report.entry_count as u64 >= max {
                return Err(limit_exceeded(dest, "entry count", max));
            }
        }
        if !entry.is_file() {
            return Ok(());
        }
        if let Some(max) = limits.max_entry_size {
            if entry.size > max {
                return Err(limit_exceeded(dest, "entry size", max));
            }
        }
        if let Some(max) = limits.max_total_size {
            if self.report.total_bytes.saturating_add(entry.size) > max {
                return Err(limit_exceeded(dest, "total size", max));
            }
        }
        Ok(())
    }

    fn write_file(&self, dest: &Path, reader: &mut dyn Read) -> Result<u64> {
        let limits = &self.settings.limits;
        let limit = ByteLimit::tighter(
            limits.max_entry_size.map(|max| ByteLimit::new("entry size", max)),
            limits.max_total_size.map(|max| {
                ByteLimit::new("total size", max.saturating_sub(self.report.total_bytes))
            }),
        );

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(dest)
            .map_err(|e| Error::CreateFile {
                path: dest.to_path_buf(),
                source: e,
            })?;
        let mut writer = BufWriter::new(file);
        let written = copy_bounded(&mut writer, reader, self.settings.chunk_size, dest, limit)?;
        writer.flush().map_err(|e| Error::ExtractCopyFailed {
            path: dest.to_path_buf(),
            source: e,
        })?;
        Ok(written)
    }

    /// Create the parent of `dest`, refusing to go through anything that
    /// already exists on disk and resolves outside the root.
    fn prepare_parent(&self, dest: &Path) -> Result<()> {
        let Some(parent) = dest.parent() else {
            return Ok(());
        };

        let mut existing = parent;
        while fs::symlink_metadata(existing).is_err() {
            match existing.parent() {
                Some(up) => existing = up,
                None => break,
            }
        }
        let resolved = fs::canonicalize(existing).map_err(|e| Error::Resolve {
            path: existing.to_path_buf(),
            source: e,
        })?;
        if !resolved.starts_with(&self.canonical_root) {
            return Err(Error::PathOutOfBound {
                root: self.root.clone(),
                entry: dest.to_path_buf(),
                resolved,
            });
        }

        fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
            path: parent.to_path_buf(),
            source: e,
        })
    }

    /// Resolve a link target through the links already on disk. Text that
    /// stays inside the root can still escape through an earlier link.
    fn check_link_on_disk(&self, dest: &Path, name: &str, target: &str) -> Result<()> {
        let base = dest.parent().unwrap_or(&self.root);
        let resolved = resolve_existing(&base.join(target))?;
        if resolved.starts_with(&self.canonical_root) {
            return Ok(());
        }
        Err(Error::PathOutOfBound {
            root: self.root.clone(),
            entry: PathBuf::from(name),
            resolved,
        })
    }

    /// Overwrite policy. An existing directory is reused for a directory
    /// entry; any other occupant is removed or reported.
    fn clear_target(&mut self, dest: &Path, entry: &Entry) -> Result<()> {
        let meta = match fs::symlink_metadata(dest) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(Error::Resolve {
                    path: dest.to_path_buf(),
                    source: e,
                });
            }
        };

        if entry.is_directory() && meta.is_dir() {
            return Ok(());
        }
        if !self.overwrite {
            return Err(Error::TargetExists {
                path: dest.to_path_buf(),
            });
        }

        tracing::debug!(path = %dest.display(), "replacing existing target");
        let removed = if meta.is_dir() {
            fs::remove_dir_all(dest)
        } else {
            fs::remove_file(dest).or_else(|e| {
                // Windows directory symlinks need remove_dir.
                if meta.file_type().is_symlink() {
                    fs::remove_dir(dest)
                } else {
                    Err(e)
                }
            })
        };
        removed.map_err(|e| Error::Remove {
            path: dest.to_path_buf(),
            source: e,
        })?;
        self.deferred.retain(|(path, _)| !path.starts_with(dest));
        Ok(())
    }

    fn restore(&self, dest: &Path, entry: &Entry, fallback_mode: u32) -> Result<()> {
        let (accessed, modified) = entry.effective_times(self.now);
        restore_metadata(
            self.access,
            dest,
            accessed,
            modified,
            entry.effective_mode(fallback_mode),
            entry.is_symlink(),
        )?;
        if self.preserve_owner {
            restore_owner(self.access, dest, entry.uid, entry.gid, entry.is_symlink());
        }
        Ok(())
    }

    fn finish_directories(&mut self) -> Result<()> {
        let mut deferred = std::mem::take(&mut self.deferred);
        deferred.sort_by_key(|(path, _)| std::cmp::Reverse(path.components().count()));
        for (path, entry) in &deferred {
            if !self.still_directory(path)? {
                tracing::debug!(path = %path.display(), "directory replaced, skipping metadata");
                continue;
            }
            self.restore(path, entry, self.settings.dir_mode)?;
        }
        Ok(())
    }

    /// Whether `path` is still a real directory under the root. Later entries
    /// may have replaced it or one of its ancestors.
    fn still_directory(&self, path: &Path) -> Result<bool> {
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.is_dir() => {}
            _ => return Ok(false),
        }
        let resolved = fs::canonicalize(path).map_err(|e| Error::Resolve {
            path: path.to_path_buf(),
            source: e,
        })?;
        if !resolved.starts_with(&self.canonical_root) {
            return Err(Error::PathOutOfBound {
                root: self.root.clone(),
                entry: path.to_path_buf(),
                resolved,
            });
        }
        Ok(true)
    }
}

/// Canonicalize the longest prefix of `path` that exists, then apply the
/// remaining components lexically.
fn resolve_existing(path: &Path) -> Result<PathBuf> {
    let components: Vec<_> = path.components().collect();
    let mut last_error = None;
    for split in (1..=components.len()).rev() {
        let prefix: PathBuf = components[..split].iter().collect();
        match fs::canonicalize(&prefix) {
            Ok(mut resolved) => {
                resolved.extend(&components[split..]);
                return Ok(normalize_path(&resolved));
            }
            Err(e) => last_error = Some(e),
        }
    }
    Err(Error::Resolve {
        path: path.to_path_buf(),
        source: last_error.unwrap_or_else(|| ErrorKind::NotFound.into()),
    })
}

fn limit_exceeded(path: &Path, limit: &'static str, max: u64) -> Error {
    Error::LimitExceeded {
        path: path.to_path_buf(),
        limit,
        max,
    }
}
