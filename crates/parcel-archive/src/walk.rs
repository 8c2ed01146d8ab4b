use std::fs::{File, FileType};
use std::io::Read;
use std::path::{Path, PathBuf};

use parcel_fs::{FileStat, MetadataAccess, NodeKind};
use walkdir::WalkDir;

use crate::entry::{ArchiveReport, Entry, EntryKind};
use crate::error::{Error, Result};
use crate::sanitize::{entry_name, eval_symlink, relative_link_target, sanitize_symlink_target};

/// Format-side consumer of the entries produced by a tree walk.
pub(crate) trait EntrySink {
    fn append_directory(&mut self, entry: &Entry) -> Result<()>;

    fn append_file(&mut self, entry: &Entry, content: &mut dyn Read) -> Result<()>;

    fn append_symlink(&mut self, entry: &Entry) -> Result<()>;
}

/// Walks a raw root in file-name order and feeds every object to an [`EntrySink`].
pub(crate) struct TreeWalker<'a> {
    /// Canonical raw root.
    root:      PathBuf,
    follow:    bool,
    max_depth: usize,
    /// Canonical archive path, never added to itself.
    skip:      Option<PathBuf>,
    access:    &'a dyn MetadataAccess,
}

impl<'a> TreeWalker<'a> {
    pub fn new(root: impl Into<PathBuf>, access: &'a dyn MetadataAccess) -> Self {
        Self {
            root: root.into(),
            follow: false,
            max_depth: 32,
            skip: None,
            access,
        }
    }

    pub fn follow_symlinks(mut self, follow: bool, max_depth: usize) -> Self {
        self.follow = follow;
        self.max_depth = max_depth;
        self
    }

    pub fn skip(mut self, path: Option<PathBuf>) -> Self {
        self.skip = path;
        self
    }

    pub fn walk(&self, sink: &mut dyn EntrySink, report: &mut ArchiveReport) -> Result<()> {
        let mut followed = Vec::new();
        self.walk_dir(&self.root, "", &mut followed, sink, report)
    }

    /// `followed` holds the parent directory of every symlink currently being
    /// followed. Entering a directory that contains any of them is a cycle.
    fn walk_dir(
        &self,
        dir: &Path,
        prefix: &str,
        followed: &mut Vec<PathBuf>,
        sink: &mut dyn EntrySink,
        report: &mut ArchiveReport,
    ) -> Result<()> {
        for item in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
            let item = item.map_err(|e| {
                let path = e.path().unwrap_or(dir).to_path_buf();
                Error::Walk { path, source: e }
            })?;
            let path = item.path();

            if self.skip.as_deref() == Some(path) {
                tracing::debug!(path = %path.display(), "skipping the archive itself");
                continue;
            }

            let name = join_name(prefix, &entry_name(dir, path)?);
            let stat = self.access.stat(path)?;

            match stat.kind {
                NodeKind::Directory => {
                    emit_directory(Entry::from_stat(name, EntryKind::Directory, &stat), sink, report)?;
                }
                NodeKind::File => {
                    emit_file(path, Entry::from_stat(name, EntryKind::File, &stat), sink, report)?;
                }
                NodeKind::Symlink if self.follow => {
                    self.follow_link(path, &name, followed, sink, report)?;
                }
                NodeKind::Symlink => {
                    let entry = self.symlink_entry(path, name, &stat)?;
                    tracing::debug!(name = %entry.name, target = ?entry.symlink_target(), "adding symlink");
                    sink.append_symlink(&entry)?;
                    report.record(&entry);
                }
                NodeKind::Other => {
                    return Err(Error::UnsupportedFileType {
                        path: path.to_path_buf(),
                        kind: describe(item.file_type()),
                    });
                }
            }
        }

        Ok(())
    }

    fn follow_link(
        &self,
        link: &Path,
        name: &str,
        followed: &mut Vec<PathBuf>,
        sink: &mut dyn EntrySink,
        report: &mut ArchiveReport,
    ) -> Result<()> {
        let target = eval_symlink(&self.root, link)?;
        if self.skip.as_deref() == Some(target.as_path()) {
            tracing::debug!(link = %link.display(), "skipping link to the archive itself");
            return Ok(());
        }

        let stat = self.access.stat(&target)?;
        match stat.kind {
            NodeKind::File => {
                emit_file(&target, Entry::from_stat(name, EntryKind::File, &stat), sink, report)
            }
            NodeKind::Directory => {
                let parent = link.parent().unwrap_or(link).to_path_buf();
                if parent.starts_with(&target) || followed.iter().any(|p| p.starts_with(&target)) {
                    return Err(Error::SymlinkCycle {
                        path: link.to_path_buf(),
                        target,
                    });
                }
                if followed.len() >= self.max_depth {
                    return Err(Error::LimitExceeded {
                        path:  link.to_path_buf(),
                        limit: "symlink depth",
                        max:   self.max_depth as u64,
                    });
                }

                emit_directory(Entry::from_stat(name, EntryKind::Directory, &stat), sink, report)?;

                followed.push(parent);
                let result = self.walk_dir(&target, name, followed, sink, report);
                followed.pop();
                result
            }
            _ => Err(Error::UnsupportedFileType {
                path: target,
                kind: "special file".to_string(),
            }),
        }
    }

    /// Keep a relative target that stays inside the root as written; rewrite
    /// anything else relative to the link's own entry name.
    fn symlink_entry(&self, link: &Path, name: String, stat: &FileStat) -> Result<Entry> {
        let resolved = eval_symlink(&self.root, link)?;
        let raw = std::fs::read_link(link).map_err(|e| Error::ReadLink {
            path: link.to_path_buf(),
            source: e,
        })?;

        let text = raw.to_string_lossy();
        let text = if cfg!(windows) {
            text.replace('\\', "/")
        } else {
            text.into_owned()
        };

        let target = if raw.is_relative() && sanitize_symlink_target(&self.root, link, &text).is_ok() {
            text
        } else {
            let relative = resolved.strip_prefix(&self.root).unwrap_or(Path::new(""));
            relative_link_target(&name, relative)
        };

        Ok(Entry::from_stat(name, EntryKind::Symlink { target }, stat))
    }
}

fn emit_directory(entry: Entry, sink: &mut dyn EntrySink, report: &mut ArchiveReport) -> Result<()> {
    tracing::debug!(name = %entry.name, "adding directory");
    sink.append_directory(&entry)?;
    report.record(&entry);
    Ok(())
}

fn emit_file(
    path: &Path,
    entry: Entry,
    sink: &mut dyn EntrySink,
    report: &mut ArchiveReport,
) -> Result<()> {
    let mut file = File::open(path).map_err(|e| Error::Open {
        path: path.to_path_buf(),
        source: e,
    })?;
    tracing::debug!(name = %entry.name, size = entry.size, "adding file");
    sink.append_file(&entry, &mut file)?;
    report.record(&entry);
    Ok(())
}

fn join_name(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}/{name}")
    }
}

#[cfg(unix)]
fn describe(file_type: FileType) -> String {
    use std::os::unix::fs::FileTypeExt;

    let kind = if file_type.is_socket() {
        "socket"
    } else if file_type.is_fifo() {
        "named pipe"
    } else if file_type.is_block_device() {
        "block device"
    } else if file_type.is_char_device() {
        "character device"
    } else {
        "special file"
    };
    kind.to_string()
}

#[cfg(not(unix))]
fn describe(_file_type: FileType) -> String { "special file".to_string() }
