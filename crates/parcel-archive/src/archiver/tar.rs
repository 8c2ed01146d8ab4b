use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use flate2::Compression as GzLevel;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tar::{EntryType, Header};

use super::{Archiver, Job, SanitizedPaths, SharedMetadata};
use crate::entry::{ArchiveReport, Entry, EntryKind};
use crate::error::{Error, Result};
use crate::format::ArchiveFormat;
use crate::options::{ArchiveOptions, CodecSettings};
use crate::unpack::{EntrySource, PendingEntry};
use crate::walk::EntrySink;

/// gzip-compressed tar streams.
///
/// Symlink targets travel in the header's link-name field. Both timestamps
/// are kept; the access time is written to the GNU header extension.
pub struct TarGzArchiver {
    job: Job,
}

impl TarGzArchiver {
    pub fn new(options: ArchiveOptions) -> Self { Self { job: Job::new(options) } }

    pub fn with_metadata(mut self, access: SharedMetadata) -> Self {
        self.job.access = access;
        self
    }

    pub fn options(&self) -> &ArchiveOptions { &self.job.options }

    /// Paths stored by the last sanitize step.
    pub fn sanitized(&self) -> Option<&SanitizedPaths> { self.job.paths.as_ref() }
}

impl Archiver for TarGzArchiver {
    fn format(&self) -> ArchiveFormat { ArchiveFormat::TarGz }

    fn sanitize(&mut self) -> Result<()> {
        self.job.sanitize(ArchiveFormat::TarGz, false)?;
        Ok(())
    }

    fn compress(&mut self) -> Result<ArchiveReport> {
        let settings = self.job.options.settings;
        self.job.compress(
            ArchiveFormat::TarGz,
            |file, archive| Ok(TarSink::new(file, archive, settings)),
            TarSink::finish,
        )
    }

    fn extract(&mut self) -> Result<ArchiveReport> {
        self.job
            .extract(ArchiveFormat::TarGz, |file, archive| Ok(TarSource::new(file, archive)))
    }
}

struct TarSink {
    builder:  tar::Builder<GzEncoder<BufWriter<File>>>,
    archive:  PathBuf,
    settings: CodecSettings,
}

impl TarSink {
    fn new(file: File, archive: &Path, settings: CodecSettings) -> Self {
        let encoder = GzEncoder::new(BufWriter::new(file), GzLevel::default());
        Self {
            builder: tar::Builder::new(encoder),
            archive: archive.to_path_buf(),
            settings,
        }
    }

    /// Close the tar stream, then the gzip stream, then the file.
    fn finish(self) -> Result<()> {
        let archive = self.archive;
        let encoder = self.builder.into_inner().map_err(|e| tar_error(&archive, e))?;
        let mut writer = encoder.finish().map_err(|e| tar_error(&archive, e))?;
        writer.flush().map_err(|e| tar_error(&archive, e))?;
        let file = writer
            .into_inner()
            .map_err(|e| tar_error(&archive, e.into_error()))?;
        file.sync_all().map_err(|e| tar_error(&archive, e))
    }

    /// `fallback` is the mode written when the entry has none in range.
    fn header(entry: &Entry, entry_type: EntryType, size: u64, fallback: u32) -> Header {
        let mut header = Header::new_gnu();
        header.set_entry_type(entry_type);
        header.set_size(size);
        header.set_mode(entry.effective_mode(fallback));
        header.set_mtime(unix_secs(entry.modified));
        header.set_uid(entry.uid.unwrap_or(0).into());
        header.set_gid(entry.gid.unwrap_or(0).into());
        if let Some(gnu) = header.as_gnu_mut() {
            gnu.set_atime(unix_secs(entry.accessed));
        }
        header
    }
}

impl EntrySink for TarSink {
    fn append_directory(&mut self, entry: &Entry) -> Result<()> {
        let mut header = Self::header(entry, EntryType::Directory, 0, self.settings.dir_mode);
        self.builder
            .append_data(&mut header, format!("{}/", entry.name), io::empty())
            .map_err(|e| tar_error(&self.archive, e))
    }

    fn append_file(&mut self, entry: &Entry, content: &mut dyn Read) -> Result<()> {
        let mut header = Self::header(entry, EntryType::Regular, entry.size, self.settings.file_mode);
        let body = ExactReader {
            inner:     content,
            remaining: entry.size,
        };
        self.builder
            .append_data(&mut header, &entry.name, body)
            .map_err(|e| tar_error(&self.archive, e))
    }

    fn append_symlink(&mut self, entry: &Entry) -> Result<()> {
        let target = entry.symlink_target().unwrap_or_default();
        let mut header = Self::header(entry, EntryType::Symlink, 0, 0o777);
        self.builder
            .append_link(&mut header, &entry.name, target)
            .map_err(|e| tar_error(&self.archive, e))
    }
}

/// Yields exactly `remaining` bytes. A source that ends early is an error,
/// since the header already promised the full size.
struct ExactReader<'a> {
    inner:     &'a mut dyn Read,
    remaining: u64,
}

impl Read for ExactReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let max = usize::try_from(self.remaining).map_or(buf.len(), |left| left.min(buf.len()));
        let read = self.inner.read(&mut buf[..max])?;
        if read == 0 && max > 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("content ended {} bytes short of its header size", self.remaining),
            ));
        }
        self.remaining -= read as u64;
        Ok(read)
    }
}

struct TarSource {
    archive: tar::Archive<GzDecoder<BufReader<File>>>,
    path:    PathBuf,
}

impl TarSource {
    fn new(file: File, path: &Path) -> Self {
        Self {
            archive: tar::Archive::new(GzDecoder::new(BufReader::new(file))),
            path:    path.to_path_buf(),
        }
    }

    /// `link` is the resolved link name, which may come from a GNU long-link record.
    fn describe(header: &Header, name: String, link: Option<String>) -> Result<Entry> {
        let path = &name;
        let kind = match header.entry_type() {
            EntryType::Directory => EntryKind::Directory,
            EntryType::Regular | EntryType::Continuous => EntryKind::File,
            EntryType::Symlink => EntryKind::Symlink {
                target: link.unwrap_or_default(),
            },
            other => {
                return Err(Error::UnsupportedFileType {
                    path: PathBuf::from(path),
                    kind: format!("tar entry type {other:?}"),
                });
            }
        };

        let invalid = |e: io::Error| Error::Tar {
            path: PathBuf::from(path),
            source: e,
        };
        let size = if matches!(kind, EntryKind::File) {
            header.entry_size().map_err(invalid)?
        } else {
            0
        };
        let mode = header.mode().map_err(invalid)?;
        let modified = header.mtime().map_err(invalid)?;
        let accessed = header
            .as_gnu()
            .and_then(|gnu| gnu.atime().ok())
            .filter(|&secs| secs != 0)
            .unwrap_or(modified);

        let mut entry = Entry::new(name, kind);
        entry.size = size;
        entry.mode = Some(mode);
        entry.modified = from_unix_secs(modified);
        entry.accessed = from_unix_secs(accessed);
        entry.uid = header.uid().ok().and_then(|id| u32::try_from(id).ok());
        entry.gid = header.gid().ok().and_then(|id| u32::try_from(id).ok());
        Ok(entry)
    }
}

impl EntrySource for TarSource {
    fn for_each_entry(
        &mut self,
        visit: &mut dyn FnMut(PendingEntry<'_>) -> Result<()>,
    ) -> Result<()> {
        let archive_path = &self.path;
        let entries = self
            .archive
            .entries()
            .map_err(|e| tar_error(archive_path, e))?;

        for item in entries {
            let mut item = item.map_err(|e| tar_error(archive_path, e))?;
            let name = entry_name(&item.path_bytes());
            let link = item
                .link_name_bytes()
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
            let entry = Self::describe(item.header(), name, link)?;

            let content: Option<&mut dyn Read> = if entry.is_file() {
                Some(&mut item)
            } else {
                None
            };
            visit(PendingEntry { entry, content })?;
        }

        Ok(())
    }
}

/// Drop trailing separators but keep a lone `/` so it is still seen as rooted.
fn entry_name(bytes: &[u8]) -> String {
    let name = String::from_utf8_lossy(bytes);
    let trimmed = name.trim_end_matches('/');
    if trimmed.is_empty() {
        name.into_owned()
    } else {
        trimmed.to_string()
    }
}

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn from_unix_secs(secs: u64) -> SystemTime { SystemTime::UNIX_EPOCH + Duration::from_secs(secs) }

fn tar_error(path: &Path, source: io::Error) -> Error {
    Error::Tar {
        path: path.to_path_buf(),
        source,
    }
}
