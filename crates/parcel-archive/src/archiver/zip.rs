use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{Archiver, Job, SanitizedPaths, SharedMetadata};
use crate::copy::{ByteLimit, copy_bounded};
use crate::entry::{ArchiveReport, Entry, EntryKind};
use crate::error::{Error, Result};
use crate::format::ArchiveFormat;
use crate::options::{ArchiveOptions, CodecSettings, Compression};
use crate::unpack::{EntrySource, PendingEntry};
use crate::walk::EntrySink;

const TYPE_MASK: u32 = 0o170000;
const TYPE_FILE: u32 = 0o100000;
const TYPE_DIR: u32 = 0o040000;
const TYPE_SYMLINK: u32 = 0o120000;

const DOS_FIRST_YEAR: u16 = 1980;
const DOS_LAST_YEAR: u16 = 2107;

/// Longest symlink target accepted from an entry body.
const MAX_LINK_TARGET: u64 = 4096;

/// zip containers with per-entry store or deflate compression.
///
/// Symlink targets travel as the entry body. Timestamps are DOS times: two
/// second resolution, no access time, read and written as UTC.
pub struct ZipArchiver {
    job: Job,
}

impl ZipArchiver {
    pub fn new(options: ArchiveOptions) -> Self { Self { job: Job::new(options) } }

    pub fn with_metadata(mut self, access: SharedMetadata) -> Self {
        self.job.access = access;
        self
    }

    pub fn options(&self) -> &ArchiveOptions { &self.job.options }

    /// Paths stored by the last sanitize step.
    pub fn sanitized(&self) -> Option<&SanitizedPaths> { self.job.paths.as_ref() }
}

impl Archiver for ZipArchiver {
    fn format(&self) -> ArchiveFormat { ArchiveFormat::Zip }

    fn sanitize(&mut self) -> Result<()> {
        self.job.sanitize(ArchiveFormat::Zip, false)?;
        Ok(())
    }

    fn compress(&mut self) -> Result<ArchiveReport> {
        let method = compression_method(self.job.options.compression);
        let settings = self.job.options.settings;
        self.job.compress(
            ArchiveFormat::Zip,
            |file, archive| Ok(ZipSink::new(file, archive, method, settings)),
            ZipSink::finish,
        )
    }

    fn extract(&mut self) -> Result<ArchiveReport> {
        let chunk_size = self.job.options.settings.chunk_size;
        self.job.extract(ArchiveFormat::Zip, |file, archive| {
            ZipSource::new(file, archive, chunk_size)
        })
    }
}

fn compression_method(compression: Compression) -> CompressionMethod {
    match compression {
        Compression::Store => CompressionMethod::Stored,
        Compression::Deflate => CompressionMethod::Deflated,
    }
}

struct ZipSink {
    writer:   ZipWriter<BufWriter<File>>,
    archive:  PathBuf,
    method:   CompressionMethod,
    settings: CodecSettings,
}

impl ZipSink {
    fn new(file: File, archive: &Path, method: CompressionMethod, settings: CodecSettings) -> Self {
        Self {
            writer: ZipWriter::new(BufWriter::new(file)),
            archive: archive.to_path_buf(),
            method,
            settings,
        }
    }

    /// Write the central directory, then close the file.
    fn finish(self) -> Result<()> {
        let archive = self.archive;
        let mut writer = self.writer.finish().map_err(|e| zip_error(&archive, e))?;
        writer.flush().map_err(|e| zip_error(&archive, e.into()))?;
        let file = writer
            .into_inner()
            .map_err(|e| zip_error(&archive, e.into_error().into()))?;
        file.sync_all().map_err(|e| zip_error(&archive, e.into()))
    }

    fn options(&self, entry: &Entry, fallback_mode: u32) -> SimpleFileOptions {
        SimpleFileOptions::default()
            .compression_method(self.method)
            .unix_permissions(entry.effective_mode(fallback_mode))
            .last_modified_time(to_dos_time(entry.modified))
            .large_file(entry.size >= u64::from(u32::MAX))
    }
}

impl EntrySink for ZipSink {
    fn append_directory(&mut self, entry: &Entry) -> Result<()> {
        let options = self.options(entry, self.settings.dir_mode);
        self.writer
            .add_directory(format!("{}/", entry.name), options)
            .map_err(|e| zip_error(&self.archive, e))
    }

    fn append_file(&mut self, entry: &Entry, content: &mut dyn Read) -> Result<()> {
        let options = self.options(entry, self.settings.file_mode);
        self.writer
            .start_file(entry.name.as_str(), options)
            .map_err(|e| zip_error(&self.archive, e))?;
        io::copy(content, &mut self.writer).map_err(|e| zip_error(&self.archive, e.into()))?;
        Ok(())
    }

    fn append_symlink(&mut self, entry: &Entry) -> Result<()> {
        let target = entry.symlink_target().unwrap_or_default();
        let options = self.options(entry, 0o777);
        self.writer
            .add_symlink(entry.name.as_str(), target, options)
            .map_err(|e| zip_error(&self.archive, e))
    }
}

struct ZipSource {
    archive:    ZipArchive<BufReader<File>>,
    path:       PathBuf,
    chunk_size: usize,
}

impl ZipSource {
    fn new(file: File, path: &Path, chunk_size: usize) -> Result<Self> {
        let archive = ZipArchive::new(BufReader::new(file)).map_err(|e| zip_error(path, e))?;
        Ok(Self {
            archive,
            path: path.to_path_buf(),
            chunk_size,
        })
    }
}

impl EntrySource for ZipSource {
    fn for_each_entry(
        &mut self,
        visit: &mut dyn FnMut(PendingEntry<'_>) -> Result<()>,
    ) -> Result<()> {
        for index in 0..self.archive.len() {
            let mut file = self
                .archive
                .by_index(index)
                .map_err(|e| zip_error(&self.path, e))?;

            let name = file.name().to_string();
            let mode = file.unix_mode();
            let type_bits = mode.map_or(0, |m| m & TYPE_MASK);

            let kind = if file.is_dir() || type_bits == TYPE_DIR {
                EntryKind::Directory
            } else if type_bits == TYPE_SYMLINK {
                let mut target = Vec::new();
                copy_bounded(
                    &mut target,
                    &mut file,
                    self.chunk_size,
                    Path::new(&name),
                    Some(ByteLimit::new("symlink target", MAX_LINK_TARGET)),
                )?;
                EntryKind::Symlink {
                    target: String::from_utf8_lossy(&target).into_owned(),
                }
            } else if type_bits == 0 || type_bits == TYPE_FILE {
                EntryKind::File
            } else {
                return Err(Error::UnsupportedFileType {
                    path: PathBuf::from(name),
                    kind: format!("zip entry mode {type_bits:o}"),
                });
            };

            let modified = file
                .last_modified()
                .and_then(from_dos_time)
                .unwrap_or(SystemTime::UNIX_EPOCH);

            let mut entry = Entry::new(name.trim_end_matches('/'), kind);
            if entry.name.is_empty() {
                entry.name = name;
            }
            entry.size = if entry.is_file() { file.size() } else { 0 };
            entry.mode = mode;
            entry.modified = modified;
            entry.accessed = modified;

            let content: Option<&mut dyn Read> = if entry.is_file() {
                Some(&mut file)
            } else {
                None
            };
            visit(PendingEntry { entry, content })?;
        }

        Ok(())
    }
}

/// DOS time for `time`. Anything before 1980-01-01 clamps to that date and
/// anything after 2107 clamps to the last representable second.
fn to_dos_time(time: SystemTime) -> zip::DateTime {
    let utc: DateTime<Utc> = time.into();
    let year = match u16::try_from(utc.year()) {
        Ok(year @ DOS_FIRST_YEAR..=DOS_LAST_YEAR) => year,
        Ok(year) if year > DOS_LAST_YEAR => return latest_dos_time(),
        _ => return zip::DateTime::default(),
    };
    zip::DateTime::from_date_and_time(
        year,
        utc.month() as u8,
        utc.day() as u8,
        utc.hour() as u8,
        utc.minute() as u8,
        utc.second() as u8,
    )
    .unwrap_or_default()
}

fn latest_dos_time() -> zip::DateTime {
    zip::DateTime::from_date_and_time(DOS_LAST_YEAR, 12, 31, 23, 59, 58).unwrap_or_default()
}

fn from_dos_time(time: zip::DateTime) -> Option<SystemTime> {
    let date = NaiveDate::from_ymd_opt(
        i32::from(time.year()),
        u32::from(time.month()),
        u32::from(time.day()),
    )?;
    let naive = date.and_hms_opt(
        u32::from(time.hour()),
        u32::from(time.minute()),
        u32::from(time.second()),
    )?;
    Some(SystemTime::from(naive.and_utc()))
}

fn zip_error(path: &Path, source: zip::result::ZipError) -> Error {
    Error::Zip {
        path: path.to_path_buf(),
        source,
    }
}
