//! Compress and extract drivers shared by every format.
//!
//! A format only supplies an [`EntrySink`] for writing and an [`EntrySource`]
//! for reading; sanitization, overwrite policy, tree walking and entry
//! materialization live here and in the modules they call.

use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parcel_fs::{MetadataAccess, NativeMetadata};

use crate::entry::ArchiveReport;
use crate::error::{Error, Result};
use crate::format::ArchiveFormat;
use crate::options::ArchiveOptions;
use crate::sanitize::{sanitize_archive_path, sanitize_raw_path};
use crate::unpack::{EntrySource, Unpacker};
use crate::walk::{EntrySink, TreeWalker};

#[cfg(feature = "tar")]
mod tar;
#[cfg(feature = "zip")]
mod zip;

#[cfg(feature = "tar")]
pub use tar::TarGzArchiver;
#[cfg(feature = "zip")]
pub use zip::ZipArchiver;

/// Metadata capability shared by archivers.
pub type SharedMetadata = Arc<dyn MetadataAccess + Send + Sync>;

/// One archive format bound to one [`ArchiveOptions`].
pub trait Archiver {
    fn format(&self) -> ArchiveFormat;

    /// Validate and normalize the archive and raw paths.
    ///
    /// The archive's parent directory must exist; the raw directory may be
    /// absent but must not be anything other than a directory.
    fn sanitize(&mut self) -> Result<()>;

    /// Write the raw directory tree into the archive.
    fn compress(&mut self) -> Result<ArchiveReport>;

    /// Restore the archive into the raw directory.
    fn extract(&mut self) -> Result<ArchiveReport>;
}

/// Normalized paths of the last sanitize step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SanitizedPaths {
    pub archive: PathBuf,
    pub raw:     PathBuf,
}

/// State every format archiver carries.
pub(crate) struct Job {
    pub options: ArchiveOptions,
    pub access:  SharedMetadata,
    pub paths:   Option<SanitizedPaths>,
}

impl Job {
    pub fn new(options: ArchiveOptions) -> Self {
        Self {
            options,
            access: Arc::new(NativeMetadata),
            paths: None,
        }
    }

    pub fn sanitize(&mut self, format: ArchiveFormat, compressing: bool) -> Result<SanitizedPaths> {
        let extension = if self.options.relief_extension {
            ""
        } else {
            format.extension()
        };
        let archive = sanitize_archive_path(&self.options.archive, extension, !compressing)?;
        let raw = sanitize_raw_path(&self.options.raw, compressing)?;

        tracing::debug!(archive = %archive.display(), raw = %raw.display(), "sanitized paths");
        let paths = SanitizedPaths { archive, raw };
        self.paths = Some(paths.clone());
        Ok(paths)
    }

    /// Walk the raw root into the sink built by `open`, then close it with `finish`.
    pub fn compress<S, O, F>(&mut self, format: ArchiveFormat, open: O, finish: F) -> Result<ArchiveReport>
    where
        S: EntrySink,
        O: FnOnce(File, &Path) -> Result<S>,
        F: FnOnce(S) -> Result<()>,
    {
        let paths = self.sanitize(format, true)?;
        tracing::info!(?format, archive = %paths.archive.display(), raw = %paths.raw.display(), "compressing");

        let file = create_archive_file(&paths.archive, self.options.overwrite)?;
        let root = fs::canonicalize(&paths.raw).map_err(|e| Error::Resolve {
            path: paths.raw.clone(),
            source: e,
        })?;
        let skip = fs::canonicalize(&paths.archive).ok();

        let walker = TreeWalker::new(root, &*self.access)
            .follow_symlinks(self.options.follow_symlink, self.options.settings.max_symlink_depth)
            .skip(skip);

        let mut sink = open(file, &paths.archive)?;
        let mut report = ArchiveReport::new(format);
        walker.walk(&mut sink, &mut report)?;
        finish(sink)?;

        tracing::info!(
            entries = report.entry_count,
            bytes = report.total_bytes,
            archive = %paths.archive.display(),
            "compressed"
        );
        Ok(report)
    }

    /// Materialize every entry of the source built by `open` under the raw root.
    pub fn extract<S, O>(&mut self, format: ArchiveFormat, open: O) -> Result<ArchiveReport>
    where
        S: EntrySource,
        O: FnOnce(File, &Path) -> Result<S>,
    {
        let paths = self.sanitize(format, false)?;
        tracing::info!(?format, archive = %paths.archive.display(), raw = %paths.raw.display(), "extracting");

        prepare_raw_root(&paths.raw, self.options.create_directory)?;
        let file = File::open(&paths.archive).map_err(|e| Error::Open {
            path: paths.archive.clone(),
            source: e,
        })?;
        let mut source = open(file, &paths.archive)?;

        let report = Unpacker::new(
            &paths.raw,
            &self.options.settings,
            &*self.access,
            ArchiveReport::new(format),
        )?
        .overwrite(self.options.overwrite)
        .preserve_owner(self.options.preserve_owner)
        .unpack(&mut source)?;

        tracing::info!(
            entries = report.entry_count,
            bytes = report.total_bytes,
            raw = %paths.raw.display(),
            "extracted"
        );
        Ok(report)
    }
}

/// Apply the overwrite policy to `archive`, create its parent, and open it fresh.
fn create_archive_file(archive: &Path, overwrite: bool) -> Result<File> {
    match fs::symlink_metadata(archive) {
        Ok(_) if !overwrite => {
            return Err(Error::TargetExists {
                path: archive.to_path_buf(),
            });
        }
        Ok(_) => {
            tracing::debug!(path = %archive.display(), "removing existing archive");
            fs::remove_file(archive).map_err(|e| Error::Remove {
                path: archive.to_path_buf(),
                source: e,
            })?;
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            return Err(Error::Resolve {
                path: archive.to_path_buf(),
                source: e,
            });
        }
    }

    if let Some(parent) = archive.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::CreateDirectory {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(archive)
        .map_err(|e| Error::CreateFile {
            path: archive.to_path_buf(),
            source: e,
        })
}

fn prepare_raw_root(raw: &Path, create: bool) -> Result<()> {
    match fs::metadata(raw) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(Error::NotDirectory {
            path: raw.to_path_buf(),
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            if !create {
                return Err(Error::DirectoryMissing {
                    path: raw.to_path_buf(),
                });
            }
            tracing::debug!(path = %raw.display(), "creating raw directory");
            fs::create_dir_all(raw).map_err(|e| Error::CreateDirectory {
                path: raw.to_path_buf(),
                source: e,
            })
        }
        Err(e) => Err(Error::Resolve {
            path: raw.to_path_buf(),
            source: e,
        }),
    }
}

/// A format-erased archiver.
pub enum ArchiveCodec {
    #[cfg(feature = "tar")]
    TarGz(TarGzArchiver),
    #[cfg(feature = "zip")]
    Zip(ZipArchiver),
}

impl ArchiveCodec {
    fn inner(&mut self) -> &mut dyn Archiver {
        match self {
            #[cfg(feature = "tar")]
            Self::TarGz(archiver) => archiver,
            #[cfg(feature = "zip")]
            Self::Zip(archiver) => archiver,
        }
    }

    /// Replace the metadata capability of the wrapped archiver.
    pub fn with_metadata(self, access: SharedMetadata) -> Self {
        match self {
            #[cfg(feature = "tar")]
            Self::TarGz(archiver) => Self::TarGz(archiver.with_metadata(access)),
            #[cfg(feature = "zip")]
            Self::Zip(archiver) => Self::Zip(archiver.with_metadata(access)),
        }
    }
}

impl Archiver for ArchiveCodec {
    fn format(&self) -> ArchiveFormat {
        match self {
            #[cfg(feature = "tar")]
            Self::TarGz(archiver) => archiver.format(),
            #[cfg(feature = "zip")]
            Self::Zip(archiver) => archiver.format(),
        }
    }

    fn sanitize(&mut self) -> Result<()> { self.inner().sanitize() }

    fn compress(&mut self) -> Result<ArchiveReport> { self.inner().compress() }

    fn extract(&mut self) -> Result<ArchiveReport> { self.inner().extract() }
}

/// Archiver for an explicit format.
pub fn codec_for(format: ArchiveFormat, options: ArchiveOptions) -> Result<ArchiveCodec> {
    match format {
        #[cfg(feature = "tar")]
        ArchiveFormat::TarGz => Ok(ArchiveCodec::TarGz(TarGzArchiver::new(options))),
        #[cfg(feature = "zip")]
        ArchiveFormat::Zip => Ok(ArchiveCodec::Zip(ZipArchiver::new(options))),
        #[allow(unreachable_patterns)]
        _ => Err(Error::UnsupportedFormat {
            path: options.archive,
        }),
    }
}

/// Archiver chosen from the archive's extension, or from its leading bytes
/// when the extension is not recognized and the file exists.
pub fn codec_for_path(options: ArchiveOptions) -> Result<ArchiveCodec> {
    if let Some(format) = ArchiveFormat::from_path(&options.archive) {
        return codec_for(format, options);
    }

    let detected = match File::open(&options.archive) {
        Ok(mut file) => ArchiveFormat::detect_from_reader(&mut file).map_err(|e| Error::Open {
            path: options.archive.clone(),
            source: e,
        })?,
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            return Err(Error::Open {
                path: options.archive.clone(),
                source: e,
            });
        }
    };

    match detected {
        Some(format) => {
            tracing::debug!(?format, path = %options.archive.display(), "detected format from content");
            codec_for(format, options)
        }
        None => Err(Error::UnsupportedFormat {
            path: options.archive,
        }),
    }
}
