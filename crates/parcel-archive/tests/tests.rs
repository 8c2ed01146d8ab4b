#![cfg(all(feature = "tar", feature = "zip"))]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use parcel_archive::{
    ArchiveFormat, ArchiveOptions, Archiver, Compression, Error, Limits, MetadataAccess,
    NativeMetadata, codec_for, codec_for_path,
};
use parcel_fs::NodeKind;
use tempfile::TempDir;

const FORMATS: [ArchiveFormat; 2] = [ArchiveFormat::TarGz, ArchiveFormat::Zip];
const STAMP: u64 = 1_500_000_000;

fn at(secs: u64) -> SystemTime { SystemTime::UNIX_EPOCH + Duration::from_secs(secs) }

fn workspace(format: ArchiveFormat) -> TempDir {
    tempfile::Builder::new()
        .prefix(&format!("parcel-test-{format:?}-"))
        .tempdir()
        .expect("Failed to create temp dir")
}

fn archive_path(dir: &Path, format: ArchiveFormat) -> PathBuf {
    dir.join(format!("out{}", format.extension()))
}

fn compress(format: ArchiveFormat, options: ArchiveOptions) -> parcel_archive::Result<()> {
    codec_for(format, options)?.compress().map(|_| ())
}

fn extract(format: ArchiveFormat, options: ArchiveOptions) -> parcel_archive::Result<()> {
    codec_for(format, options)?.extract().map(|_| ())
}

/// a.txt, bin/tool, bin/up -> ../a.txt, empty/, link -> a.txt
fn sample_tree(root: &Path) {
    fs::create_dir_all(root.join("bin")).unwrap();
    fs::create_dir_all(root.join("empty")).unwrap();
    fs::write(root.join("a.txt"), "alpha").unwrap();
    fs::write(root.join("bin/tool"), "#!/bin/sh\necho tool\n").unwrap();

    #[cfg(unix)]
    {
        std::os::unix::fs::symlink("a.txt", root.join("link")).unwrap();
        std::os::unix::fs::symlink("../a.txt", root.join("bin/up")).unwrap();
    }

    set_mode(root.join("a.txt"), 0o640);
    set_mode(root.join("bin/tool"), 0o755);
    set_mode(root.join("bin"), 0o750);

    for path in ["a.txt", "bin/tool", "bin", "empty"] {
        NativeMetadata
            .set_times(&root.join(path), at(STAMP), at(STAMP))
            .unwrap();
    }
}

fn set_mode(path: PathBuf, mode: u32) {
    NativeMetadata.set_mode(&path, mode).unwrap();
}

fn assert_close(actual: SystemTime, expected: SystemTime, tolerance: Duration) {
    let delta = actual
        .duration_since(expected)
        .or_else(|_| expected.duration_since(actual))
        .unwrap();
    assert!(delta <= tolerance, "{actual:?} is not within {tolerance:?} of {expected:?}");
}

#[test]
fn round_trip_preserves_tree() {
    for format in FORMATS {
        let tmp = workspace(format);
        let raw = tmp.path().join("raw");
        let restored = tmp.path().join("restored");
        let archive = archive_path(tmp.path(), format);
        sample_tree(&raw);

        let report = codec_for(format, ArchiveOptions::new(&archive, &raw))
            .unwrap()
            .compress()
            .unwrap();
        assert_eq!(report.format, format);
        assert_eq!(report.total_bytes, 5 + 20);

        let extracted = codec_for(
            format,
            ArchiveOptions::new(&archive, &restored).create_directory(true),
        )
        .unwrap()
        .extract()
        .unwrap();
        assert_eq!(extracted.entry_count, report.entry_count);
        assert_eq!(extracted.total_bytes, report.total_bytes);

        assert_eq!(fs::read(restored.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(
            fs::read_to_string(restored.join("bin/tool")).unwrap(),
            "#!/bin/sh\necho tool\n"
        );
        assert!(restored.join("empty").is_dir());

        let tolerance = match format {
            ArchiveFormat::TarGz => Duration::ZERO,
            ArchiveFormat::Zip => Duration::from_secs(2),
        };
        for path in ["a.txt", "bin/tool", "bin", "empty"] {
            let stat = NativeMetadata.stat(&restored.join(path)).unwrap();
            assert_close(stat.modified, at(STAMP), tolerance);
        }

        #[cfg(unix)]
        {
            let mode = |p: &str| NativeMetadata.stat(&restored.join(p)).unwrap().mode;
            assert_eq!(mode("a.txt"), 0o640, "{format:?}");
            assert_eq!(mode("bin/tool"), 0o755, "{format:?}");
            assert_eq!(mode("bin"), 0o750, "{format:?}");

            assert_eq!(fs::read_link(restored.join("link")).unwrap(), Path::new("a.txt"));
            assert_eq!(fs::read_link(restored.join("bin/up")).unwrap(), Path::new("../a.txt"));
            assert_eq!(fs::read(restored.join("bin/up")).unwrap(), b"alpha");
        }
    }
}

#[test]
fn tar_keeps_access_time() {
    let tmp = workspace(ArchiveFormat::TarGz);
    let raw = tmp.path().join("raw");
    let restored = tmp.path().join("restored");
    let archive = archive_path(tmp.path(), ArchiveFormat::TarGz);
    fs::create_dir(&raw).unwrap();
    fs::write(raw.join("f"), "x").unwrap();
    NativeMetadata
        .set_times(&raw.join("f"), at(STAMP + 100), at(STAMP))
        .unwrap();

    compress(ArchiveFormat::TarGz, ArchiveOptions::new(&archive, &raw)).unwrap();
    extract(
        ArchiveFormat::TarGz,
        ArchiveOptions::new(&archive, &restored).create_directory(true),
    )
    .unwrap();

    let stat = NativeMetadata.stat(&restored.join("f")).unwrap();
    assert_eq!(stat.modified, at(STAMP));
    assert_eq!(stat.accessed, at(STAMP + 100));
}

#[test]
fn deflate_shrinks_repetitive_content() {
    let tmp = workspace(ArchiveFormat::Zip);
    let raw = tmp.path().join("raw");
    fs::create_dir(&raw).unwrap();
    fs::write(raw.join("zeros.bin"), vec![0u8; 64 * 1024]).unwrap();

    let stored = tmp.path().join("stored.zip");
    let deflated = tmp.path().join("deflated.zip");
    compress(ArchiveFormat::Zip, ArchiveOptions::new(&stored, &raw)).unwrap();
    compress(
        ArchiveFormat::Zip,
        ArchiveOptions::new(&deflated, &raw).compression(Compression::Deflate),
    )
    .unwrap();

    let stored_len = fs::metadata(&stored).unwrap().len();
    let deflated_len = fs::metadata(&deflated).unwrap().len();
    assert!(deflated_len < stored_len / 10, "{deflated_len} vs {stored_len}");

    let restored = tmp.path().join("restored");
    extract(
        ArchiveFormat::Zip,
        ArchiveOptions::new(&deflated, &restored).create_directory(true),
    )
    .unwrap();
    assert_eq!(fs::read(restored.join("zeros.bin")).unwrap(), vec![0u8; 64 * 1024]);
}

/// `STAMP` as a DOS time (2017-07-14T02:40:00Z).
fn dos_stamp() -> zip::DateTime { zip::DateTime::from_date_and_time(2017, 7, 14, 2, 40, 0).unwrap() }

/// One year before `STAMP`, for directories (2016-07-14T02:40:00Z).
const DIR_STAMP: u64 = STAMP - 365 * 86_400;

fn dos_dir_stamp() -> zip::DateTime { zip::DateTime::from_date_and_time(2016, 7, 14, 2, 40, 0).unwrap() }

/// Entries written with their names and targets taken verbatim.
enum Raw<'a> {
    Dir(&'a str, u32),
    File(&'a str, &'a [u8], u32),
    Link(&'a str, &'a str),
}

/// Write a tar.gz bypassing the builder's own path checks.
fn raw_tar(path: &Path, entries: &[Raw<'_>]) {
    let encoder = flate2::write::GzEncoder::new(
        File::create(path).unwrap(),
        flate2::Compression::default(),
    );
    let mut builder = tar::Builder::new(encoder);

    let empty: &[u8] = &[];
    for entry in entries {
        let (name, link, body, mode, mtime, kind) = match *entry {
            Raw::Dir(name, mode) => (name, None, empty, mode, DIR_STAMP, tar::EntryType::Directory),
            Raw::File(name, data, mode) => (name, None, data, mode, STAMP, tar::EntryType::Regular),
            Raw::Link(name, target) => (name, Some(target), empty, 0o777, STAMP, tar::EntryType::Symlink),
        };
        let mut header = tar::Header::new_gnu();
        {
            let gnu = header.as_gnu_mut().unwrap();
            gnu.name[..name.len()].copy_from_slice(name.as_bytes());
            if let Some(link) = link {
                gnu.linkname[..link.len()].copy_from_slice(link.as_bytes());
            }
        }
        header.set_entry_type(kind);
        header.set_size(body.len() as u64);
        header.set_mode(mode);
        header.set_mtime(mtime);
        header.set_cksum();
        builder.append(&header, body).unwrap();
    }

    builder.into_inner().unwrap().finish().unwrap();
}

fn raw_zip(path: &Path, entries: &[Raw<'_>]) {
    let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
    let options = zip::write::SimpleFileOptions::default();
    for entry in entries {
        match *entry {
            Raw::Dir(name, mode) => {
                let options = options.unix_permissions(mode).last_modified_time(dos_dir_stamp());
                writer.add_directory(format!("{name}/"), options).unwrap();
            }
            Raw::File(name, data, mode) => {
                let options = options.unix_permissions(mode).last_modified_time(dos_stamp());
                writer.start_file(name, options).unwrap();
                writer.write_all(data).unwrap();
            }
            Raw::Link(name, target) => {
                let options = options.last_modified_time(dos_stamp());
                writer.add_symlink(name, target, options).unwrap();
            }
        }
    }
    writer.finish().unwrap();
}

fn raw_archive(format: ArchiveFormat, path: &Path, entries: &[Raw<'_>]) {
    match format {
        ArchiveFormat::TarGz => raw_tar(path, entries),
        ArchiveFormat::Zip => raw_zip(path, entries),
    }
}

fn hostile(format: ArchiveFormat, path: &Path, name: &str, link: Option<&str>) {
    let entry = match link {
        Some(target) => Raw::Link(name, target),
        None => Raw::File(name, b"evil", 0o644),
    };
    raw_archive(format, path, &[entry]);
}

#[test]
fn traversal_entries_rejected() {
    for format in FORMATS {
        for name in ["../outside.txt", "nested/../../outside.txt", "/tmp/parcel-abs.txt"] {
            let tmp = workspace(format);
            let raw = tmp.path().join("raw");
            let archive = archive_path(tmp.path(), format);
            hostile(format, &archive, name, None);

            let result = extract(
                format,
                ArchiveOptions::new(&archive, &raw).create_directory(true),
            );

            assert!(
                matches!(result, Err(Error::PathOutOfBound { .. })),
                "{format:?} {name}: {result:?}"
            );
            assert!(!tmp.path().join("outside.txt").exists());
        }
    }
}

#[cfg(unix)]
#[test]
fn escaping_symlink_entries_rejected() {
    for format in FORMATS {
        for target in ["../secret", "/etc/passwd"] {
            let tmp = workspace(format);
            let raw = tmp.path().join("raw");
            let archive = archive_path(tmp.path(), format);
            hostile(format, &archive, "evil", Some(target));

            let result = extract(
                format,
                ArchiveOptions::new(&archive, &raw).create_directory(true),
            );

            assert!(
                matches!(result, Err(Error::PathOutOfBound { .. })),
                "{format:?} {target}: {result:?}"
            );
            assert!(fs::symlink_metadata(raw.join("evil")).is_err());
        }
    }
}

#[cfg(unix)]
#[test]
fn link_chain_escape_rejected() {
    for format in FORMATS {
        let tmp = workspace(format);
        let raw = tmp.path().join("raw");
        let archive = archive_path(tmp.path(), format);
        fs::create_dir(&raw).unwrap();
        raw_archive(
            format,
            &archive,
            &[
                Raw::Dir("a", 0o755),
                Raw::Link("a/b", ".."),
                Raw::Link("x", "a/b"),
                Raw::Dir("d", 0o700),
                Raw::Link("d", "x/.."),
            ],
        );
        let before = NativeMetadata.stat(tmp.path()).unwrap();

        let result = extract(format, ArchiveOptions::new(&archive, &raw).overwrite(true));

        assert!(
            matches!(result, Err(Error::PathOutOfBound { .. })),
            "{format:?}: {result:?}"
        );
        let after = NativeMetadata.stat(tmp.path()).unwrap();
        assert_eq!(after.mode, before.mode, "{format:?}");
        assert_eq!(after.modified, before.modified, "{format:?}");
    }
}

#[test]
fn overwrite_replaces_directory_entry() {
    for format in FORMATS {
        let tmp = workspace(format);
        let raw = tmp.path().join("raw");
        let archive = archive_path(tmp.path(), format);
        fs::create_dir(&raw).unwrap();
        raw_archive(
            format,
            &archive,
            &[Raw::Dir("a", 0o711), Raw::File("a", b"x", 0o640)],
        );

        extract(format, ArchiveOptions::new(&archive, &raw).overwrite(true)).unwrap();

        let stat = NativeMetadata.stat(&raw.join("a")).unwrap();
        assert!(matches!(stat.kind, NodeKind::File), "{format:?}");
        assert_eq!(fs::read(raw.join("a")).unwrap(), b"x");
        assert_close(stat.modified, at(STAMP), Duration::from_secs(2));
        #[cfg(unix)]
        assert_eq!(stat.mode, 0o640, "{format:?}");
    }
}

#[test]
fn overwrite_policy_on_extract() {
    for format in FORMATS {
        let tmp = workspace(format);
        let raw = tmp.path().join("raw");
        let target = tmp.path().join("target");
        let archive = archive_path(tmp.path(), format);
        fs::create_dir(&raw).unwrap();
        fs::write(raw.join("a.txt"), "fresh").unwrap();
        compress(format, ArchiveOptions::new(&archive, &raw)).unwrap();

        fs::create_dir(&target).unwrap();
        fs::write(target.join("a.txt"), "stale").unwrap();

        let result = extract(format, ArchiveOptions::new(&archive, &target));
        assert!(matches!(result, Err(Error::TargetExists { .. })), "{format:?}");
        assert_eq!(fs::read(target.join("a.txt")).unwrap(), b"stale");

        extract(format, ArchiveOptions::new(&archive, &target).overwrite(true)).unwrap();
        assert_eq!(fs::read(target.join("a.txt")).unwrap(), b"fresh");
    }
}

#[test]
fn overwrite_policy_on_compress() {
    for format in FORMATS {
        let tmp = workspace(format);
        let raw = tmp.path().join("raw");
        let archive = archive_path(tmp.path(), format);
        fs::create_dir(&raw).unwrap();
        fs::write(&archive, "not an archive").unwrap();

        let result = compress(format, ArchiveOptions::new(&archive, &raw));
        assert!(matches!(result, Err(Error::TargetExists { .. })), "{format:?}");
        assert_eq!(fs::read(&archive).unwrap(), b"not an archive");

        compress(format, ArchiveOptions::new(&archive, &raw).overwrite(true)).unwrap();
        let head = fs::read(&archive).unwrap();
        assert_eq!(ArchiveFormat::detect(&head), Some(format));
    }
}

#[test]
fn extension_enforced_unless_relieved() {
    for format in FORMATS {
        let tmp = workspace(format);
        let raw = tmp.path().join("raw");
        let archive = tmp.path().join("out.bin");
        fs::create_dir(&raw).unwrap();

        let result = compress(format, ArchiveOptions::new(&archive, &raw));
        assert!(matches!(result, Err(Error::ExtensionMissing { .. })), "{format:?}");
        assert!(!archive.exists());

        compress(
            format,
            ArchiveOptions::new(&archive, &raw).relief_extension(true),
        )
        .unwrap();
        assert!(archive.is_file());
    }
}

#[test]
fn sanitize_normalizes_paths() {
    let tmp = workspace(ArchiveFormat::TarGz);
    fs::create_dir(tmp.path().join("raw")).unwrap();
    let options = ArchiveOptions::new(
        tmp.path().join("raw/../out.tar.gz"),
        tmp.path().join("raw/./"),
    );

    let mut archiver = parcel_archive::TarGzArchiver::new(options);
    archiver.sanitize().unwrap();

    let paths = archiver.sanitized().unwrap();
    assert_eq!(paths.archive.file_name().unwrap(), "out.tar.gz");
    assert!(!paths.archive.to_string_lossy().contains(".."));
    assert!(paths.raw.ends_with("raw"));
}

#[test]
fn archive_parent_created_on_compress() {
    for format in FORMATS {
        let tmp = workspace(format);
        let raw = tmp.path().join("raw");
        fs::create_dir(&raw).unwrap();
        let archive = tmp.path().join("dist/nested").join(format!("out{}", format.extension()));

        compress(format, ArchiveOptions::new(&archive, &raw)).unwrap();
        assert!(archive.is_file());
    }
}

#[test]
fn raw_directory_policy() {
    for format in FORMATS {
        let tmp = workspace(format);
        let missing = tmp.path().join("missing");
        let archive = archive_path(tmp.path(), format);

        let result = compress(format, ArchiveOptions::new(&archive, &missing));
        assert!(matches!(result, Err(Error::Missing { .. })), "{format:?}");

        let raw = tmp.path().join("raw");
        fs::create_dir(&raw).unwrap();
        fs::write(raw.join("f"), "f").unwrap();
        compress(format, ArchiveOptions::new(&archive, &raw)).unwrap();

        let result = extract(format, ArchiveOptions::new(&archive, &missing));
        assert!(matches!(result, Err(Error::DirectoryMissing { .. })), "{format:?}");
        assert!(!missing.exists());

        extract(
            format,
            ArchiveOptions::new(&archive, &missing).create_directory(true),
        )
        .unwrap();
        assert_eq!(fs::read(missing.join("f")).unwrap(), b"f");
    }
}

#[test]
fn archive_inside_raw_root_is_skipped() {
    for format in FORMATS {
        let tmp = workspace(format);
        let raw = tmp.path().join("raw");
        fs::create_dir(&raw).unwrap();
        fs::write(raw.join("data.txt"), "data").unwrap();
        let archive = archive_path(&raw, format);

        let report = codec_for(format, ArchiveOptions::new(&archive, &raw))
            .unwrap()
            .compress()
            .unwrap();
        assert_eq!(report.entry_count, 1, "{format:?}");
    }
}

#[cfg(unix)]
#[test]
fn unsupported_node_aborts_compress() {
    for format in FORMATS {
        let tmp = workspace(format);
        let raw = tmp.path().join("raw");
        fs::create_dir(&raw).unwrap();
        fs::write(raw.join("a.txt"), "a").unwrap();
        let _listener = std::os::unix::net::UnixListener::bind(raw.join("sock")).unwrap();
        let archive = archive_path(tmp.path(), format);

        let result = compress(format, ArchiveOptions::new(&archive, &raw));
        assert!(
            matches!(result, Err(Error::UnsupportedFileType { .. })),
            "{format:?}: {result:?}"
        );
    }
}

#[cfg(unix)]
#[test]
fn symlink_policy() {
    for format in FORMATS {
        let tmp = workspace(format);
        let raw = tmp.path().join("raw");
        fs::create_dir(&raw).unwrap();
        fs::write(raw.join("target.txt"), "payload").unwrap();
        std::os::unix::fs::symlink("target.txt", raw.join("link")).unwrap();

        let kept = tmp.path().join(format!("kept{}", format.extension()));
        compress(format, ArchiveOptions::new(&kept, &raw)).unwrap();
        let out = tmp.path().join("kept");
        extract(format, ArchiveOptions::new(&kept, &out).create_directory(true)).unwrap();
        assert!(fs::symlink_metadata(out.join("link")).unwrap().file_type().is_symlink());

        let followed = tmp.path().join(format!("followed{}", format.extension()));
        compress(
            format,
            ArchiveOptions::new(&followed, &raw).follow_symlink(true),
        )
        .unwrap();
        let out = tmp.path().join("followed");
        extract(format, ArchiveOptions::new(&followed, &out).create_directory(true)).unwrap();
        let meta = fs::symlink_metadata(out.join("link")).unwrap();
        assert!(meta.file_type().is_file(), "{format:?}");
        assert_eq!(fs::read(out.join("link")).unwrap(), b"payload");
    }
}

#[cfg(unix)]
#[test]
fn symlink_cycle_under_follow() {
    for format in FORMATS {
        let tmp = workspace(format);
        let raw = tmp.path().join("raw");
        fs::create_dir_all(raw.join("dir")).unwrap();
        std::os::unix::fs::symlink("..", raw.join("dir/loop")).unwrap();
        let archive = archive_path(tmp.path(), format);

        let result = compress(format, ArchiveOptions::new(&archive, &raw).follow_symlink(true));
        assert!(matches!(result, Err(Error::SymlinkCycle { .. })), "{format:?}");

        // Without following, the same tree archives fine.
        compress(format, ArchiveOptions::new(&archive, &raw).overwrite(true)).unwrap();
    }
}

#[cfg(unix)]
#[test]
fn escaping_symlink_aborts_compress() {
    for format in FORMATS {
        let tmp = workspace(format);
        let raw = tmp.path().join("raw");
        fs::create_dir(&raw).unwrap();
        fs::write(tmp.path().join("secret"), "s").unwrap();
        std::os::unix::fs::symlink("../secret", raw.join("leak")).unwrap();
        let archive = archive_path(tmp.path(), format);

        let result = compress(format, ArchiveOptions::new(&archive, &raw));
        assert!(matches!(result, Err(Error::PathOutOfBound { .. })), "{format:?}");
    }
}

#[test]
fn size_limits_stop_extraction() {
    for format in FORMATS {
        let tmp = workspace(format);
        let raw = tmp.path().join("raw");
        fs::create_dir(&raw).unwrap();
        fs::write(raw.join("big.bin"), vec![7u8; 4096]).unwrap();
        let archive = archive_path(tmp.path(), format);
        compress(format, ArchiveOptions::new(&archive, &raw)).unwrap();

        let out = tmp.path().join("out");
        let result = extract(
            format,
            ArchiveOptions::new(&archive, &out)
                .create_directory(true)
                .limits(Limits::default().max_entry_size(1024)),
        );
        assert!(
            matches!(result, Err(Error::LimitExceeded { limit: "entry size", .. })),
            "{format:?}: {result:?}"
        );
    }
}

#[test]
fn codec_picked_from_path() {
    for format in FORMATS {
        let tmp = workspace(format);
        let raw = tmp.path().join("raw");
        fs::create_dir(&raw).unwrap();
        fs::write(raw.join("f"), "f").unwrap();
        let archive = archive_path(tmp.path(), format);

        let mut codec = codec_for_path(ArchiveOptions::new(&archive, &raw)).unwrap();
        assert_eq!(codec.format(), format);
        codec.compress().unwrap();

        let renamed = tmp.path().join("download");
        fs::rename(&archive, &renamed).unwrap();
        let out = tmp.path().join("out");
        let mut codec = codec_for_path(
            ArchiveOptions::new(&renamed, &out)
                .create_directory(true)
                .relief_extension(true),
        )
        .unwrap();
        assert_eq!(codec.format(), format);
        codec.extract().unwrap();
        assert_eq!(fs::read(out.join("f")).unwrap(), b"f");
    }
}
