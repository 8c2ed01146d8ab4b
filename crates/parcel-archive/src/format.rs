use std::io::{self, Read, Seek};
use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveFormat {
    TarGz,
    Zip,
}

impl ArchiveFormat {
    /// Canonical file extension, including the leading dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::TarGz => ".tar.gz",
            Self::Zip => ".zip",
        }
    }

    /// Pick a format from the file name of `path`.
    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let name = path.as_ref().file_name()?.to_string_lossy();
        [Self::TarGz, Self::Zip]
            .into_iter()
            .find(|format| name.ends_with(format.extension()))
    }

    /// Pick a format from the first bytes of an archive.
    pub fn detect(data: &[u8]) -> Option<Self> {
        match data {
            [0x50, 0x4B, 0x03, 0x04, ..] | [0x50, 0x4B, 0x05, 0x06, ..] => Some(Self::Zip),
            [0x1F, 0x8B, ..] => Some(Self::TarGz),
            _ => None,
        }
    }

    /// Sniff the format of a seekable reader and rewind it.
    pub fn detect_from_reader<R: Read + Seek>(reader: &mut R) -> io::Result<Option<Self>> {
        let mut header = [0u8; 4];
        let mut filled = 0;
        while filled < header.len() {
            let n = reader.read(&mut header[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        reader.rewind()?;
        Ok(Self::detect(&header[..filled]))
    }
}
