use crate::{Error, Result};
use std::path::Path;

/// Create `link` pointing at `target`. The target text is stored verbatim, so
/// relative targets stay relative to the link's directory.
pub fn create_symlink(target: impl AsRef<Path>, link: impl AsRef<Path>) -> Result<()> {
    let target = target.as_ref();
    let link = link.as_ref();

    #[cfg(unix)]
    {
        std::os::unix::fs::symlink(target, link).map_err(|e| Error::Symlink {
            target: target.to_path_buf(),
            link:   link.to_path_buf(),
            source: e,
        })
    }

    #[cfg(windows)]
    {
        let resolved = match link.parent() {
            Some(parent) => parent.join(target),
            None => target.to_path_buf(),
        };
        let result = if resolved.is_dir() {
            std::os::windows::fs::symlink_dir(target, link)
        } else {
            std::os::windows::fs::symlink_file(target, link)
        };
        result.map_err(|e| Error::Symlink {
            target: target.to_path_buf(),
            link:   link.to_path_buf(),
            source: e,
        })
    }

    #[cfg(not(any(unix, windows)))]
    {
        Err(Error::Symlink {
            target: target.to_path_buf(),
            link:   link.to_path_buf(),
            source: std::io::Error::from(std::io::ErrorKind::Unsupported),
        })
    }
}
