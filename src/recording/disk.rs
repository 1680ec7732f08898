use crate::error::RecordingError;
use std::path::{Path, PathBuf};

/// Free bytes available to unprivileged users on the volume holding `path`.
///
/// `path` does not need to exist yet; the nearest existing ancestor is
/// queried instead, so the answer is valid before the recording folder is
/// created.
pub fn disk_free_bytes(path: &Path) -> Result<u64, RecordingError> {
    let probe = nearest_existing(path);

    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::os::unix::ffi::OsStrExt;

        let c_path = CString::new(probe.as_os_str().as_bytes()).map_err(|e| {
            RecordingError::DiskQuery {
                path: probe.clone(),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
            }
        })?;

        unsafe {
            let mut stat: libc::statvfs = std::mem::zeroed();
            if libc::statvfs(c_path.as_ptr(), &mut stat) != 0 {
                return Err(RecordingError::DiskQuery {
                    path: probe,
                    source: std::io::Error::last_os_error(),
                });
            }
            #[allow(clippy::unnecessary_cast)]
            let available = stat.f_bavail as u64 * stat.f_frsize as u64;
            Ok(available)
        }
    }

    #[cfg(not(unix))]
    {
        Err(RecordingError::DiskQuery {
            path: probe,
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "free space query not supported on this platform",
            ),
        })
    }
}

fn nearest_existing(path: &Path) -> PathBuf {
    let mut candidate = path;
    loop {
        if candidate.exists() {
            return candidate.to_path_buf();
        }
        match candidate.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => candidate = parent,
            _ => return PathBuf::from("."),
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_free_space_of_missing_folder_uses_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("a").join("b");

        let free = disk_free_bytes(&missing).unwrap();
        assert_eq!(nearest_existing(&missing), dir.path());
        assert!(free > 0);
    }

    #[test]
    fn test_relative_path_falls_back_to_cwd() {
        assert_eq!(
            nearest_existing(Path::new("no-such-dir-luckycam/x")),
            PathBuf::from(".")
        );
    }
}
