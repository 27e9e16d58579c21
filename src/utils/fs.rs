//! File system utility functions
//!
//! Provides safe file operations with proper error handling.

use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, instrument};

/// Utility struct for file system operations
#[derive(Debug)]
pub struct FileSystemUtils;

impl FileSystemUtils {
    /// Create a new file system utilities instance
    pub fn new() -> Self {
        Self
    }

    /// Copy a file from source to destination, preserving permissions
    #[instrument(skip(self))]
    pub fn copy_file<P: AsRef<Path> + std::fmt::Debug, Q: AsRef<Path> + std::fmt::Debug>(
        &self,
        src: P,
        dst: Q,
    ) -> io::Result<u64> {
        let src = src.as_ref();
        let dst = dst.as_ref();

        debug!("Copying file: {} -> {}", src.display(), dst.display());

        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }

        let bytes_copied = fs::copy(src, dst)?;

        let metadata = fs::metadata(src)?;
        fs::set_permissions(dst, metadata.permissions())?;

        debug!("Successfully copied {} bytes", bytes_copied);
        Ok(bytes_copied)
    }

    /// Create directories recursively
    #[instrument(skip(self))]
    pub fn create_dir_all<P: AsRef<Path> + std::fmt::Debug>(&self, path: P) -> io::Result<()> {
        let path = path.as_ref();
        debug!("Creating directory: {}", path.display());
        fs::create_dir_all(path)
    }

    /// Remove a file if it exists
    #[instrument(skip(self))]
    pub fn remove_file_if_exists<P: AsRef<Path> + std::fmt::Debug>(&self, path: P) -> io::Result<bool> {
        let path = path.as_ref();

        match fs::remove_file(path) {
            Ok(()) => {
                debug!("Removed file: {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("File does not exist: {}", path.display());
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Write content to a file, creating parent directories if needed
    #[instrument(skip(self, contents))]
    pub fn write_file<P: AsRef<Path> + std::fmt::Debug, C: AsRef<[u8]>>(
        &self,
        path: P,
        contents: C,
    ) -> io::Result<()> {
        let path = path.as_ref();

        debug!("Writing file: {}", path.display());

        if let Some(parent) = path.parent() {
            self.create_dir_all(parent)?;
        }

        fs::write(path, contents)?;
        debug!("File written successfully");
        Ok(())
    }

    /// Read file contents as string
    #[instrument(skip(self))]
    pub fn read_file_to_string<P: AsRef<Path> + std::fmt::Debug>(&self, path: P) -> io::Result<String> {
        let path = path.as_ref();
        debug!("Reading file: {}", path.display());
        fs::read_to_string(path)
    }

    /// Hex-encoded SHA-256 digest and size of a file
    #[instrument(skip(self))]
    pub fn sha256_file<P: AsRef<Path> + std::fmt::Debug>(&self, path: P) -> io::Result<(String, u64)> {
        let mut file = fs::File::open(path.as_ref())?;
        let mut hasher = Sha256::new();
        let size = io::copy(&mut file, &mut hasher)?;
        Ok((hex::encode(hasher.finalize()), size))
    }
}

impl Default for FileSystemUtils {
    fn default() -> Self {
        Self::new()
    }
}

/// `/`-separated form of a relative path, or `None` if it leaves its base
pub fn to_archive_path(relative: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?.to_string()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// `path` with every `.` component dropped
pub fn without_cur_dir(path: &Path) -> PathBuf {
    path.components()
        .filter(|component| !matches!(component, Component::CurDir))
        .collect()
}

/// Join a `/`-separated archive path onto `base`, rejecting escapes
pub fn from_archive_path(base: &Path, archive_path: &str) -> Option<PathBuf> {
    let relative = Path::new(archive_path);
    to_archive_path(relative)?;
    Some(
        archive_path
            .split('/')
            .filter(|part| !part.is_empty() && *part != ".")
            .fold(base.to_path_buf(), |dir, part| dir.join(part)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_copy_file() {
        let temp_dir = TempDir::new().unwrap();
        let fs_utils = FileSystemUtils::new();

        let src = temp_dir.path().join("source.txt");
        let dst = temp_dir.path().join("nested").join("dest.txt");

        fs::write(&src, "test content").unwrap();

        let bytes_copied = fs_utils.copy_file(&src, &dst).unwrap();
        assert_eq!(bytes_copied, 12);
        assert_eq!(fs::read_to_string(&dst).unwrap(), "test content");
        assert!(src.exists());
    }

    #[test]
    fn test_remove_file_if_exists() {
        let temp_dir = TempDir::new().unwrap();
        let fs_utils = FileSystemUtils::new();

        let file_path = temp_dir.path().join("archive.tar.gz.partial");

        assert!(!fs_utils.remove_file_if_exists(&file_path).unwrap());

        fs::write(&file_path, "content").unwrap();
        assert!(fs_utils.remove_file_if_exists(&file_path).unwrap());
        assert!(!file_path.exists());
    }

    #[test]
    fn test_write_and_read_file() {
        let temp_dir = TempDir::new().unwrap();
        let fs_utils = FileSystemUtils::new();

        let file_path = temp_dir.path().join("subdir").join("PKG-INFO");
        fs_utils.write_file(&file_path, "Name: tiny\n").unwrap();
        assert_eq!(fs_utils.read_file_to_string(&file_path).unwrap(), "Name: tiny\n");
    }

    #[test]
    fn test_sha256_file() {
        let temp_dir = TempDir::new().unwrap();
        let fs_utils = FileSystemUtils::new();

        let file_path = temp_dir.path().join("empty");
        fs::write(&file_path, "").unwrap();
        let (digest, size) = fs_utils.sha256_file(&file_path).unwrap();
        assert_eq!(size, 0);
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_archive_paths() {
        assert_eq!(
            to_archive_path(Path::new("aiflearn/data/./raw")),
            Some("aiflearn/data/raw".to_string())
        );
        assert_eq!(to_archive_path(Path::new("../etc/passwd")), None);
        assert_eq!(to_archive_path(Path::new("/etc/passwd")), None);
        assert_eq!(
            from_archive_path(Path::new("/site"), "aiflearn/__init__.py"),
            Some(PathBuf::from("/site/aiflearn/__init__.py"))
        );
        assert_eq!(from_archive_path(Path::new("/site"), "a/../../x"), None);
        assert_eq!(without_cur_dir(Path::new("./aiflearn/./data")), PathBuf::from("aiflearn/data"));
    }
}
