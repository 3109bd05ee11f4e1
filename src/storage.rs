//! Crash-safe output files.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::crypto::rng::secure_random;
use crate::error::{Result, VaultError};

/// An output file that only appears at its destination once committed.
///
/// Data is written to a temporary file with a random name in the same
/// directory. [`commit`](Self::commit) syncs it and atomically moves it into
/// place. Dropping an uncommitted `AtomicFile` deletes the temporary file, so
/// a failed or abandoned write never leaves partial output at the target.
pub struct AtomicFile {
    target: PathBuf,
    tmp_path: PathBuf,
    file: Option<File>,
}

impl AtomicFile {
    /// Creates the temporary file next to `target`.
    ///
    /// Creates parent directories if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the temporary file cannot be created.
    pub fn create(target: impl Into<PathBuf>) -> Result<Self> {
        let target = target.into();
        if target.file_name().is_none() {
            return Err(VaultError::invalid(format!(
                "output path has no file name: {}",
                target.display()
            )));
        }

        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = random_tmp_path(&target)?;

        // securely create temp file (fail if exists)
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)?;

        Ok(Self {
            target,
            tmp_path,
            file: Some(file),
        })
    }

    /// Returns the final destination path.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Returns the path of the temporary file being written.
    pub fn tmp_path(&self) -> &Path {
        &self.tmp_path
    }

    /// Syncs the data and atomically moves it to the target path.
    ///
    /// # Errors
    ///
    /// Returns an error if syncing or renaming fails; the temporary file is
    /// removed in that case.
    pub fn commit(mut self) -> Result<()> {
        let Some(mut file) = self.file.take() else {
            return Err(VaultError::invalid("atomic file already committed"));
        };

        file.flush()?;
        file.sync_all()?; //fsync file
        drop(file);

        atomic_replace(&self.tmp_path, &self.target)?;
        self.tmp_path = PathBuf::new();

        sync_parent_dir(&self.target)?;

        debug!(path = %self.target.display(), "committed output file");
        Ok(())
    }

    fn file_mut(&mut self) -> io::Result<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("atomic file already committed"))
    }
}

impl Write for AtomicFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file_mut()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file_mut()?.flush()
    }
}

impl Drop for AtomicFile {
    fn drop(&mut self) {
        drop(self.file.take());
        if !self.tmp_path.as_os_str().is_empty() && fs::remove_file(&self.tmp_path).is_ok() {
            debug!(tmp = %self.tmp_path.display(), "discarded uncommitted output");
        }
    }
}

/// Generates a unique temporary file path in the same directory.
///
/// Format: `filename.tmp.<randomhex>`
fn random_tmp_path(target: &Path) -> Result<PathBuf> {
    let mut buf = [0u8; 8]; // 64 bit entropy
    secure_random(&mut buf)?;

    let rand_string = buf.iter().map(|b| format!("{:02x}", b)).collect::<String>();

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let tmp_name = format!("{}.tmp.{}", file_name, rand_string);

    Ok(target.with_file_name(tmp_name))
}

#[cfg(not(target_os = "windows"))]
fn sync_parent_dir(target: &Path) -> Result<()> {
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        File::open(parent)?.sync_all()?;
    }
    Ok(())
}

#[cfg(target_os = "windows")]
fn sync_parent_dir(_target: &Path) -> Result<()> {
    // MOVEFILE_WRITE_THROUGH already flushed the move
    Ok(())
}

/// Atomically moves the temporary file over the target.
///
/// Uses `MoveFileExW` with `MOVEFILE_WRITE_THROUGH` so the move is persisted
/// before returning; unlike `ReplaceFileW` it also works when the target does
/// not exist yet.
#[cfg(target_os = "windows")]
fn atomic_replace(tmp_path: &Path, target: &Path) -> Result<()> {
    use std::ffi::OsStr;
    use std::os::windows::ffi::OsStrExt;
    use windows_sys::Win32::Storage::FileSystem::{
        MOVEFILE_REPLACE_EXISTING, MOVEFILE_WRITE_THROUGH, MoveFileExW,
    };

    fn to_wide(s: &OsStr) -> Vec<u16> {
        s.encode_wide().chain(std::iter::once(0)).collect()
    }

    let target_w = to_wide(target.as_os_str());
    let tmp_w = to_wide(tmp_path.as_os_str());

    // SAFETY:
    // - Strings are valid UTF-16 and null-terminated
    // - Pointers remain valid during the call
    // - Windows does not retain the pointers after return
    let result = unsafe {
        MoveFileExW(
            tmp_w.as_ptr(),
            target_w.as_ptr(),
            MOVEFILE_REPLACE_EXISTING | MOVEFILE_WRITE_THROUGH,
        )
    };

    if result == 0 {
        return Err(io::Error::last_os_error().into());
    }

    Ok(())
}

/// Atomically replaces the target file with the temporary file.
///
/// On Unix, `rename()` is atomic when both paths are on the same filesystem.
#[cfg(not(target_os = "windows"))]
fn atomic_replace(tmp_path: &Path, target: &Path) -> Result<()> {
    fs::rename(tmp_path, target)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn dir_entries(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn commit_moves_data_into_place() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.enc");

        let mut out = AtomicFile::create(&path).unwrap();
        out.write_all(b"hello world").unwrap();
        out.commit().unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"hello world");
        assert_eq!(dir_entries(dir.path()), vec!["out.enc".to_string()]);
    }

    #[test]
    fn target_is_absent_until_commit() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.enc");

        let mut out = AtomicFile::create(&path).unwrap();
        out.write_all(b"partial").unwrap();

        assert!(!path.exists());
        assert!(out.tmp_path().exists());
        out.commit().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn dropping_uncommitted_file_removes_tmp() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.enc");

        {
            let mut out = AtomicFile::create(&path).unwrap();
            out.write_all(b"never visible").unwrap();
        }

        assert!(!path.exists());
        assert!(dir_entries(dir.path()).is_empty());
    }

    #[test]
    fn commit_replaces_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.enc");
        fs::write(&path, b"first").unwrap();

        let mut out = AtomicFile::create(&path).unwrap();
        out.write_all(b"second").unwrap();
        out.commit().unwrap();

        assert_eq!(fs::read(path).unwrap(), b"second");
    }

    #[test]
    fn failed_write_keeps_previous_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.enc");
        fs::write(&path, b"previous").unwrap();

        {
            let mut out = AtomicFile::create(&path).unwrap();
            out.write_all(b"half-written").unwrap();
        }

        assert_eq!(fs::read(path).unwrap(), b"previous");
    }

    #[test]
    fn random_tmp_path_has_same_parent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.enc");

        let tmp = random_tmp_path(&path).unwrap();

        assert_eq!(tmp.parent(), path.parent());
        assert_ne!(tmp, path);
    }

    #[test]
    fn tmp_names_are_unique() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.enc");

        let a = random_tmp_path(&path).unwrap();
        let b = random_tmp_path(&path).unwrap();

        assert_ne!(a, b);
    }

    #[test]
    fn parent_directory_is_created() {
        let dir = tempdir().unwrap();

        let nested = dir.path().join("a").join("b").join("c").join("out.enc");

        let out = AtomicFile::create(&nested).unwrap();
        out.commit().unwrap();

        assert!(nested.exists());
    }
}
