//! Single-instance guard.
//!
//! Two drivers working the same store would start the same source twice, so
//! the binary takes an exclusive advisory lock on a PID file before opening
//! the store. The lock belongs to the open file handle: the OS drops it when
//! the process exits, however it exits, so a file left behind by a killed
//! driver is simply taken over on the next start.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another instance holds {path} (pid {pid})")]
    Locked { path: PathBuf, pid: String },

    #[error("failed to create lock file {path}: {source}")]
    CreateFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to lock {path}: {source}")]
    AcquireFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Held for as long as the driver runs. Dropping it releases the lock; the
/// file itself stays on disk.
#[derive(Debug)]
pub struct PidLock {
    file: File,
    path: PathBuf,
}

impl PidLock {
    /// Opens (or creates) `path`, locks it without blocking and writes this
    /// process's id into it.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self, LockError> {
        let path = path.as_ref().to_path_buf();
        let create_failed = |source| LockError::CreateFailed {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(create_failed)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(create_failed)?;

        // fs2's method, not the std one added in newer toolchains
        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            if is_contended(&e) {
                let pid = holder_pid(&mut file);
                debug!(path = %path.display(), pid = %pid, "Pid lock is held elsewhere");
                return Err(LockError::Locked {
                    path: path.clone(),
                    pid,
                });
            }
            return Err(LockError::AcquireFailed {
                path: path.clone(),
                source: e,
            });
        }

        let pid = std::process::id();
        file.set_len(0)
            .and_then(|()| writeln!(file, "{pid}"))
            .and_then(|()| file.flush())
            .map_err(create_failed)?;
        info!(path = %path.display(), pid, "Acquired pid lock");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        // Closing the handle releases the lock as well.
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(path = %self.path.display(), error = %e, "Unlock failed, closing handle");
        } else {
            debug!(path = %self.path.display(), "Released pid lock");
        }
    }
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

fn holder_pid(file: &mut File) -> String {
    let mut contents = String::new();
    match file.read_to_string(&mut contents) {
        Ok(_) => contents.trim().to_string(),
        Err(_) => String::new(),
    }
}
