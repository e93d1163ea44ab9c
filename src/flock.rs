use std::{
    fs::File,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use fs4::fs_std::FileExt;
use log::{debug, trace};
use thiserror::Error;

use crate::error::StoreError;

/// Exclusive advisory lock, released when dropped.
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("{} is held by another process", .0.display())]
    Contended(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<Error> for StoreError {
    fn from(error: Error) -> Self {
        match error {
            Error::Io(error) => error.into(),
            contended => StoreError::Other(contended.to_string()),
        }
    }
}

impl FileLock {
    pub fn acquire(path: &Path, wait: Duration) -> Result<Self, Error> {
        let file = File::create(path)?;
        let start = Instant::now();
        loop {
            match file.try_lock_exclusive().map(LockOutcome::acquired) {
                Ok(true) => {
                    trace!("Locked {}", path.display());
                    return Ok(Self {
                        _file: file,
                        path: path.to_owned(),
                    });
                }
                Ok(false) => {}
                Err(error)
                    if error.raw_os_error() == fs4::lock_contended_error().raw_os_error() => {}
                Err(error) => return Err(error.into()),
            }
            if start.elapsed() >= wait {
                return Err(Error::Contended(path.to_owned()));
            }
            debug!("Failed to acquire a lock on {}, retrying", path.display());
            std::thread::sleep(Duration::from_millis(250).min(wait));
        }
    }
}

// fs4 releases disagree on whether contention is `Ok(false)` or an error.
trait LockOutcome {
    fn acquired(self) -> bool;
}

impl LockOutcome for () {
    fn acquired(self) -> bool {
        true
    }
}

impl LockOutcome for bool {
    fn acquired(self) -> bool {
        self
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        trace!("Releasing {}", self.path.display());
    }
}
