//! Named pipe endpoint.
//!
//! A FIFO pair serves one local client without a socket: requests are read
//! from one pipe and responses are written to the other. Both ends are
//! opened read-write so that opening never blocks and the read end never
//! reports EOF while the server is up.

use crate::connection::Transport;
use nix::errno::Errno;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Permission bits for newly created pipes
const FIFO_MODE: u32 = 0o765;

/// Errors raised while setting up the FIFO pair.
#[derive(Debug, Error)]
pub enum FifoError {
    #[error("failed to create fifo {path}: {source}")]
    Create { path: PathBuf, source: Errno },

    #[error("{0} exists and is not a fifo")]
    NotAFifo(PathBuf),

    #[error("failed to open fifo {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
}

/// Owns the pipe paths and unlinks them when dropped.
#[derive(Debug)]
pub struct Fifo {
    read_path: PathBuf,
    write_path: PathBuf,
}

impl Fifo {
    /// Creates (or reuses) both pipes and opens them non-blocking.
    ///
    /// # Arguments
    ///
    /// * `read_path` - Pipe the server reads requests from
    /// * `write_path` - Pipe the server writes responses to
    ///
    /// # Returns
    ///
    /// The path guard and the transport to register with a reactor.
    pub fn create(
        read_path: impl Into<PathBuf>,
        write_path: impl Into<PathBuf>,
    ) -> Result<(Self, Transport), FifoError> {
        let read_path = read_path.into();
        let write_path = write_path.into();

        make_fifo(&read_path)?;
        make_fifo(&write_path)?;
        // From here on the guard cleans up both paths on failure
        let fifo = Self {
            read_path,
            write_path,
        };

        let rx = open_nonblocking(&fifo.read_path)?;
        let tx = open_nonblocking(&fifo.write_path)?;

        info!(
            read = %fifo.read_path.display(),
            write = %fifo.write_path.display(),
            "FIFO endpoint ready"
        );
        Ok((fifo, Transport::pipe(rx, tx)))
    }

    pub fn read_path(&self) -> &Path {
        &self.read_path
    }

    pub fn write_path(&self) -> &Path {
        &self.write_path
    }
}

impl Drop for Fifo {
    fn drop(&mut self) {
        for path in [&self.read_path, &self.write_path] {
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "Removed fifo"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove fifo"),
            }
        }
    }
}

fn make_fifo(path: &Path) -> Result<(), FifoError> {
    match mkfifo(path, Mode::from_bits_truncate(FIFO_MODE as _)) {
        Ok(()) => Ok(()),
        Err(Errno::EEXIST) => {
            let is_fifo = fs::metadata(path)
                .map(|meta| meta.file_type().is_fifo())
                .unwrap_or(false);
            if is_fifo {
                debug!(path = %path.display(), "Reusing existing fifo");
                Ok(())
            } else {
                Err(FifoError::NotAFifo(path.to_path_buf()))
            }
        }
        Err(source) => Err(FifoError::Create {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn open_nonblocking(path: &Path) -> Result<File, FifoError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .map_err(|source| FifoError::Open {
            path: path.to_path_buf(),
            source,
        })
}
