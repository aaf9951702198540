//! Process plumbing: single-instance lock, daemonization and signal
//! notification through a self-pipe.

use std::fs::{File, OpenOptions};
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, Ordering};

use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::{signal, SigHandler, Signal};
use nix::unistd::{fork, ForkResult};
use tracing::warn;

use crate::error::{EthersrvError, Result};

/// Exclusive lock on a file, held for the life of the server. The file is
/// removed when the lock is dropped.
pub struct LockFile {
    path: PathBuf,
    _lock: Flock<File>,
}

impl LockFile {
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| EthersrvError::Lock(format!("{}: {}", path.display(), e)))?;
        let lock = Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_, errno)| {
            EthersrvError::Lock(format!(
                "{} is locked, is another instance running? ({})",
                path.display(),
                errno
            ))
        })?;
        Ok(Self {
            path: path.to_path_buf(),
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!("Failed to remove lock file {}: {}", self.path.display(), e);
        }
    }
}

/// Detach into the background: ignore SIGHUP and fork. Only the child returns.
pub fn daemonize() -> Result<()> {
    let res = unsafe { signal(Signal::SIGHUP, SigHandler::SigIgn) };
    res.map_err(|e| EthersrvError::Io(e.into()))?;
    match unsafe { fork() }.map_err(|e| EthersrvError::Io(e.into()))? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => Ok(()),
    }
}

/// Write-end of the self-pipe used for signal notification.
static SIGNAL_PIPE: AtomicI32 = AtomicI32::new(-1);

extern "C" fn signal_handler(_sig: libc::c_int) {
    let fd = SIGNAL_PIPE.load(Ordering::Relaxed);
    if fd >= 0 {
        unsafe {
            libc::write(fd, [0u8].as_ptr() as *const libc::c_void, 1);
        }
    }
}

/// Becomes readable once SIGINT, SIGTERM or SIGQUIT has been received.
pub struct ShutdownSignal {
    read: OwnedFd,
    _write: OwnedFd,
}

impl ShutdownSignal {
    pub fn install() -> Result<Self> {
        let (read, write) = nix::unistd::pipe().map_err(|e| EthersrvError::Io(e.into()))?;
        SIGNAL_PIPE.store(write.as_raw_fd(), Ordering::Relaxed);

        for sig in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGQUIT] {
            let res = unsafe { signal(sig, SigHandler::Handler(signal_handler)) };
            res.map_err(|e| EthersrvError::Io(e.into()))?;
        }
        Ok(Self {
            read,
            _write: write,
        })
    }
}

impl AsRawFd for ShutdownSignal {
    fn as_raw_fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }
}

impl Drop for ShutdownSignal {
    fn drop(&mut self) {
        SIGNAL_PIPE.store(-1, Ordering::Relaxed);
        for sig in [Signal::SIGINT, Signal::SIGTERM, Signal::SIGQUIT] {
            let _ = unsafe { signal(sig, SigHandler::SigDfl) };
        }
    }
}
