use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{EthersrvError, Result};
use crate::fs::attrs::supports_dos_attrs;

/// Number of DOS drive letters, A: to Z:.
pub const DRIVE_COUNT: usize = 26;
/// Index of the first drive letter served (C:).
pub const FIRST_DRIVE: u8 = 2;
/// Most roots that fit between C: and Z:.
pub const MAX_ROOTS: usize = DRIVE_COUNT - FIRST_DRIVE as usize;

#[derive(Parser, Debug)]
#[command(
    name = "ethersrv",
    version,
    about = "EtherDFS server: shares host directories with DOS clients over raw Ethernet"
)]
pub struct Cli {
    /// Network interface to listen on
    pub interface: String,

    /// Directories to share, mapped to C:, D:, ... in order
    #[arg(required = true, num_args = 1..=MAX_ROOTS)]
    pub roots: Vec<PathBuf>,

    /// Run in foreground (don't daemonize)
    #[arg(short, long)]
    pub foreground: bool,

    /// Lock file guarding against a second instance
    #[arg(long, default_value = "/var/run/ethersrv.lock")]
    pub lock_file: PathBuf,

    /// Also write logs to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Seconds between heartbeat ticks while idle (0 disables)
    #[arg(long, default_value_t = 10)]
    pub heartbeat_secs: u64,
}

/// A shared directory as seen by DOS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drive {
    pub root: PathBuf,
    /// The root lives on a filesystem that stores DOS attributes.
    pub dos_attrs: bool,
}

impl Drive {
    pub fn new(root: impl Into<PathBuf>, dos_attrs: bool) -> Self {
        Self {
            root: root.into(),
            dos_attrs,
        }
    }
}

/// Drive index (0 = A:) to shared directory.
#[derive(Debug, Clone, Default)]
pub struct DriveMap {
    drives: [Option<Drive>; DRIVE_COUNT],
}

impl DriveMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map every root, in order, starting at C:. Roots are canonicalised
    /// and probed for DOS attribute support.
    pub fn from_roots(roots: &[PathBuf]) -> Result<Self> {
        if roots.is_empty() || roots.len() > MAX_ROOTS {
            return Err(EthersrvError::Config(format!(
                "between 1 and {} shared directories are supported, got {}",
                MAX_ROOTS,
                roots.len()
            )));
        }
        let mut map = Self::new();
        for (i, root) in roots.iter().enumerate() {
            let canonical = std::fs::canonicalize(root).map_err(|e| {
                EthersrvError::Config(format!("shared directory {}: {}", root.display(), e))
            })?;
            if !canonical.is_dir() {
                return Err(EthersrvError::Config(format!(
                    "shared path is not a directory: {}",
                    canonical.display()
                )));
            }
            let dos_attrs = supports_dos_attrs(&canonical);
            map.insert(FIRST_DRIVE + i as u8, Drive::new(canonical, dos_attrs));
        }
        Ok(map)
    }

    pub fn insert(&mut self, index: u8, drive: Drive) {
        if let Some(slot) = self.drives.get_mut(index as usize) {
            *slot = Some(drive);
        }
    }

    pub fn get(&self, index: u8) -> Option<&Drive> {
        self.drives.get(index as usize)?.as_ref()
    }

    /// Mapped drives with their letters.
    pub fn iter(&self) -> impl Iterator<Item = (char, &Drive)> {
        self.drives
            .iter()
            .enumerate()
            .filter_map(|(i, d)| d.as_ref().map(|d| (drive_letter(i as u8), d)))
    }
}

pub fn drive_letter(index: u8) -> char {
    (b'A' + index.min(25)) as char
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub interface: String,
    pub drives: DriveMap,
    pub foreground: bool,
    pub lock_file: PathBuf,
    pub log_file: Option<PathBuf>,
    /// Poll timeout; `None` waits forever.
    pub heartbeat: Option<Duration>,
}

impl ServerConfig {
    pub fn from_cli(cli: Cli) -> Result<Self> {
        let drives = DriveMap::from_roots(&cli.roots)?;
        Ok(Self {
            interface: cli.interface,
            drives,
            foreground: cli.foreground,
            lock_file: cli.lock_file,
            log_file: cli.log_file,
            heartbeat: (cli.heartbeat_secs > 0).then(|| Duration::from_secs(cli.heartbeat_secs)),
        })
    }

    pub fn log_file(&self) -> Option<&Path> {
        self.log_file.as_deref()
    }
}
