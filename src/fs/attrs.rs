//! Host metadata to DOS attributes and timestamps.
//!
//! Directories always report `DIR`. On drives that are not FAT-backed every
//! file reports `ARCHIVE`; on FAT-backed drives the real attribute byte is
//! read and written through the msdos ioctls.

use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::SystemTime;

use chrono::{DateTime, Datelike, Local, Timelike};
use tracing::warn;

use super::fcb::FcbName;

/// DOS attribute bits.
pub mod attr {
    pub const READ_ONLY: u8 = 0x01;
    pub const HIDDEN: u8 = 0x02;
    pub const SYSTEM: u8 = 0x04;
    pub const VOLUME: u8 = 0x08;
    pub const DIRECTORY: u8 = 0x10;
    pub const ARCHIVE: u8 = 0x20;

    /// Bits that can be stored on the host.
    pub const SETTABLE: u8 = READ_ONLY | HIDDEN | SYSTEM | ARCHIVE;
}

/// What a DOS client sees of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileProps {
    pub attr: u8,
    pub name: FcbName,
    /// Packed DOS timestamp, see [`time_to_dos`].
    pub time: u32,
    pub size: u32,
}

impl FileProps {
    /// attr, FCB name, time, size: the 20-byte block shared by find and open replies.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.attr);
        out.extend_from_slice(self.name.as_bytes());
        out.extend_from_slice(&self.time.to_le_bytes());
        out.extend_from_slice(&self.size.to_le_bytes());
    }
}

/// Pack a timestamp (local time) into the DOS layout:
/// `YYYYYYYM MMMDDDDD hhhhhmmm mmmsssss`, years from 1980, seconds halved.
pub fn time_to_dos(t: SystemTime) -> u32 {
    let local: DateTime<Local> = DateTime::from(t);
    let year = (local.year() - 1980).clamp(0, 127) as u32;
    (year << 25)
        | (local.month() << 21)
        | (local.day() << 16)
        | (local.hour() << 11)
        | (local.minute() << 5)
        | (local.second() / 2)
}

/// Stat `path` and describe it, naming it after its last component.
pub fn item_attr(path: &Path, dos_attrs: bool) -> io::Result<FileProps> {
    let name = path.file_name().map(|n| n.as_bytes()).unwrap_or(b"");
    item_attr_named(path, name, dos_attrs)
}

/// Like [`item_attr`] but with an explicit entry name (used for `.` and `..`).
pub fn item_attr_named(path: &Path, name: &[u8], dos_attrs: bool) -> io::Result<FileProps> {
    let meta = std::fs::metadata(path)?;
    let time = meta.modified().map(time_to_dos).unwrap_or(0);
    let name = FcbName::encode(name);

    if meta.is_dir() {
        return Ok(FileProps {
            attr: attr::DIRECTORY,
            name,
            time,
            size: 0,
        });
    }

    let attr = if dos_attrs { read_fat_attr(path) } else { attr::ARCHIVE };
    Ok(FileProps {
        attr,
        name,
        time,
        size: u32::try_from(meta.len()).unwrap_or(u32::MAX),
    })
}

/// Store the RO/HIDDEN/SYSTEM/ARCHIVE bits of `value` on a FAT-backed file.
pub fn set_item_attr(path: &Path, value: u8) -> io::Result<()> {
    let file = std::fs::File::open(path)?;
    fat::set_attributes(&file, (value & attr::SETTABLE) as u32)
}

fn read_fat_attr(path: &Path) -> u8 {
    let attrs = std::fs::File::open(path).and_then(|file| fat::get_attributes(&file));
    match attrs {
        Ok(a) => a as u8,
        Err(e) => {
            warn!("Failed to fetch attributes of {}: {}", path.display(), e);
            0
        }
    }
}

/// Whether `path` lives on a filesystem that stores DOS attributes.
pub fn supports_dos_attrs(path: &Path) -> bool {
    fat::is_fat(path)
}

/// Total and free bytes of the filesystem holding `path`.
pub fn disk_space(path: &Path) -> io::Result<(u64, u64)> {
    let st = nix::sys::statvfs::statvfs(path).map_err(io::Error::from)?;
    let total = st.blocks() as u64 * st.fragment_size() as u64;
    let free = st.blocks_free() as u64 * st.block_size() as u64;
    Ok((total, free))
}

#[cfg(target_os = "linux")]
mod fat {
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;
    use std::path::Path;

    use nix::sys::statfs::{statfs, MSDOS_SUPER_MAGIC};

    // FAT_IOCTL_GET_ATTRIBUTES / FAT_IOCTL_SET_ATTRIBUTES from <linux/msdos_fs.h>
    nix::ioctl_read!(fat_ioctl_get_attributes, b'r', 0x10, u32);
    nix::ioctl_write_ptr!(fat_ioctl_set_attributes, b'r', 0x11, u32);

    pub fn get_attributes(file: &File) -> io::Result<u32> {
        let mut value: u32 = 0;
        let res = unsafe { fat_ioctl_get_attributes(file.as_raw_fd(), &mut value) };
        res.map_err(io::Error::from)?;
        Ok(value)
    }

    pub fn set_attributes(file: &File, value: u32) -> io::Result<()> {
        let res = unsafe { fat_ioctl_set_attributes(file.as_raw_fd(), &value) };
        res.map_err(io::Error::from)?;
        Ok(())
    }

    pub fn is_fat(path: &Path) -> bool {
        statfs(path)
            .map(|st| st.filesystem_type() == MSDOS_SUPER_MAGIC)
            .unwrap_or(false)
    }
}

#[cfg(not(target_os = "linux"))]
mod fat {
    use std::fs::File;
    use std::io;
    use std::path::Path;

    pub fn get_attributes(_file: &File) -> io::Result<u32> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    pub fn set_attributes(_file: &File, _value: u32) -> io::Result<()> {
        Err(io::Error::from(io::ErrorKind::Unsupported))
    }

    pub fn is_fat(_path: &Path) -> bool {
        false
    }
}
