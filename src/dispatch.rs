//! Request processing: one received frame in, at most one reply frame out.

use std::ffi::OsStr;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use crate::config::{drive_letter, Drive, DriveMap, FIRST_DRIVE};
use crate::error::DosError;
use crate::fs::attrs::{self, attr, FileProps};
use crate::fs::fcb::FcbName;
use crate::fs::items::{ItemTable, NO_ITEM};
use crate::fs::resolve::{self, normalize, resolve};
use crate::proto::{
    format_mac, hexdump, Frame, FrameError, MacAddr, OpenArgs, Opcode, ReplyFrame, Request,
    HEADER_LEN, MAX_FRAME_LEN,
};
use crate::state::AnswerCache;

/// DOS gets confused by disks of 2 GiB and more.
const DISK_SIZE_LIMIT: u64 = 2 * 1024 * 1024 * 1024 - 1;
/// Reported bytes per sector; with one sector per cluster sizes are in 32 KiB units.
const SECTOR_SIZE: u16 = 32768;
const SECTOR_SHIFT: u32 = 15;

/// SPOPNFIL result sub-codes.
mod open_result {
    pub const OPENED: u16 = 1;
    pub const CREATED: u16 = 2;
    pub const TRUNCATED: u16 = 3;
}

/// Result word and payload of a processed request.
#[derive(Debug)]
struct Outcome {
    ax: u16,
    payload: Vec<u8>,
}

impl Outcome {
    fn ok() -> Self {
        Self::with(Vec::new())
    }

    fn with(payload: Vec<u8>) -> Self {
        Self { ax: 0, payload }
    }

    fn fail(err: DosError) -> Self {
        Self {
            ax: err.code(),
            payload: Vec::new(),
        }
    }
}

type OpResult = std::result::Result<Outcome, DosError>;

/// Owns every table a request can touch. Not shared between threads.
pub struct Dispatcher {
    mac: MacAddr,
    drives: DriveMap,
    answers: AnswerCache,
    items: ItemTable,
}

impl Dispatcher {
    pub fn new(mac: MacAddr, drives: DriveMap) -> Self {
        Self::with_items(mac, drives, ItemTable::new())
    }

    pub fn with_items(mac: MacAddr, drives: DriveMap, items: ItemTable) -> Self {
        Self {
            mac,
            drives,
            answers: AnswerCache::new(),
            items,
        }
    }

    pub fn mac(&self) -> &MacAddr {
        &self.mac
    }

    pub fn answers(&self) -> &AnswerCache {
        &self.answers
    }

    pub fn items(&self) -> &ItemTable {
        &self.items
    }

    /// Process one received frame. Returns the reply to transmit, or `None`
    /// if the frame is dropped.
    pub fn handle_frame(&mut self, buf: &[u8]) -> Option<&[u8]> {
        let frame = match Frame::parse(buf, &self.mac) {
            Ok(frame) => frame,
            Err(FrameError::NotForUs(dst)) => {
                trace!("ignoring frame for {}", dst);
                return None;
            }
            Err(e) => {
                warn!("Dropping frame: {}", e);
                return None;
            }
        };
        trace!("received {} bytes:\n{}", frame.len(), hexdump(frame.as_bytes()));

        let src = frame.src();
        let seq = frame.sequence();
        if self.answers.contains_reply(&src, seq) {
            debug!("replay(mac={}, seq={})", format_mac(&src), seq);
            return self.answers.replay(&src, seq);
        }

        let Some(reply) = self.process(&frame) else {
            self.answers.forget(&src);
            return None;
        };
        trace!("sending {} bytes:\n{}", reply.len(), hexdump(&reply));
        Some(self.answers.store(&src, &reply))
    }

    fn process(&mut self, frame: &Frame<'_>) -> Option<Vec<u8>> {
        let index = frame.drive();
        if !(FIRST_DRIVE..26).contains(&index) {
            warn!("Invalid drive value: {:#04x}", index);
            return None;
        }
        let Some(drive) = self.drives.get(index).cloned() else {
            warn!("Unknown drive {}: ({:#04x})", drive_letter(index), index);
            return None;
        };

        let opcode = match Opcode::try_from(frame.opcode()) {
            Ok(op) => op,
            Err(code) => {
                debug!("Ignoring unknown query {:#04x}", code);
                return None;
            }
        };
        let Some(request) = Request::parse(opcode, frame.payload()) else {
            debug!(
                "Ignoring query {:?} with {}-byte payload",
                opcode,
                frame.payload().len()
            );
            return None;
        };

        let outcome = self.execute(&drive, request)?;
        let mut reply = ReplyFrame::for_request(frame, &self.mac);
        reply.set_result(outcome.ax);
        reply.extend_payload(&outcome.payload);
        Some(reply.finish(frame.checksum_enabled()))
    }

    fn execute(&mut self, drive: &Drive, request: Request<'_>) -> Option<Outcome> {
        let result = match request {
            Request::DiskSpace => Ok(disk_space(drive)),
            Request::ReadFile { offset, id, len } => self.read_file(id, offset, len),
            Request::WriteFile { offset, id, data } => self.write_file(id, offset, data),
            Request::LockFile | Request::UnlockFile => {
                debug!("lock/unlock (no-op)");
                Ok(Outcome::ok())
            }
            Request::CloseFile => {
                debug!("close_file");
                Ok(Outcome::ok())
            }
            Request::FindFirst { attr, path } => self.find_first(drive, attr, path),
            Request::FindNext {
                dir_id,
                cursor,
                attr,
                mask,
            } => self.find_next(drive, dir_id, cursor, attr, FcbName::from_bytes(mask)),
            Request::MakeDir { path } => make_dir(drive, path),
            Request::RemoveDir { path } => remove_dir(drive, path),
            Request::ChangeDir { path } => change_dir(drive, path),
            Request::SetAttr { attr, path } => set_attr(drive, attr, path),
            Request::GetAttr { path } => get_attr(drive, path),
            Request::Rename { src, dst } => rename(drive, src, dst),
            Request::Delete { path } => delete(drive, path),
            Request::Open(args) => return self.open(drive, Opcode::Open, args),
            Request::Create(args) => return self.open(drive, Opcode::Create, args),
            Request::SpecialOpen(args) => return self.open(drive, Opcode::SpecialOpen, args),
            Request::SeekFromEnd { offset, id } => self.seek_from_end(id, offset),
        };
        Some(result.unwrap_or_else(Outcome::fail))
    }

    fn item_path(&self, id: u16) -> Option<PathBuf> {
        self.items.path(id).map(Path::to_path_buf)
    }

    fn read_file(&mut self, id: u16, offset: u32, len: u16) -> OpResult {
        debug!("read_file(id={}, offset={}, len={})", id, offset, len);
        let path = self.item_path(id).ok_or(DosError::AccessDenied)?;
        self.items.touch(id);

        let len = (len as usize).min(MAX_FRAME_LEN - HEADER_LEN);
        let mut data = Vec::with_capacity(len);
        File::open(&path)
            .and_then(|mut f| {
                f.seek(SeekFrom::Start(offset as u64))?;
                f.take(len as u64).read_to_end(&mut data)
            })
            .map_err(|e| {
                warn!("read {}: {}", path.display(), e);
                DosError::AccessDenied
            })?;
        Ok(Outcome::with(data))
    }

    fn write_file(&mut self, id: u16, offset: u32, data: &[u8]) -> OpResult {
        debug!("write_file(id={}, offset={}, len={})", id, offset, data.len());
        let path = self.item_path(id).ok_or(DosError::AccessDenied)?;
        self.items.touch(id);

        // A zero-length write sets the file size to `offset`.
        if data.is_empty() {
            let res = OpenOptions::new()
                .write(true)
                .open(&path)
                .and_then(|f| f.set_len(offset as u64));
            res.map_err(|e| {
                warn!("truncate {} to {}: {}", path.display(), offset, e);
                DosError::AccessDenied
            })?;
            return Ok(Outcome::with(0u16.to_le_bytes().to_vec()));
        }

        OpenOptions::new()
            .write(true)
            .open(&path)
            .and_then(|mut f| {
                f.seek(SeekFrom::Start(offset as u64))?;
                f.write_all(data)
            })
            .map_err(|e| {
                warn!("write {}: {}", path.display(), e);
                DosError::AccessDenied
            })?;
        Ok(Outcome::with((data.len() as u16).to_le_bytes().to_vec()))
    }

    fn find_first(&mut self, drive: &Drive, max_attr: u8, path: &[u8]) -> OpResult {
        let (dir, mask) = resolve::split_search(path);
        let mask = FcbName::encode(&mask);
        debug!(
            "find_first(dir={}, mask={}, attr={:#04x})",
            String::from_utf8_lossy(&dir),
            mask,
            max_attr
        );

        let host_dir = resolve(&drive.root, &dir).map_err(|e| {
            debug!("find_first: {}", e);
            DosError::NoMoreFiles
        })?;
        let id = self.items.get_id(&host_dir);
        if id == NO_ITEM {
            return Err(DosError::NoMoreFiles);
        }
        self.find_from(drive, &host_dir, id, 0, max_attr, mask)
    }

    fn find_next(&mut self, drive: &Drive, id: u16, cursor: u16, max_attr: u8, mask: FcbName) -> OpResult {
        debug!("find_next(id={}, cursor={}, mask={}, attr={:#04x})", id, cursor, mask, max_attr);
        let host_dir = self.item_path(id).ok_or(DosError::NoMoreFiles)?;
        self.find_from(drive, &host_dir, id, cursor, max_attr, mask)
    }

    fn find_from(
        &mut self,
        drive: &Drive,
        host_dir: &Path,
        id: u16,
        mut cursor: u16,
        max_attr: u8,
        mask: FcbName,
    ) -> OpResult {
        let in_root = resolve::is_root_dir(&drive.root, host_dir);
        let props = self
            .items
            .find(id, &mask, max_attr, &mut cursor, in_root, drive.dos_attrs)
            .ok_or(DosError::NoMoreFiles)?;
        debug!("found {} (attr {:#04x}) at {}", props.name, props.attr, cursor);

        let mut payload = Vec::with_capacity(24);
        props.encode_into(&mut payload);
        payload.extend_from_slice(&id.to_le_bytes());
        payload.extend_from_slice(&cursor.to_le_bytes());
        Ok(Outcome::with(payload))
    }

    /// OPEN, CREATE and SPOPNFIL. Returns `None` when no identifier can be
    /// allocated, which drops the request.
    fn open(&mut self, drive: &Drive, op: Opcode, args: OpenArgs<'_>) -> Option<Outcome> {
        match open_target(drive, op, args) {
            Ok((target, props, sub, mode)) => {
                let id = self.items.get_id(&target);
                if id == NO_ITEM {
                    warn!("failed to allocate an identifier for {}", target.display());
                    return None;
                }
                debug!("opened {} as id {} (sub {}, mode {:#04x})", target.display(), id, sub, mode);

                let mut payload = Vec::with_capacity(25);
                props.encode_into(&mut payload);
                payload.extend_from_slice(&id.to_le_bytes());
                payload.extend_from_slice(&sub.to_le_bytes());
                payload.push(mode);
                Some(Outcome::with(payload))
            }
            Err(e) => Some(Outcome::fail(e)),
        }
    }

    fn seek_from_end(&mut self, id: u16, offset: i32) -> OpResult {
        debug!("seek_from_end(id={}, offset={})", id, offset);
        let path = self.item_path(id).ok_or(DosError::FileNotFound)?;
        let size = std::fs::metadata(&path)
            .map_err(|_| DosError::FileNotFound)?
            .len()
            .min(u32::MAX as u64) as i64;
        let pos = (size + offset.min(0) as i64).max(0) as u32;
        Ok(Outcome::with(pos.to_le_bytes().to_vec()))
    }
}

/// Locate or create the file an OPEN-family request refers to.
fn open_target(
    drive: &Drive,
    op: Opcode,
    args: OpenArgs<'_>,
) -> std::result::Result<(PathBuf, FileProps, u16, u8), DosError> {
    let (dir, fname) = resolve::split_search(args.path);
    debug!(
        "{:?}(dir={}, name={}, stack={:#06x}, action={:#06x}, mode={:#06x})",
        op,
        String::from_utf8_lossy(&dir),
        String::from_utf8_lossy(&fname),
        args.stack_word,
        args.action,
        args.open_mode
    );

    let host_dir = match resolve(&drive.root, &dir) {
        Ok(d) if d.is_dir() => d,
        _ => return Err(DosError::PathNotFound),
    };
    if fname.is_empty() || fname == b"." || fname == b".." {
        return Err(DosError::FileNotFound);
    }

    let mut full = dir;
    full.extend_from_slice(&fname);
    let target = match resolve(&drive.root, &full) {
        Ok(existing) => existing,
        Err(_) => host_dir.join(OsStr::from_bytes(&fname)),
    };

    let create_attr = (args.stack_word & 0xFF) as u8;
    let existing = attrs::item_attr(&target, drive.dos_attrs).ok();
    let is_file = |p: &FileProps| p.attr & (attr::VOLUME | attr::DIRECTORY) == 0;

    let (props, sub, mode) = match op {
        Opcode::Create => (create_file(&target, create_attr, drive.dos_attrs)?, 0, 2),
        Opcode::SpecialOpen => {
            let mode = (args.open_mode & 0x7F) as u8;
            match existing {
                None if args.action & 0xF0 == 0x10 => (
                    create_file(&target, create_attr, drive.dos_attrs)?,
                    open_result::CREATED,
                    mode,
                ),
                Some(props) if is_file(&props) => match args.action & 0x0F {
                    1 => (props, open_result::OPENED, mode),
                    2 => (
                        create_file(&target, create_attr, drive.dos_attrs)?,
                        open_result::TRUNCATED,
                        mode,
                    ),
                    _ => return Err(DosError::FileNotFound),
                },
                _ => return Err(DosError::FileNotFound),
            }
        }
        _ => match existing {
            Some(props) if is_file(&props) => (props, 0, (args.stack_word & 0xFF) as u8),
            _ => return Err(DosError::FileNotFound),
        },
    };
    Ok((target, props, sub, mode))
}

/// Byte count in 32 KiB clusters, clamped below 2 GiB.
fn clusters(bytes: u64) -> u16 {
    (bytes.min(DISK_SIZE_LIMIT) >> SECTOR_SHIFT) as u16
}

fn disk_space(drive: &Drive) -> Outcome {
    let (total, free) = attrs::disk_space(&drive.root).unwrap_or_else(|e| {
        warn!("statvfs {}: {}", drive.root.display(), e);
        (0, 0)
    });
    let (total, free) = (clusters(total), clusters(free));
    debug!("disk_space(root={}) -> total={} free={}", drive.root.display(), total, free);

    let mut payload = Vec::with_capacity(6);
    payload.extend_from_slice(&total.to_le_bytes());
    payload.extend_from_slice(&SECTOR_SIZE.to_le_bytes());
    payload.extend_from_slice(&free.to_le_bytes());
    // AX carries sectors per cluster.
    Outcome { ax: 1, payload }
}

fn make_dir(drive: &Drive, path: &[u8]) -> OpResult {
    let path = normalize(path);
    debug!("make_dir(path={})", String::from_utf8_lossy(&path));
    let target = match resolve(&drive.root, &path) {
        Ok(existing) => {
            warn!("mkdir {}: already exists", existing.display());
            return Err(DosError::GeneralFailure);
        }
        Err(e) => e.creatable().map(Path::to_path_buf).ok_or(DosError::GeneralFailure)?,
    };
    std::fs::create_dir(&target).map_err(|e| {
        warn!("mkdir {}: {}", target.display(), e);
        DosError::GeneralFailure
    })?;
    Ok(Outcome::ok())
}

fn remove_dir(drive: &Drive, path: &[u8]) -> OpResult {
    let path = normalize(path);
    debug!("remove_dir(path={})", String::from_utf8_lossy(&path));
    let target = resolve(&drive.root, &path).map_err(|_| DosError::GeneralFailure)?;
    std::fs::remove_dir(&target).map_err(|e| {
        warn!("rmdir {}: {}", target.display(), e);
        DosError::GeneralFailure
    })?;
    Ok(Outcome::ok())
}

fn change_dir(drive: &Drive, path: &[u8]) -> OpResult {
    let path = normalize(path);
    debug!("change_dir(path={})", String::from_utf8_lossy(&path));
    match resolve(&drive.root, &path) {
        Ok(dir) if dir.is_dir() => Ok(Outcome::ok()),
        _ => Err(DosError::PathNotFound),
    }
}

fn set_attr(drive: &Drive, value: u8, path: &[u8]) -> OpResult {
    let path = normalize(path);
    debug!("set_attr(path={}, attr={:#04x})", String::from_utf8_lossy(&path), value);
    let target = resolve(&drive.root, &path).map_err(|_| DosError::FileNotFound)?;
    if drive.dos_attrs {
        attrs::set_item_attr(&target, value).map_err(|e| {
            warn!("set attributes of {}: {}", target.display(), e);
            DosError::FileNotFound
        })?;
    }
    Ok(Outcome::ok())
}

fn get_attr(drive: &Drive, path: &[u8]) -> OpResult {
    let path = normalize(path);
    debug!("get_attr(path={})", String::from_utf8_lossy(&path));
    let target = resolve(&drive.root, &path).map_err(|_| DosError::FileNotFound)?;
    let props = attrs::item_attr(&target, drive.dos_attrs).map_err(|_| DosError::FileNotFound)?;

    let mut payload = Vec::with_capacity(9);
    payload.extend_from_slice(&props.time.to_le_bytes());
    payload.extend_from_slice(&props.size.to_le_bytes());
    payload.push(props.attr);
    Ok(Outcome::with(payload))
}

fn rename(drive: &Drive, src: &[u8], dst: &[u8]) -> OpResult {
    if src.is_empty() {
        return Err(DosError::FileNotFound);
    }
    let (src, dst) = (normalize(src), normalize(dst));
    debug!(
        "rename(src={}, dst={})",
        String::from_utf8_lossy(&src),
        String::from_utf8_lossy(&dst)
    );

    let from = resolve(&drive.root, &src).map_err(|_| DosError::FileNotFound)?;
    let to = match resolve(&drive.root, &dst) {
        Ok(existing) => {
            debug!("rename: {} exists already", existing.display());
            return Err(DosError::AccessDenied);
        }
        Err(e) => e.creatable().map(Path::to_path_buf).ok_or(DosError::AccessDenied)?,
    };
    std::fs::rename(&from, &to).map_err(|e| {
        warn!("rename {} -> {}: {}", from.display(), to.display(), e);
        DosError::AccessDenied
    })?;
    Ok(Outcome::ok())
}

fn delete(drive: &Drive, path: &[u8]) -> OpResult {
    let path = normalize(path);
    debug!("delete(path={})", String::from_utf8_lossy(&path));

    let cut = path.iter().rposition(|&c| c == b'/').map(|i| i + 1).unwrap_or(0);
    let (dir, name) = path.split_at(cut);
    let mask = FcbName::encode(name);
    if mask.has_wildcards() {
        let host_dir = resolve(&drive.root, dir).map_err(|_| DosError::FileNotFound)?;
        return match delete_matching(&host_dir, &mask, drive.dos_attrs) {
            0 => Err(DosError::FileNotFound),
            _ => Ok(Outcome::ok()),
        };
    }

    let target = resolve(&drive.root, &path).map_err(|_| DosError::FileNotFound)?;
    let props = attrs::item_attr(&target, drive.dos_attrs).map_err(|_| DosError::FileNotFound)?;
    if props.attr & attr::READ_ONLY != 0 {
        return Err(DosError::AccessDenied);
    }
    std::fs::remove_file(&target).map_err(|e| {
        debug!("delete {}: {}", target.display(), e);
        DosError::FileNotFound
    })?;
    Ok(Outcome::ok())
}

/// Remove every non-directory, writable entry of `dir` matching `mask`.
fn delete_matching(dir: &Path, mask: &FcbName, dos_attrs: bool) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let mut removed = 0;
    for entry in entries.flatten() {
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(true) {
            continue;
        }
        if !mask.matches(&FcbName::encode(entry.file_name().as_bytes())) {
            continue;
        }
        let path = entry.path();
        if dos_attrs
            && attrs::item_attr(&path, true)
                .map(|p| p.attr & attr::READ_ONLY != 0)
                .unwrap_or(false)
        {
            debug!("delete: skipping read-only {}", path.display());
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("failed to delete {}: {}", path.display(), e),
        }
    }
    removed
}

/// Create or truncate `path`, then describe it.
fn create_file(path: &Path, value: u8, dos_attrs: bool) -> std::result::Result<FileProps, DosError> {
    File::create(path).map_err(|e| {
        debug!("create {}: {}", path.display(), e);
        DosError::FileNotFound
    })?;
    if dos_attrs {
        if let Err(e) = attrs::set_item_attr(path, value) {
            warn!("failed to set attribute {:#04x} on {}: {}", value, path.display(), e);
        }
    }
    attrs::item_attr(path, dos_attrs).map_err(|_| DosError::FileNotFound)
}
