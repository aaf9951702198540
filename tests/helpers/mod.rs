use std::path::{Path, PathBuf};

use ethersrv::config::{Drive, DriveMap};
use ethersrv::dispatch::Dispatcher;
use ethersrv::fs::ItemTable;
use ethersrv::proto::frame::offset;
use ethersrv::proto::{bsd_sum, read_le16, MacAddr, ETHERTYPE_DFS, HEADER_LEN, PROTOCOL_VERSION};

pub const SERVER_MAC: MacAddr = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
pub const CLIENT_MAC: MacAddr = [0x02, 0x00, 0x00, 0x00, 0x00, 0x42];

/// Drive index of C:.
pub const DRIVE_C: u8 = 2;

/// Opcodes, as sent on the wire.
pub mod op {
    pub const RMDIR: u8 = 0x01;
    pub const MKDIR: u8 = 0x03;
    pub const CHDIR: u8 = 0x05;
    pub const CLSFIL: u8 = 0x06;
    pub const READFIL: u8 = 0x08;
    pub const WRITEFIL: u8 = 0x09;
    pub const LOCKFIL: u8 = 0x0A;
    pub const DISKSPACE: u8 = 0x0C;
    pub const SETATTR: u8 = 0x0E;
    pub const GETATTR: u8 = 0x0F;
    pub const RENAME: u8 = 0x11;
    pub const DELETE: u8 = 0x13;
    pub const OPEN: u8 = 0x16;
    pub const CREATE: u8 = 0x17;
    pub const FINDFIRST: u8 = 0x1B;
    pub const FINDNEXT: u8 = 0x1C;
    pub const SKFMEND: u8 = 0x21;
    pub const SPOPNFIL: u8 = 0x2E;
}

/// Build a request frame.
pub fn frame(src: &MacAddr, seq: u8, drive: u8, opcode: u8, payload: &[u8], checksum: bool) -> Vec<u8> {
    let mut buf = vec![0u8; HEADER_LEN];
    buf[offset::DST..offset::DST + 6].copy_from_slice(&SERVER_MAC);
    buf[offset::SRC..offset::SRC + 6].copy_from_slice(src);
    buf[offset::ETHERTYPE..offset::ETHERTYPE + 2].copy_from_slice(&ETHERTYPE_DFS.to_be_bytes());
    buf[offset::VERSION] = PROTOCOL_VERSION;
    buf[offset::SEQUENCE] = seq;
    buf[offset::DRIVE] = drive;
    buf[offset::OPCODE] = opcode;
    buf.extend_from_slice(payload);

    let len = buf.len() as u16;
    buf[offset::LENGTH..offset::LENGTH + 2].copy_from_slice(&len.to_le_bytes());
    if checksum {
        buf[offset::VERSION] |= 0x80;
        let sum = bsd_sum(&buf[offset::VERSION..]);
        buf[offset::CHECKSUM..offset::CHECKSUM + 2].copy_from_slice(&sum.to_le_bytes());
    }
    buf
}

/// A decoded reply frame.
#[derive(Debug, Clone)]
pub struct Reply(pub Vec<u8>);

impl Reply {
    pub fn ax(&self) -> u16 {
        read_le16(&self.0, offset::RESULT)
    }

    pub fn payload(&self) -> &[u8] {
        &self.0[HEADER_LEN..]
    }

    pub fn word(&self, at: usize) -> u16 {
        read_le16(self.payload(), at)
    }

    pub fn dword(&self, at: usize) -> u32 {
        ethersrv::proto::read_le32(self.payload(), at)
    }

    pub fn fcb_name(&self) -> String {
        String::from_utf8_lossy(&self.payload()[1..12]).into_owned()
    }
}

/// A dispatcher serving a temporary directory as C:.
pub struct TestServer {
    pub root: tempfile::TempDir,
    pub dispatcher: Dispatcher,
    seq: u8,
}

impl TestServer {
    pub fn new() -> Self {
        Self::with_items(ItemTable::new())
    }

    pub fn with_items(items: ItemTable) -> Self {
        let root = tempfile::tempdir().expect("failed to create root dir");
        let mut drives = DriveMap::new();
        drives.insert(DRIVE_C, Drive::new(root.path(), false));
        let dispatcher = Dispatcher::with_items(SERVER_MAC, drives, items);
        TestServer {
            root,
            dispatcher,
            seq: 0,
        }
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn host(&self, rel: &str) -> PathBuf {
        self.root.path().join(rel)
    }

    /// Send a raw frame, returning the reply bytes if one was produced.
    pub fn send(&mut self, frame: &[u8]) -> Option<Reply> {
        self.dispatcher.handle_frame(frame).map(|r| Reply(r.to_vec()))
    }

    /// Send a fresh request (new sequence number) on C:.
    pub fn request(&mut self, opcode: u8, payload: &[u8]) -> Option<Reply> {
        self.seq = self.seq.wrapping_add(1);
        let f = frame(&CLIENT_MAC, self.seq, DRIVE_C, opcode, payload, false);
        self.send(&f)
    }

    /// Like [`request`](Self::request) but panics if the frame is dropped.
    pub fn call(&mut self, opcode: u8, payload: &[u8]) -> Reply {
        self.request(opcode, payload)
            .unwrap_or_else(|| panic!("request {:#04x} was dropped", opcode))
    }

    /// OPEN/CREATE/SPOPNFIL; returns the reply.
    pub fn open(&mut self, opcode: u8, stack_word: u16, action: u16, mode: u16, path: &str) -> Reply {
        let mut p = Vec::new();
        p.extend_from_slice(&stack_word.to_le_bytes());
        p.extend_from_slice(&action.to_le_bytes());
        p.extend_from_slice(&mode.to_le_bytes());
        p.extend_from_slice(path.as_bytes());
        self.call(opcode, &p)
    }

    /// Open an existing file for reading and writing, returning its identifier.
    pub fn open_id(&mut self, path: &str) -> u16 {
        let reply = self.open(op::OPEN, 0x02, 0, 0, path);
        assert_eq!(reply.ax(), 0, "open {} failed", path);
        reply.word(20)
    }

    pub fn find_first(&mut self, attr: u8, path: &str) -> Reply {
        let mut p = vec![attr];
        p.extend_from_slice(path.as_bytes());
        self.call(op::FINDFIRST, &p)
    }

    pub fn find_next(&mut self, dir_id: u16, cursor: u16, attr: u8, mask: &[u8; 11]) -> Reply {
        let mut p = Vec::new();
        p.extend_from_slice(&dir_id.to_le_bytes());
        p.extend_from_slice(&cursor.to_le_bytes());
        p.push(attr);
        p.extend_from_slice(mask);
        self.call(op::FINDNEXT, &p)
    }

    /// FINDFIRST followed by FINDNEXT until NO_MORE_FILES; returns FCB names.
    pub fn list(&mut self, attr: u8, path: &str) -> Vec<String> {
        let mut names = Vec::new();
        let mut reply = self.find_first(attr, path);
        while reply.ax() == 0 {
            names.push(reply.fcb_name());
            let dir_id = reply.word(20);
            let cursor = reply.word(22);
            reply = self.find_next(dir_id, cursor, attr, b"???????????");
        }
        assert_eq!(reply.ax(), 0x12);
        names
    }
}

pub fn ethersrv_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_ethersrv"))
}
