//! Redirector operation codes and their decoded request payloads.

use super::{read_le16, read_le32};

/// Redirector subfunctions (the AL value of the INT 2Fh call on the client).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// 0x00: installation check, answered by the client itself
    InstallCheck = 0x00,
    /// 0x01: remove directory
    RemoveDir = 0x01,
    /// 0x03: make directory
    MakeDir = 0x03,
    /// 0x05: change directory
    ChangeDir = 0x05,
    /// 0x06: close file
    CloseFile = 0x06,
    /// 0x07: commit file, not served
    CommitFile = 0x07,
    /// 0x08: read from file
    ReadFile = 0x08,
    /// 0x09: write to file
    WriteFile = 0x09,
    /// 0x0A: lock region
    LockFile = 0x0A,
    /// 0x0B: unlock region
    UnlockFile = 0x0B,
    /// 0x0C: disk space
    DiskSpace = 0x0C,
    /// 0x0E: set attributes
    SetAttr = 0x0E,
    /// 0x0F: get attributes
    GetAttr = 0x0F,
    /// 0x11: rename
    Rename = 0x11,
    /// 0x13: delete
    Delete = 0x13,
    /// 0x16: open existing file
    Open = 0x16,
    /// 0x17: create or truncate file
    Create = 0x17,
    /// 0x1B: find first
    FindFirst = 0x1B,
    /// 0x1C: find next
    FindNext = 0x1C,
    /// 0x21: seek from end
    SeekFromEnd = 0x21,
    /// 0x2E: extended open/create
    SpecialOpen = 0x2E,
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::InstallCheck),
            0x01 => Ok(Self::RemoveDir),
            0x03 => Ok(Self::MakeDir),
            0x05 => Ok(Self::ChangeDir),
            0x06 => Ok(Self::CloseFile),
            0x07 => Ok(Self::CommitFile),
            0x08 => Ok(Self::ReadFile),
            0x09 => Ok(Self::WriteFile),
            0x0A => Ok(Self::LockFile),
            0x0B => Ok(Self::UnlockFile),
            0x0C => Ok(Self::DiskSpace),
            0x0E => Ok(Self::SetAttr),
            0x0F => Ok(Self::GetAttr),
            0x11 => Ok(Self::Rename),
            0x13 => Ok(Self::Delete),
            0x16 => Ok(Self::Open),
            0x17 => Ok(Self::Create),
            0x1B => Ok(Self::FindFirst),
            0x1C => Ok(Self::FindNext),
            0x21 => Ok(Self::SeekFromEnd),
            0x2E => Ok(Self::SpecialOpen),
            _ => Err(value),
        }
    }
}

/// Arguments shared by OPEN, CREATE and SPOPNFIL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenArgs<'a> {
    /// Attributes for CREATE, open mode for OPEN.
    pub stack_word: u16,
    /// SPOPNFIL action: high nibble if missing, low nibble if present.
    pub action: u16,
    /// SPOPNFIL open mode.
    pub open_mode: u16,
    pub path: &'a [u8],
}

/// A decoded request. Paths are raw DOS bytes as sent by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    RemoveDir { path: &'a [u8] },
    MakeDir { path: &'a [u8] },
    ChangeDir { path: &'a [u8] },
    CloseFile,
    ReadFile { offset: u32, id: u16, len: u16 },
    WriteFile { offset: u32, id: u16, data: &'a [u8] },
    LockFile,
    UnlockFile,
    DiskSpace,
    SetAttr { attr: u8, path: &'a [u8] },
    GetAttr { path: &'a [u8] },
    /// `src` and `dst` are empty when the source length byte overruns the payload.
    Rename { src: &'a [u8], dst: &'a [u8] },
    Delete { path: &'a [u8] },
    Open(OpenArgs<'a>),
    Create(OpenArgs<'a>),
    SpecialOpen(OpenArgs<'a>),
    FindFirst { attr: u8, path: &'a [u8] },
    FindNext { dir_id: u16, cursor: u16, attr: u8, mask: [u8; 11] },
    SeekFromEnd { offset: i32, id: u16 },
}

impl<'a> Request<'a> {
    /// Decode the payload for `opcode`. Returns `None` for opcodes the server
    /// does not answer and for payloads that fail the size rules.
    pub fn parse(opcode: Opcode, p: &'a [u8]) -> Option<Self> {
        let req = match opcode {
            Opcode::InstallCheck | Opcode::CommitFile => return None,
            Opcode::RemoveDir => Request::RemoveDir { path: p },
            Opcode::MakeDir => Request::MakeDir { path: p },
            Opcode::ChangeDir => Request::ChangeDir { path: p },
            Opcode::CloseFile => Request::CloseFile,
            Opcode::ReadFile if p.len() == 8 => Request::ReadFile {
                offset: read_le32(p, 0),
                id: read_le16(p, 4),
                len: read_le16(p, 6),
            },
            Opcode::WriteFile if p.len() >= 6 => Request::WriteFile {
                offset: read_le32(p, 0),
                id: read_le16(p, 4),
                data: &p[6..],
            },
            Opcode::LockFile => Request::LockFile,
            Opcode::UnlockFile => Request::UnlockFile,
            Opcode::DiskSpace => Request::DiskSpace,
            Opcode::SetAttr if p.len() > 1 => Request::SetAttr {
                attr: p[0],
                path: &p[1..],
            },
            Opcode::GetAttr if !p.is_empty() => Request::GetAttr { path: p },
            Opcode::Rename if p.len() > 2 => {
                let src_len = p[0] as usize;
                if p.len() > src_len {
                    Request::Rename {
                        src: &p[1..1 + src_len],
                        dst: &p[1 + src_len..],
                    }
                } else {
                    Request::Rename { src: &[], dst: &[] }
                }
            }
            Opcode::Delete => Request::Delete { path: p },
            Opcode::Open | Opcode::Create | Opcode::SpecialOpen if p.len() >= 6 => {
                let args = OpenArgs {
                    stack_word: read_le16(p, 0),
                    action: read_le16(p, 2),
                    open_mode: read_le16(p, 4),
                    path: &p[6..],
                };
                match opcode {
                    Opcode::Open => Request::Open(args),
                    Opcode::Create => Request::Create(args),
                    _ => Request::SpecialOpen(args),
                }
            }
            Opcode::FindFirst if !p.is_empty() => Request::FindFirst {
                attr: p[0],
                path: &p[1..],
            },
            Opcode::FindNext if p.len() >= 16 => {
                let mut mask = [0u8; 11];
                mask.copy_from_slice(&p[5..16]);
                Request::FindNext {
                    dir_id: read_le16(p, 0),
                    cursor: read_le16(p, 2),
                    attr: p[4],
                    mask,
                }
            }
            Opcode::SeekFromEnd if p.len() == 6 => Request::SeekFromEnd {
                offset: read_le32(p, 0) as i32,
                id: read_le16(p, 4),
            },
            _ => return None,
        };
        Some(req)
    }
}
