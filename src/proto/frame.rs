//! Typed views over request and reply frames.

use thiserror::Error;

use super::{bsd_sum, format_mac, read_le16, MacAddr, BROADCAST, ETHERTYPE_DFS, HEADER_LEN, PROTOCOL_VERSION};

/// Header field offsets.
pub mod offset {
    pub const DST: usize = 0;
    pub const SRC: usize = 6;
    pub const ETHERTYPE: usize = 12;
    pub const LENGTH: usize = 52;
    pub const CHECKSUM: usize = 54;
    pub const VERSION: usize = 56;
    pub const SEQUENCE: usize = 57;
    pub const DRIVE: usize = 58;
    pub const OPCODE: usize = 59;
    /// Reply result word, overlaying drive and opcode.
    pub const RESULT: usize = 58;
    pub const PAYLOAD: usize = 60;
}

const CHECKSUM_FLAG: u8 = 0x80;

/// Reasons a received frame is dropped without a reply.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short ({0} bytes)")]
    TooShort(usize),

    #[error("frame addressed to {0}")]
    NotForUs(String),

    #[error("received non-EtherDFS frame (ethertype {0:#06x})")]
    Ethertype(u16),

    #[error("unsupported protocol version {version} from {src}")]
    Version { version: u8, src: String },

    #[error("truncated frame from {src}: declared {declared} bytes, received {received}")]
    Truncated {
        src: String,
        declared: usize,
        received: usize,
    },

    #[error("malformed frame from {src}: declared length {declared}")]
    Malformed { src: String, declared: usize },

    #[error("checksum mismatch: computed {computed:#06x}, received {received:#06x}")]
    Checksum { computed: u16, received: u16 },
}

/// A validated request frame, trimmed to its declared length.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    buf: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Validate a frame received on the link.
    pub fn parse(buf: &'a [u8], local: &MacAddr) -> Result<Self, FrameError> {
        if buf.len() < HEADER_LEN {
            return Err(FrameError::TooShort(buf.len()));
        }
        let frame = Frame { buf };

        let dst = frame.dst();
        if dst != *local && dst != BROADCAST {
            return Err(FrameError::NotForUs(format_mac(&dst)));
        }
        if frame.ethertype() != ETHERTYPE_DFS {
            return Err(FrameError::Ethertype(frame.ethertype()));
        }
        if frame.version() != PROTOCOL_VERSION {
            return Err(FrameError::Version {
                version: frame.version(),
                src: format_mac(&frame.src()),
            });
        }

        let declared = frame.declared_len() as usize;
        let buf = if declared == 0 {
            buf
        } else if declared > buf.len() {
            return Err(FrameError::Truncated {
                src: format_mac(&frame.src()),
                declared,
                received: buf.len(),
            });
        } else if declared < HEADER_LEN {
            return Err(FrameError::Malformed {
                src: format_mac(&frame.src()),
                declared,
            });
        } else {
            &buf[..declared]
        };
        let frame = Frame { buf };

        if frame.checksum_enabled() {
            let computed = bsd_sum(&buf[offset::VERSION..]);
            let received = frame.checksum();
            if computed != received {
                return Err(FrameError::Checksum { computed, received });
            }
        }

        Ok(frame)
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn dst(&self) -> MacAddr {
        self.mac_at(offset::DST)
    }

    pub fn src(&self) -> MacAddr {
        self.mac_at(offset::SRC)
    }

    /// Ethertype, the only big-endian field.
    pub fn ethertype(&self) -> u16 {
        u16::from_be_bytes([self.buf[offset::ETHERTYPE], self.buf[offset::ETHERTYPE + 1]])
    }

    pub fn declared_len(&self) -> u16 {
        read_le16(self.buf, offset::LENGTH)
    }

    pub fn checksum(&self) -> u16 {
        read_le16(self.buf, offset::CHECKSUM)
    }

    pub fn version(&self) -> u8 {
        self.buf[offset::VERSION] & !CHECKSUM_FLAG
    }

    pub fn checksum_enabled(&self) -> bool {
        self.buf[offset::VERSION] & CHECKSUM_FLAG != 0
    }

    pub fn sequence(&self) -> u8 {
        self.buf[offset::SEQUENCE]
    }

    /// Drive index, 0 = A:.
    pub fn drive(&self) -> u8 {
        self.buf[offset::DRIVE] & 0x1F
    }

    /// Reserved flag bits from the drive byte.
    pub fn flags(&self) -> u8 {
        self.buf[offset::DRIVE] >> 5
    }

    pub fn opcode(&self) -> u8 {
        self.buf[offset::OPCODE]
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buf[offset::PAYLOAD..]
    }

    fn mac_at(&self, off: usize) -> MacAddr {
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&self.buf[off..off + 6]);
        mac
    }
}

/// Reply under construction. Starts as a copy of the request header with
/// the addresses swapped.
#[derive(Debug, Clone)]
pub struct ReplyFrame {
    buf: Vec<u8>,
}

impl ReplyFrame {
    pub fn for_request(request: &Frame<'_>, local: &MacAddr) -> Self {
        let mut buf = Vec::with_capacity(super::MAX_FRAME_LEN);
        buf.extend_from_slice(&request.as_bytes()[..HEADER_LEN]);
        buf[offset::DST..offset::DST + 6].copy_from_slice(&request.src());
        buf[offset::SRC..offset::SRC + 6].copy_from_slice(local);
        Self { buf }
    }

    pub fn set_result(&mut self, ax: u16) {
        self.buf[offset::RESULT..offset::RESULT + 2].copy_from_slice(&ax.to_le_bytes());
    }

    pub fn extend_payload(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Fill in length and checksum fields and return the wire bytes.
    pub fn finish(mut self, checksum: bool) -> Vec<u8> {
        let len = self.buf.len() as u16;
        self.buf[offset::LENGTH..offset::LENGTH + 2].copy_from_slice(&len.to_le_bytes());
        if checksum {
            self.buf[offset::VERSION] |= CHECKSUM_FLAG;
            let sum = bsd_sum(&self.buf[offset::VERSION..]);
            self.buf[offset::CHECKSUM..offset::CHECKSUM + 2].copy_from_slice(&sum.to_le_bytes());
        } else {
            self.buf[offset::VERSION] &= !CHECKSUM_FLAG;
            self.buf[offset::CHECKSUM..offset::CHECKSUM + 2].copy_from_slice(&[0, 0]);
        }
        self.buf
    }
}
