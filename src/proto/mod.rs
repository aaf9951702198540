//! EtherDFS wire format.
//!
//! Every request and reply is a single Ethernet frame:
//!
//! ```text
//! [0..6]   destination MAC
//! [6..12]  source MAC
//! [12..14] ethertype 0xEDF5 (big-endian)
//! [14..52] padding, copied verbatim into the reply
//! [52..54] declared frame length (LE, 0 = use link length)
//! [54..56] BSD checksum of bytes 56.. (LE)
//! [56]     bits 0-6 protocol version, bit 7 checksum enabled
//! [57]     sequence number
//! [58]     bits 0-4 drive (0 = A:), bits 5-7 flags
//! [59]     operation code
//! [60..]   payload
//! ```
//!
//! In a reply, bytes 58..60 hold the 16-bit result word instead of the
//! drive and opcode.

pub mod frame;
pub mod request;

pub use frame::{Frame, FrameError, ReplyFrame};
pub use request::{OpenArgs, Opcode, Request};

pub type MacAddr = [u8; 6];

pub const ETHERTYPE_DFS: u16 = 0xEDF5;
pub const PROTOCOL_VERSION: u8 = 2;
/// Size of the fixed header; the shortest acceptable frame.
pub const HEADER_LEN: usize = 60;
/// Largest reply the server will build.
pub const MAX_FRAME_LEN: usize = 1520;
pub const BROADCAST: MacAddr = [0xff; 6];

/// Rolling BSD checksum used by the protocol.
pub fn bsd_sum(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |sum, &b| sum.rotate_right(1).wrapping_add(b as u16))
}

pub fn read_le16(buf: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([buf[off], buf[off + 1]])
}

pub fn read_le32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

pub fn format_mac(mac: &MacAddr) -> String {
    mac.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// Hex + ASCII dump, 16 bytes per line.
pub fn hexdump(data: &[u8]) -> String {
    let mut out = String::new();
    for line in data.chunks(16) {
        for i in 0..16 {
            if i == 8 {
                out.push(' ');
            }
            match line.get(i) {
                Some(b) => out.push_str(&format!(" {:02X}", b)),
                None => out.push_str("   "),
            }
        }
        out.push_str(" | ");
        for &b in line {
            out.push(if (b' '..=b'~').contains(&b) { b as char } else { '.' });
        }
        out.push('\n');
    }
    out
}
