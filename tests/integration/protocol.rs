use ethersrv::proto::frame::offset;
use ethersrv::proto::{bsd_sum, read_le16, BROADCAST, HEADER_LEN};
use ethersrv::state::answer_cache::ANSWER_CACHE_SIZE;

use crate::helpers::{frame, op, TestServer, CLIENT_MAC, DRIVE_C, SERVER_MAC};

/// Retransmitting a request yields the same bytes and runs it only once.
#[test]
fn test_retransmission_is_replayed_not_reexecuted() {
    let mut srv = TestServer::new();
    let req = frame(&CLIENT_MAC, 7, DRIVE_C, op::MKDIR, b"\\NEWDIR", false);

    let first = srv.send(&req).unwrap();
    assert_eq!(first.ax(), 0);
    assert!(srv.host("newdir").is_dir());

    // Executing MKDIR again would fail; a replay does not.
    let second = srv.send(&req).unwrap();
    assert_eq!(first.0, second.0);

    // A new sequence number is a new request.
    let fresh = frame(&CLIENT_MAC, 8, DRIVE_C, op::MKDIR, b"\\NEWDIR", false);
    assert_eq!(srv.send(&fresh).unwrap().ax(), 29);
}

#[test]
fn test_replayed_write_happens_once() {
    let mut srv = TestServer::new();
    std::fs::write(srv.host("log.txt"), b"").unwrap();
    let id = srv.open_id("\\LOG.TXT");

    // Append "ab" at offset 0, then retransmit a write at the current end.
    let mut p = 0u32.to_le_bytes().to_vec();
    p.extend_from_slice(&id.to_le_bytes());
    p.extend_from_slice(b"ab");
    assert_eq!(srv.call(op::WRITEFIL, &p).word(0), 2);

    let mut p = 2u32.to_le_bytes().to_vec();
    p.extend_from_slice(&id.to_le_bytes());
    p.extend_from_slice(b"cd");
    let req = frame(&CLIENT_MAC, 200, DRIVE_C, op::WRITEFIL, &p, false);
    let a = srv.send(&req).unwrap();
    std::fs::write(srv.host("log.txt"), b"abXX").unwrap();
    let b = srv.send(&req).unwrap();

    assert_eq!(a.0, b.0);
    // The replay did not touch the file again.
    assert_eq!(std::fs::read(srv.host("log.txt")).unwrap(), b"abXX");
}

#[test]
fn test_reply_header() {
    let mut srv = TestServer::new();
    let req = frame(&CLIENT_MAC, 33, DRIVE_C, op::CLSFIL, b"", false);
    let reply = srv.send(&req).unwrap();

    assert_eq!(&reply.0[0..6], &CLIENT_MAC);
    assert_eq!(&reply.0[6..12], &SERVER_MAC);
    assert_eq!(&reply.0[12..14], &[0xED, 0xF5]);
    assert_eq!(reply.0[offset::SEQUENCE], 33);
    assert_eq!(read_le16(&reply.0, offset::LENGTH) as usize, reply.0.len());
    assert_eq!(reply.0.len(), HEADER_LEN);
    assert_eq!(read_le16(&reply.0, offset::CHECKSUM), 0);
    assert_eq!(reply.ax(), 0);
}

#[test]
fn test_checksummed_request_gets_checksummed_reply() {
    let mut srv = TestServer::new();
    std::fs::write(srv.host("a.txt"), b"x").unwrap();
    let req = frame(&CLIENT_MAC, 1, DRIVE_C, op::GETATTR, b"\\A.TXT", true);
    let reply = srv.send(&req).unwrap();

    assert_eq!(reply.ax(), 0);
    assert_ne!(reply.0[offset::VERSION] & 0x80, 0);
    assert_eq!(
        read_le16(&reply.0, offset::CHECKSUM),
        bsd_sum(&reply.0[offset::VERSION..])
    );
}

#[test]
fn test_bad_checksum_is_dropped() {
    let mut srv = TestServer::new();
    let mut req = frame(&CLIENT_MAC, 1, DRIVE_C, op::CLSFIL, b"", true);
    req[offset::CHECKSUM] ^= 0x01;
    assert!(srv.send(&req).is_none());
}

#[test]
fn test_frames_that_are_dropped() {
    let mut srv = TestServer::new();

    // Drives A:, B: and unmapped D:.
    for drive in [0u8, 1, 3, 25] {
        let req = frame(&CLIENT_MAC, 1, drive, op::CLSFIL, b"", false);
        assert!(srv.send(&req).is_none(), "drive {} answered", drive);
    }

    // Unknown opcode and a READFIL with a short payload.
    assert!(srv.request(0x2D, b"").is_none());
    assert!(srv.request(op::READFIL, &[0; 7]).is_none());
    assert!(srv.request(0x07, b"").is_none());

    // Wrong version.
    let mut req = frame(&CLIENT_MAC, 1, DRIVE_C, op::CLSFIL, b"", false);
    req[offset::VERSION] = 1;
    assert!(srv.send(&req).is_none());

    // Addressed to someone else.
    let mut req = frame(&CLIENT_MAC, 1, DRIVE_C, op::CLSFIL, b"", false);
    req[0..6].copy_from_slice(&[0x02, 0, 0, 0, 0, 0x77]);
    assert!(srv.send(&req).is_none());

    // Too short.
    assert!(srv.send(&[0u8; 40]).is_none());
}

#[test]
fn test_broadcast_and_padding_are_accepted() {
    let mut srv = TestServer::new();
    let mut req = frame(&CLIENT_MAC, 9, DRIVE_C, op::CHDIR, b"\\", false);
    req[0..6].copy_from_slice(&BROADCAST);
    req.extend_from_slice(&[0u8; 16]);
    let reply = srv.send(&req).unwrap();
    assert_eq!(reply.ax(), 0);
}

#[test]
fn test_seventeen_clients_share_sixteen_slots() {
    let mut srv = TestServer::new();
    let macs: Vec<_> = (1..=17u8).map(|n| [0x02, 0, 0, 0, 0x10, n]).collect();

    for (i, mac) in macs.iter().enumerate() {
        let req = frame(mac, i as u8, DRIVE_C, op::CLSFIL, b"", false);
        assert!(srv.send(&req).is_some());
    }

    let answers = srv.dispatcher.answers();
    assert_eq!(answers.len(), ANSWER_CACHE_SIZE);
    assert!(!answers.contains(&macs[0]));
    for mac in &macs[1..] {
        assert!(answers.contains(mac));
    }
}

#[test]
fn test_disk_space() {
    let mut srv = TestServer::new();
    let reply = srv.call(op::DISKSPACE, b"");
    assert_eq!(reply.ax(), 1);
    assert_eq!(reply.payload().len(), 6);
    assert_eq!(reply.word(2), 32768);
}

#[test]
fn test_lock_unlock_and_close_always_succeed() {
    let mut srv = TestServer::new();
    assert_eq!(srv.call(op::LOCKFIL, b"anything").ax(), 0);
    assert_eq!(srv.call(0x0B, b"").ax(), 0);
    assert_eq!(srv.call(op::CLSFIL, &[1, 2]).ax(), 0);
}
