use std::io::Write;
use std::os::unix::net::{UnixDatagram, UnixStream};
use std::time::Duration;

use ethersrv::config::{Drive, DriveMap};
use ethersrv::dispatch::Dispatcher;
use ethersrv::proto::read_le16;
use ethersrv::server::Server;

use crate::helpers::{frame, op, CLIENT_MAC, DRIVE_C, SERVER_MAC};

#[test]
fn test_server_answers_until_stopped() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("hello.txt"), b"hi").unwrap();

    let mut drives = DriveMap::new();
    drives.insert(DRIVE_C, Drive::new(root.path(), false));
    let dispatcher = Dispatcher::new(SERVER_MAC, drives);

    let (server_end, client_end) = UnixDatagram::pair().unwrap();
    server_end.set_nonblocking(true).unwrap();
    client_end.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let (stop_rx, mut stop_tx) = UnixStream::pair().unwrap();

    let mut server = Server::new(server_end, dispatcher, stop_rx, Some(Duration::from_millis(20)));
    let handle = std::thread::spawn(move || server.run());

    // Two requests queued back to back, plus one the server ignores.
    client_end
        .send(&frame(&CLIENT_MAC, 1, DRIVE_C, op::GETATTR, b"\\HELLO.TXT", false))
        .unwrap();
    client_end.send(&frame(&CLIENT_MAC, 2, 0, op::CLSFIL, b"", false)).unwrap();
    client_end
        .send(&frame(&CLIENT_MAC, 3, DRIVE_C, op::CHDIR, b"\\NOWHERE", false))
        .unwrap();

    let mut buf = [0u8; 1520];
    let n = client_end.recv(&mut buf).unwrap();
    assert_eq!(&buf[0..6], &CLIENT_MAC);
    assert_eq!(buf[57], 1);
    assert_eq!(read_le16(&buf[..n], 58), 0);
    assert_eq!(read_le16(&buf[..n], 64), 2);

    let n = client_end.recv(&mut buf).unwrap();
    assert_eq!(buf[57], 3);
    assert_eq!(read_le16(&buf[..n], 58), 3);

    stop_tx.write_all(&[0]).unwrap();
    handle.join().unwrap().unwrap();
}
