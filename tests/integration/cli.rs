use std::process::Command;

use ethersrv::lifecycle::LockFile;

use crate::helpers::ethersrv_binary;

#[test]
fn test_help_lists_arguments() {
    let out = Command::new(ethersrv_binary()).arg("--help").output().unwrap();
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("<INTERFACE>"));
    assert!(stdout.contains("--foreground"));
    assert!(stdout.contains("--lock-file"));
}

#[test]
fn test_missing_root_exits_with_error() {
    let dir = tempfile::tempdir().unwrap();
    let out = Command::new(ethersrv_binary())
        .args(["-f", "eth0"])
        .arg(dir.path().join("does-not-exist"))
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("Error"));
}

#[test]
fn test_second_instance_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let lock_path = dir.path().join("ethersrv.lock");
    let _held = LockFile::acquire(&lock_path).unwrap();

    let out = Command::new(ethersrv_binary())
        .args(["-f", "--lock-file"])
        .arg(&lock_path)
        .arg("eth0")
        .arg(dir.path())
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("another instance"));
}
