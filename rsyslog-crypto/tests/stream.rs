//! Write/read round trips over real files, the way the disk queue and the
//! log writer drive the provider: the caller owns the log file, the
//! provider owns the sidecar.

use std::fs;
use std::path::Path;

use rsyslog_crypto::{delete_state, CryptoContext, CryptoFile, OpenMode};

fn context() -> CryptoContext {
    let mut ctx = CryptoContext::new();
    ctx.set_key(b"0123456789abcdef").unwrap();
    ctx
}

fn write_encrypted(ctx: &CryptoContext, log: &Path, plaintext: &[u8]) -> usize {
    let mut file = CryptoFile::open(ctx, log, OpenMode::Write).unwrap();
    let mut buf = plaintext.to_vec();
    file.encrypt(&mut buf).unwrap();
    fs::write(log, &buf).unwrap();
    file.close(buf.len() as i64).unwrap();
    buf.len()
}

#[test]
fn encrypt_then_decrypt_restores_plaintext() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("X");
    let ctx = context();

    let plaintext = b"Hello rsyslog!!\n\n";
    assert_eq!(plaintext.len(), 17);
    let cipher_len = write_encrypted(&ctx, &log, plaintext);
    assert_eq!(cipher_len, 32);

    let sidecar = fs::read_to_string(dir.path().join("X.encinfo")).unwrap();
    assert!(sidecar.starts_with("FILETYPE:rsyslog-enrcyption-info\n"));
    assert!(sidecar.contains("\nEND:32\n"));

    let mut reader = CryptoFile::open(&ctx, &log, OpenMode::Read).unwrap();
    assert_eq!(reader.bytes_left_in_block().unwrap(), 32);
    let mut buf = fs::read(&log).unwrap();
    reader.decrypt(&mut buf).unwrap();
    assert_eq!(buf, plaintext);
}

#[test]
fn ciphertext_differs_from_plaintext() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("X");
    let ctx = context();

    let mut file = CryptoFile::open(&ctx, &log, OpenMode::Write).unwrap();
    let mut buf = b"some log line\n".to_vec();
    file.encrypt(&mut buf).unwrap();
    assert_eq!(buf.len(), 16);
    assert_ne!(&buf[..14], &b"some log line\n"[..]);
    file.close(16).unwrap();
}

#[test]
fn empty_buffer_encrypts_to_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("X");
    let ctx = context();

    let mut file = CryptoFile::open(&ctx, &log, OpenMode::Write).unwrap();
    let mut buf = Vec::new();
    file.encrypt(&mut buf).unwrap();
    assert!(buf.is_empty());
    file.close(0).unwrap();
}

#[test]
fn close_twice_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("X");
    let ctx = context();

    let mut file = CryptoFile::open(&ctx, &log, OpenMode::Write).unwrap();
    file.close(0).unwrap();
    file.close(0).unwrap();

    // exactly one END record despite two close calls
    let sidecar = fs::read_to_string(dir.path().join("X.encinfo")).unwrap();
    assert_eq!(sidecar.matches("END:").count(), 1);
}

#[test]
fn open_block_reports_unbounded_length() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("X");
    let ctx = context();

    // writer still running: IV present, END not yet written
    let mut writer = CryptoFile::open(&ctx, &log, OpenMode::Write).unwrap();
    let mut buf = b"in flight".to_vec();
    writer.encrypt(&mut buf).unwrap();
    fs::write(&log, &buf).unwrap();

    let mut reader = CryptoFile::open(&ctx, &log, OpenMode::Read).unwrap();
    assert_eq!(reader.bytes_left_in_block().unwrap(), -1);
    let mut read_back = fs::read(&log).unwrap();
    reader.decrypt(&mut read_back).unwrap();
    assert_eq!(read_back, b"in flight");
    // countdown stays unbounded
    assert_eq!(reader.bytes_left_in_block().unwrap(), -1);

    writer.close(16).unwrap();
}

#[test]
fn reader_rolls_into_the_next_block() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("X");
    let ctx = context();

    // two write sessions, each its own IV/END pair; ciphertext is appended
    // to the same log file the way a rotated-then-reopened stream would
    let mut first = CryptoFile::open(&ctx, &log, OpenMode::Write).unwrap();
    let mut block1 = b"first block....".to_vec();
    first.encrypt(&mut block1).unwrap();
    first.close(block1.len() as i64).unwrap();

    let mut second = CryptoFile::open(&ctx, &log, OpenMode::Write).unwrap();
    let mut block2 = b"second block!!!".to_vec();
    second.encrypt(&mut block2).unwrap();
    second.close(block2.len() as i64).unwrap();

    let mut reader = CryptoFile::open(&ctx, &log, OpenMode::Read).unwrap();
    assert_eq!(reader.bytes_left_in_block().unwrap(), 16);
    let mut buf = block1.clone();
    reader.decrypt(&mut buf).unwrap();
    assert_eq!(buf, b"first block....");

    // the first block is exhausted; the next call rolls into block two
    assert_eq!(reader.bytes_left_in_block().unwrap(), 16);
    let mut buf = block2.clone();
    reader.decrypt(&mut buf).unwrap();
    assert_eq!(buf, b"second block!!!");
}

#[test]
fn wrong_key_does_not_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("X");
    let ctx = context();
    write_encrypted(&ctx, &log, b"super secret payload");

    let mut other = CryptoContext::new();
    other.set_key(b"fedcba9876543210").unwrap();
    let mut reader = CryptoFile::open(&other, &log, OpenMode::Read).unwrap();
    let mut buf = fs::read(&log).unwrap();
    reader.decrypt(&mut buf).unwrap();
    assert_ne!(buf, b"super secret payload");
}

#[test]
fn delete_state_removes_the_sidecar() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("q.0001");
    let ctx = context();
    write_encrypted(&ctx, &log, b"queued record");
    assert!(dir.path().join("q.0001.encinfo").exists());

    delete_state(&log).unwrap();
    assert!(!dir.path().join("q.0001.encinfo").exists());

    // deleting again is fine
    delete_state(&log).unwrap();
}

#[test]
fn delete_on_close_unlinks_sidecar() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("X");
    let ctx = context();

    let mut file = CryptoFile::open(&ctx, &log, OpenMode::Write).unwrap();
    file.set_delete_on_close(true);
    file.close(0).unwrap();
    assert!(!dir.path().join("X.encinfo").exists());
}

#[test]
fn aes256_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("X");
    let mut ctx = CryptoContext::new();
    ctx.set_algo("AES-256-CBC").unwrap();
    ctx.set_key(b"0123456789abcdef0123456789abcdef").unwrap();

    write_encrypted(&ctx, &log, b"large-key payload\n");

    let mut reader = CryptoFile::open(&ctx, &log, OpenMode::Read).unwrap();
    let mut buf = fs::read(&log).unwrap();
    reader.decrypt(&mut buf).unwrap();
    assert_eq!(buf, b"large-key payload\n");
}
