use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use openssl::symm::{Crypter, Mode};
use rand::Rng;
use tracing::{debug, warn};

use rsyslog_core::{Error, Result};

use crate::context::CryptoContext;
use crate::encinfo::{EncInfoReader, EncInfoWriter, ENCINFO_SUFFIX};

/// Direction a [`CryptoFile`] is opened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
}

/// Sidecar path for a log file: `<name>.encinfo`.
fn encinfo_path(log_file: &Path) -> PathBuf {
    let mut name = log_file.as_os_str().to_os_string();
    name.push(ENCINFO_SUFFIX);
    PathBuf::from(name)
}

/// Remove the sidecar state for a log file. Used by the host's queue
/// subsystem when it rolls a queue file over. Missing state is not an error.
pub fn delete_state(log_file: &Path) -> Result<()> {
    let path = encinfo_path(log_file);
    debug!(file = %path.display(), "deleting encryption state file");
    match std::fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// One encrypted log file in flight, either being written or read back.
///
/// Not internally synchronized; the caller must confine a value to one
/// thread at a time.
pub struct CryptoFile {
    ei_name: PathBuf,
    mode: OpenMode,
    block_len: usize,
    cipher: openssl::symm::Cipher,
    key: Vec<u8>,
    crypter: Option<Crypter>,
    reader: Option<EncInfoReader>,
    writer: Option<EncInfoWriter>,
    /// Bytes of ciphertext left in the current block, -1 when the block is
    /// open-ended (still being written).
    bytes_to_block_end: i64,
    delete_on_close: bool,
    closed: bool,
}

impl CryptoFile {
    /// Bind `ctx` to `log_file` and start the first block.
    ///
    /// Write mode appends to the sidecar (creating it with the FILETYPE
    /// cookie if needed), seeds an IV and records it. Read mode reads the
    /// first IV/END pair; if the sidecar does not exist yet it waits for
    /// the writer to create it.
    pub fn open(ctx: &CryptoContext, log_file: &Path, mode: OpenMode) -> Result<Self> {
        let cipher = ctx.cipher();
        let mut file = CryptoFile {
            ei_name: encinfo_path(log_file),
            mode,
            block_len: cipher.block_size(),
            cipher,
            key: ctx.key()?.to_vec(),
            crypter: None,
            reader: None,
            writer: None,
            bytes_to_block_end: -1,
            delete_on_close: false,
            closed: false,
        };
        file.block_begin()?;
        Ok(file)
    }

    /// Unlink the sidecar when this file is closed.
    pub fn set_delete_on_close(&mut self, value: bool) {
        self.delete_on_close = value;
    }

    /// Encrypt `buf` in place. The buffer is zero-padded up to the cipher
    /// block boundary first, so it may grow. Empty input is a no-op.
    pub fn encrypt(&mut self, buf: &mut Vec<u8>) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        add_padding(buf, self.block_len);

        let crypter = self
            .crypter
            .as_mut()
            .ok_or_else(|| Error::Internal("cipher not initialized".to_string()))?;
        let input = std::mem::take(buf);
        let mut out = vec![0u8; input.len() + self.block_len];
        let n = crypter
            .update(&input, &mut out)
            .map_err(|e| Error::Internal(format!("cipher update failed: {e}")))?;
        out.truncate(n);
        *buf = out;
        Ok(())
    }

    /// Decrypt `buf` in place and strip the NUL padding. Decrements the
    /// block-end countdown by the ciphertext length when it is bounded.
    ///
    /// The padding rule keeps interior bytes but drops every NUL from the
    /// first one onward in the compacted result, so plaintext NULs in the
    /// padded tail cannot be told apart from padding. This is a known
    /// limitation of the on-disk format.
    pub fn decrypt(&mut self, buf: &mut Vec<u8>) -> Result<()> {
        if self.bytes_to_block_end != -1 {
            self.bytes_to_block_end -= buf.len() as i64;
        }
        let crypter = self
            .crypter
            .as_mut()
            .ok_or_else(|| Error::Internal("cipher not initialized".to_string()))?;
        let input = std::mem::take(buf);
        let mut out = vec![0u8; input.len() + self.block_len];
        let n = crypter
            .update(&input, &mut out)
            .map_err(|e| Error::Internal(format!("cipher update failed: {e}")))?;
        out.truncate(n);
        remove_padding(&mut out);
        *buf = out;
        debug!(
            bytes_to_block_end = self.bytes_to_block_end,
            len = buf.len(),
            "decrypted block data"
        );
        Ok(())
    }

    /// Number of ciphertext bytes left in the current block, or -1 when the
    /// block is open-ended. At a block boundary (0 left) the next block is
    /// opened transparently: a fresh cipher is initialized from the next
    /// IV/END pair in the sidecar.
    pub fn bytes_left_in_block(&mut self) -> Result<i64> {
        if self.bytes_to_block_end == 0 {
            debug!("end of current crypto block, rolling to next");
            self.crypter = None;
            self.block_begin()?;
        }
        Ok(self.bytes_to_block_end)
    }

    /// Close the file. In write mode this records `END:<final_offset>`,
    /// pairing it with the most recent `IV`. Calling close twice is safe;
    /// the second call does nothing.
    pub fn close(&mut self, final_offset: i64) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        if self.mode == OpenMode::Write {
            if let Some(writer) = self.writer.as_mut() {
                writer.write_end(final_offset)?;
            }
        }
        self.crypter = None;
        self.reader = None;
        self.writer = None;
        self.closed = true;
        if self.delete_on_close {
            debug!(file = %self.ei_name.display(), "unlinking sidecar on close");
            let _ = std::fs::remove_file(&self.ei_name);
        }
        Ok(())
    }

    /// Begin a block: write side seeds and records a fresh IV, read side
    /// loads the next IV/END pair. Either way a new cipher is initialized.
    fn block_begin(&mut self) -> Result<()> {
        match self.mode {
            OpenMode::Read => {
                if self.reader.is_none() {
                    self.reader = Some(self.wait_for_sidecar()?);
                }
                let reader = self.reader.as_mut().expect("reader just installed");
                let iv = reader.get_iv(self.block_len)?;
                self.bytes_to_block_end = match reader.get_end()? {
                    Some(offs) => offs as i64,
                    None => -1,
                };
                self.init_crypter(Mode::Decrypt, &iv)?;
            }
            OpenMode::Write => {
                let iv = self.seed_iv();
                self.init_crypter(Mode::Encrypt, &iv)?;
                if self.writer.is_none() {
                    self.writer = Some(EncInfoWriter::open_append(&self.ei_name)?);
                }
                self.writer
                    .as_mut()
                    .expect("writer just installed")
                    .write_iv(&iv)?;
            }
        }
        Ok(())
    }

    /// Readers may race the writer that creates the sidecar; wait for it in
    /// 10 ms steps, as the queue subsystem guarantees it will appear.
    fn wait_for_sidecar(&self) -> Result<EncInfoReader> {
        loop {
            match EncInfoReader::open(&self.ei_name)? {
                Some(reader) => return Ok(reader),
                None => thread::sleep(Duration::from_millis(10)),
            }
        }
    }

    fn init_crypter(&mut self, mode: Mode, iv: &[u8]) -> Result<()> {
        let mut crypter = Crypter::new(self.cipher, mode, &self.key, Some(iv))
            .map_err(|e| Error::Internal(format!("cipher init failed: {e}")))?;
        // NUL padding is applied by hand; the cipher must not add its own.
        crypter.pad(false);
        self.crypter = Some(crypter);
        Ok(())
    }

    /// IV bytes from `/dev/urandom`. When that fails we fall back to the
    /// userspace generator, which is a weak source for this purpose.
    fn seed_iv(&self) -> Vec<u8> {
        let mut iv = vec![0u8; self.block_len];
        match File::open("/dev/urandom").and_then(|mut f| f.read_exact(&mut iv)) {
            Ok(()) => iv,
            Err(e) => {
                warn!(error = %e, "cannot read /dev/urandom, using userspace RNG for IV");
                rand::rng().fill(&mut iv[..]);
                iv
            }
        }
    }
}

impl Drop for CryptoFile {
    fn drop(&mut self) {
        if !self.closed && self.delete_on_close {
            let _ = std::fs::remove_file(&self.ei_name);
        }
    }
}

fn add_padding(buf: &mut Vec<u8>, block_len: usize) {
    let pad = (block_len - buf.len() % block_len) % block_len;
    debug!(len = buf.len(), pad, block_len, "adding cipher padding");
    buf.resize(buf.len() + pad, 0x00);
}

fn remove_padding(buf: &mut Vec<u8>) {
    let len = buf.len();
    let mut src = 0;
    while src < len && buf[src] == 0 {
        src += 1;
    }
    let mut dst = src;
    while src < len {
        if buf[src] != 0 {
            buf[dst] = buf[src];
            dst += 1;
        }
        src += 1;
    }
    buf.truncate(dst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_fills_to_block_boundary() {
        let mut buf = b"12345".to_vec();
        add_padding(&mut buf, 16);
        assert_eq!(buf.len(), 16);
        assert_eq!(&buf[5..], &[0u8; 11]);

        let mut aligned = vec![7u8; 32];
        add_padding(&mut aligned, 16);
        assert_eq!(aligned.len(), 32);
    }

    #[test]
    fn padding_removal_compacts_trailing_nuls() {
        let mut buf = b"hello\x00\x00\x00".to_vec();
        remove_padding(&mut buf);
        assert_eq!(buf, b"hello");
    }

    #[test]
    fn padding_removal_drops_interior_nuls_past_the_first() {
        let mut buf = b"a\x00b\x00".to_vec();
        remove_padding(&mut buf);
        assert_eq!(buf, b"ab");
    }

    #[test]
    fn encinfo_path_appends_suffix() {
        assert_eq!(
            encinfo_path(Path::new("/var/log/q.0001")),
            PathBuf::from("/var/log/q.0001.encinfo")
        );
    }
}
