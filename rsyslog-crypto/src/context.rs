use std::fs;
use std::path::Path;

use openssl::symm::Cipher;

use rsyslog_core::{Error, Result};

/// Key files larger than this are rejected outright.
const MAX_KEY_FILE_SIZE: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Algo {
    Aes128,
    Aes192,
    Aes256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Cbc,
}

/// Cipher selection plus key. Construct, configure, then open files; the
/// configuration must not change once a [`crate::CryptoFile`] exists.
///
/// The algorithm can be given either as a full cipher name
/// (`AES-128-CBC`) or as the algorithm/mode pair (`aes128` + `cbc`).
#[derive(Debug)]
pub struct CryptoContext {
    algo: Algo,
    mode: Mode,
    key: Option<Vec<u8>>,
}

impl Default for CryptoContext {
    fn default() -> Self {
        CryptoContext::new()
    }
}

impl CryptoContext {
    /// New context with the default cipher, AES-128-CBC, and no key.
    pub fn new() -> Self {
        CryptoContext {
            algo: Algo::Aes128,
            mode: Mode::Cbc,
            key: None,
        }
    }

    /// Select the cipher algorithm by name.
    pub fn set_algo(&mut self, name: &str) -> Result<()> {
        let upper = name.to_ascii_uppercase();
        match upper.as_str() {
            "AES-128-CBC" => {
                self.algo = Algo::Aes128;
                self.mode = Mode::Cbc;
            }
            "AES-192-CBC" => {
                self.algo = Algo::Aes192;
                self.mode = Mode::Cbc;
            }
            "AES-256-CBC" => {
                self.algo = Algo::Aes256;
                self.mode = Mode::Cbc;
            }
            "AES128" => self.algo = Algo::Aes128,
            "AES192" => self.algo = Algo::Aes192,
            "AES256" => self.algo = Algo::Aes256,
            _ => return Err(Error::CryInvldAlgo(name.to_string())),
        }
        Ok(())
    }

    /// Select the cipher mode by name.
    pub fn set_mode(&mut self, name: &str) -> Result<()> {
        match name.to_ascii_uppercase().as_str() {
            "CBC" => self.mode = Mode::Cbc,
            _ => return Err(Error::CryInvldMode(name.to_string())),
        }
        Ok(())
    }

    /// Install the symmetric key. Fails with the required key length when
    /// the supplied key does not match the selected cipher.
    ///
    /// Note: the key must be set after algorithm and mode, as the length
    /// check depends on them.
    pub fn set_key(&mut self, key: &[u8]) -> Result<()> {
        let required = self.cipher().key_len();
        if key.len() != required {
            return Err(Error::CryInvldKey { required });
        }
        self.key = Some(key.to_vec());
        Ok(())
    }

    /// Read the key from a file. The key is a binary blob (NUL bytes are
    /// fine); files larger than 64 KiB are rejected.
    pub fn set_key_from_file(&mut self, path: &Path) -> Result<()> {
        let meta = fs::metadata(path)?;
        if !meta.is_file() {
            return Err(Error::Param(format!(
                "key file '{}' is not a regular file",
                path.display()
            )));
        }
        if meta.len() > MAX_KEY_FILE_SIZE {
            return Err(Error::Param(format!(
                "key file '{}' exceeds {} bytes",
                path.display(),
                MAX_KEY_FILE_SIZE
            )));
        }
        let key = fs::read(path)?;
        self.set_key(&key)
    }

    pub(crate) fn cipher(&self) -> Cipher {
        match (self.algo, self.mode) {
            (Algo::Aes128, Mode::Cbc) => Cipher::aes_128_cbc(),
            (Algo::Aes192, Mode::Cbc) => Cipher::aes_192_cbc(),
            (Algo::Aes256, Mode::Cbc) => Cipher::aes_256_cbc(),
        }
    }

    /// Cipher block length in bytes.
    pub fn block_len(&self) -> usize {
        self.cipher().block_size()
    }

    pub(crate) fn key(&self) -> Result<&[u8]> {
        self.key
            .as_deref()
            .ok_or_else(|| Error::Param("no key configured".to_string()))
    }
}
