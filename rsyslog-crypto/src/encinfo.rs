use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use rsyslog_core::{Error, Result};

pub(crate) const ENCINFO_SUFFIX: &str = ".encinfo";
pub(crate) const FILETYPE_NAME: &str = "rsyslog-enrcyption-info";

const MAX_RECTYPE_LEN: usize = 31;
const MAX_VALUE_LEN: usize = 1023;
const READBUF_SIZE: usize = 4096;

/// One parsed sidecar record: type and value, both without delimiters.
pub(crate) struct Record {
    pub rectype: String,
    pub value: String,
}

/// Check that the file at `path` starts with the FILETYPE cookie line.
/// `Ok(false)` means the file does not exist.
pub(crate) fn check_filetype(path: &Path) -> Result<bool> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(Error::EiOpnErr(format!("{}: {e}", path.display()))),
    };
    let expected = format!("FILETYPE:{FILETYPE_NAME}\n");
    let mut buf = vec![0u8; expected.len()];
    file.read_exact(&mut buf)
        .map_err(|_| Error::EiInvldFile(path.display().to_string()))?;
    if buf != expected.as_bytes() {
        return Err(Error::EiInvldFile(path.display().to_string()));
    }
    Ok(true)
}

/// Buffered reader over a sidecar file. The cookie is consumed during
/// construction so the next record is the first `IV`.
pub(crate) struct EncInfoReader {
    file: File,
    buf: [u8; READBUF_SIZE],
    idx: usize,
    max: usize,
}

impl EncInfoReader {
    /// Open for reading. `Ok(None)` if the sidecar does not exist (yet).
    pub fn open(path: &Path) -> Result<Option<Self>> {
        if !check_filetype(path)? {
            return Ok(None);
        }
        let mut file = File::open(path)
            .map_err(|e| Error::EiOpnErr(format!("{}: {e}", path.display())))?;
        // skip the cookie, already validated
        let cookie_len = "FILETYPE:".len() + FILETYPE_NAME.len() + 1;
        let mut skip = vec![0u8; cookie_len];
        file.read_exact(&mut skip)
            .map_err(|_| Error::EiInvldFile(path.display().to_string()))?;
        Ok(Some(EncInfoReader {
            file,
            buf: [0u8; READBUF_SIZE],
            idx: 0,
            max: 0,
        }))
    }

    fn read_byte(&mut self) -> Option<u8> {
        if self.idx >= self.max {
            match self.file.read(&mut self.buf) {
                Ok(0) | Err(_) => return None,
                Ok(n) => {
                    self.max = n;
                    self.idx = 0;
                }
            }
        }
        let b = self.buf[self.idx];
        self.idx += 1;
        Some(b)
    }

    /// Read the next record. `Ok(None)` on clean end of file.
    pub fn get_record(&mut self) -> Result<Option<Record>> {
        let mut c = match self.read_byte() {
            Some(c) => c,
            None => return Ok(None),
        };

        let mut rectype = Vec::new();
        loop {
            if c == b':' {
                break;
            }
            if rectype.len() >= MAX_RECTYPE_LEN {
                return Err(Error::EiInvldFile("record type too long".to_string()));
            }
            rectype.push(c);
            c = match self.read_byte() {
                Some(c) => c,
                None => return Err(Error::EiInvldFile("truncated record type".to_string())),
            };
        }

        let mut value = Vec::new();
        loop {
            c = match self.read_byte() {
                Some(c) => c,
                None => return Err(Error::EiInvldFile("truncated record value".to_string())),
            };
            if c == b'\n' {
                break;
            }
            if value.len() >= MAX_VALUE_LEN {
                return Err(Error::EiInvldFile("record value too long".to_string()));
            }
            value.push(c);
        }

        Ok(Some(Record {
            rectype: String::from_utf8_lossy(&rectype).into_owned(),
            value: String::from_utf8_lossy(&value).into_owned(),
        }))
    }

    /// Read the next record, which must be an `IV` of exactly `len` bytes
    /// (2·len lower-case hex digits).
    pub fn get_iv(&mut self, len: usize) -> Result<Vec<u8>> {
        let rec = self
            .get_record()?
            .ok_or_else(|| Error::EiInvldFile("missing IV record".to_string()))?;
        if rec.rectype != "IV" {
            return Err(Error::EiInvldFile(format!(
                "expected IV record, found '{}'",
                rec.rectype
            )));
        }
        if rec.value.len() != len * 2 {
            return Err(Error::EiInvldFile(format!(
                "IV length {} does not match block length {}",
                rec.value.len() / 2,
                len
            )));
        }
        let mut iv = Vec::with_capacity(len);
        let bytes = rec.value.as_bytes();
        for pair in bytes.chunks_exact(2) {
            let hi = hex_nibble(pair[0])?;
            let lo = hex_nibble(pair[1])?;
            iv.push((hi << 4) | lo);
        }
        Ok(iv)
    }

    /// Read the next record as an `END` offset. `Ok(None)` if the file ends
    /// before the record starts (block still open).
    pub fn get_end(&mut self) -> Result<Option<u64>> {
        let rec = match self.get_record()? {
            Some(rec) => rec,
            None => return Ok(None),
        };
        if rec.rectype != "END" {
            return Err(Error::EiInvldFile(format!(
                "expected END record, found '{}'",
                rec.rectype
            )));
        }
        let offs = rec
            .value
            .parse::<u64>()
            .map_err(|_| Error::EiInvldFile(format!("bad END offset '{}'", rec.value)))?;
        Ok(Some(offs))
    }
}

fn hex_nibble(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        _ => Err(Error::EiInvldFile("invalid IV hex digit".to_string())),
    }
}

/// Appending writer over a sidecar file. Opening creates the file with the
/// FILETYPE cookie when it does not exist, and validates the cookie when it
/// does.
pub(crate) struct EncInfoWriter {
    file: File,
}

impl EncInfoWriter {
    pub fn open_append(path: &Path) -> Result<Self> {
        let exists = check_filetype(path)?;
        let file = OpenOptions::new()
            .append(true)
            .create(!exists)
            .mode(0o600)
            .open(path)
            .map_err(|e| Error::EiOpnErr(format!("{}: {e}", path.display())))?;
        let mut writer = EncInfoWriter { file };
        if !exists {
            writer.write_rec("FILETYPE", FILETYPE_NAME.as_bytes())?;
        }
        Ok(writer)
    }

    /// Write one `<rectype>:<value>\n` record in a single write call.
    pub fn write_rec(&mut self, rectype: &str, value: &[u8]) -> Result<()> {
        debug_assert!(rectype.len() <= MAX_RECTYPE_LEN);
        debug_assert!(value.len() <= MAX_VALUE_LEN);
        let mut rec = Vec::with_capacity(rectype.len() + value.len() + 2);
        rec.extend_from_slice(rectype.as_bytes());
        rec.push(b':');
        rec.extend_from_slice(value);
        rec.push(b'\n');
        self.file
            .write_all(&rec)
            .map_err(|e| Error::EiWrErr(e.to_string()))?;
        Ok(())
    }

    pub fn write_iv(&mut self, iv: &[u8]) -> Result<()> {
        let mut hex = String::with_capacity(iv.len() * 2);
        for b in iv {
            hex.push_str(&format!("{b:02x}"));
        }
        self.write_rec("IV", hex.as_bytes())
    }

    pub fn write_end(&mut self, offset: i64) -> Result<()> {
        self.write_rec("END", offset.to_string().as_bytes())
    }
}
