use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::warn;

/// Validate a request's `Authorization` header against an htpasswd-style
/// file. Returns true when the request is authorized.
pub(crate) fn authorize(headers: &[tiny_http::Header], auth_file: &Path) -> bool {
    let Some((user, password)) = parse_auth_header(headers) else {
        return false;
    };
    let file = match File::open(auth_file) {
        Ok(file) => file,
        Err(e) => {
            warn!(
                file = %auth_file.display(),
                error = %e,
                "basic-auth file could not be accessed"
            );
            return false;
        }
    };
    check_auth_file(file, &user, &password)
}

/// `Authorization: Basic <base64(user:password)>`.
fn parse_auth_header(headers: &[tiny_http::Header]) -> Option<(String, String)> {
    let header = headers.iter().find(|h| h.field.equiv("authorization"))?;
    let value = header.value.as_str();
    let encoded = if value.len() >= 6 && value[..6].eq_ignore_ascii_case("basic ") {
        &value[6..]
    } else {
        return None;
    };
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;
    Some((user.to_string(), password.to_string()))
}

/// Scan `user:hash` lines. Comment lines start with `#`; trailing
/// whitespace and control characters are ignored; the user compare is
/// case-insensitive. Only the first matching user is consulted.
fn check_auth_file(file: File, user: &str, password: &str) -> bool {
    for line in BufReader::new(file).lines() {
        let Ok(line) = line else {
            return false;
        };
        let line = line.trim_end_matches(|c: char| c.is_whitespace() || c.is_control());
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((file_user, hash)) = line.split_once(':') else {
            continue;
        };
        if file_user.eq_ignore_ascii_case(user) {
            return validate_password(password, hash);
        }
    }
    false
}

/// `{SHA}` (base64 of SHA-1, as produced by `htpasswd -s`) and plaintext
/// entries are supported; other hash schemes fail closed.
fn validate_password(password: &str, hash: &str) -> bool {
    if let Some(expected) = hash.strip_prefix("{SHA}") {
        let digest = openssl::sha::sha1(password.as_bytes());
        return BASE64.encode(digest) == expected;
    }
    if hash.starts_with("$apr1$") || hash.starts_with("$2y$") || hash.starts_with("$2a$") {
        warn!("unsupported htpasswd hash scheme, denying access");
        return false;
    }
    hash == password
}
