//! Minimal RESP codec
//!
//! Requests are encoded as arrays of bulk strings. Replies are decoded into a
//! simple string or a nullable bulk string; error replies become
//! [`ArenaError::Persistence`] and any other reply type is unsupported.

use crate::error::{ArenaError, Result};

/// Decoded reply from the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespReply {
    /// `+OK`, `+PONG`
    Simple(String),
    /// `$<len>` value, `None` for `$-1`
    Bulk(Option<String>),
}

impl RespReply {
    /// Whether this is the given simple-string acknowledgment
    pub fn is_simple(&self, expected: &str) -> bool {
        matches!(self, RespReply::Simple(value) if value == expected)
    }
}

/// Encode a command as a RESP array of bulk strings
pub fn encode_command<S: AsRef<str>>(args: &[S]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        let bytes = arg.as_ref().as_bytes();
        out.extend_from_slice(format!("${}\r\n", bytes.len()).as_bytes());
        out.extend_from_slice(bytes);
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Decode a complete reply received before the peer closed the connection
pub fn decode_reply(raw: &[u8]) -> Result<RespReply> {
    let (&marker, rest) = raw
        .split_first()
        .ok_or_else(|| ArenaError::persistence("Empty Redis response"))?;

    match marker {
        b'+' => Ok(RespReply::Simple(
            String::from_utf8_lossy(rest).trim().to_string(),
        )),
        b'$' => decode_bulk(rest),
        b'-' => Err(ArenaError::persistence(format!(
            "Redis error: {}",
            String::from_utf8_lossy(rest).trim()
        ))),
        other => Err(ArenaError::persistence(format!(
            "Unsupported Redis response type '{}'",
            other as char
        ))),
    }
}

fn decode_bulk(rest: &[u8]) -> Result<RespReply> {
    let header_end = find_crlf(rest)
        .ok_or_else(|| ArenaError::persistence("Malformed bulk reply header"))?;
    let length: i64 = std::str::from_utf8(&rest[..header_end])
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| ArenaError::persistence("Malformed bulk reply length"))?;

    if length == -1 {
        return Ok(RespReply::Bulk(None));
    }
    if length < 0 {
        return Err(ArenaError::persistence("Malformed bulk reply length"));
    }

    let start = header_end + 2;
    let end = start + length as usize;
    let body = rest
        .get(start..end)
        .ok_or_else(|| ArenaError::persistence("Truncated bulk reply"))?;

    String::from_utf8(body.to_vec())
        .map(|value| RespReply::Bulk(Some(value)))
        .map_err(|_| ArenaError::persistence("Bulk reply is not valid UTF-8"))
}

fn find_crlf(bytes: &[u8]) -> Option<usize> {
    bytes.windows(2).position(|window| window == b"\r\n")
}
