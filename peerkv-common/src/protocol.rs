//! # Peer Fetch Protocol
//!
//! Purpose: Frame fetch requests and responses between peer nodes without
//! external dependencies, keeping allocations under control.
//!
//! ## Design Principles
//! 1. **Length-Prefixed Frames**: A leading `u32` bounds every read.
//! 2. **Versioned Header**: A version byte guards cross-release decoding.
//! 3. **Binary-Safe**: Keys and values are raw bytes on the wire.
//! 4. **Fail Fast**: Inconsistent framing returns protocol errors immediately.
//!
//! ## Frame Layout
//!
//! ```text
//! Fetch request:
//! +--------+-----------+------+--------------+-------+------------+-----+
//! | len:4B | version:1B| op:1B| group_len:2B | group | key_len:4B | key |
//! +--------+-----------+------+--------------+-------+------------+-----+
//!
//! Fetch response:
//! +--------+-----------+-----------+-----------+--------------+-------+
//! | len:4B | version:1B| status:1B | expire:8B | value_len:4B | value |
//! +--------+-----------+-----------+-----------+--------------+-------+
//! ```
//!
//! All integers are big-endian. `len` counts the bytes after the prefix.
//! `expire` is total nanoseconds since the Unix epoch, `0` = no expiry. On a
//! non-OK status the value field carries a UTF-8 error detail.

use std::io::Read;

use bytes::{Buf, BytesMut};

use crate::error::{CacheError, CacheResult};

/// Protocol version for peer interop checks.
pub const PROTOCOL_VERSION: u8 = 1;

/// Opcode for a cache fetch.
pub const OP_FETCH: u8 = 1;

/// Upper bound on a single frame body, to bound per-connection memory.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Status code indicating success in fetch responses.
pub const STATUS_OK: u8 = 0;
/// Caller error: empty key or malformed request.
pub const STATUS_INVALID_ARGUMENT: u8 = 1;
/// The named group is unknown on the serving node.
pub const STATUS_NOT_FOUND: u8 = 2;
/// The origin loader failed on the serving node.
pub const STATUS_ORIGIN_ERROR: u8 = 3;
/// The value was already past its deadline at response time.
pub const STATUS_EXPIRED: u8 = 4;
/// Unclassified server-side failure.
pub const STATUS_INTERNAL: u8 = 5;

/// Decoded fetch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Group the key belongs to.
    pub group: String,
    /// Key to look up.
    pub key: String,
}

/// Decoded fetch response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    /// One of the `STATUS_*` codes.
    pub status: u8,
    /// Expiry in nanoseconds since the Unix epoch, `0` = none.
    pub expire_nanos: i64,
    /// Value payload, or a UTF-8 error detail on non-OK status.
    pub value: Vec<u8>,
}

/// Maps an error to its wire status code.
pub fn status_for(err: &CacheError) -> u8 {
    match err {
        CacheError::InvalidArgument(_) => STATUS_INVALID_ARGUMENT,
        CacheError::GroupNotFound(_) => STATUS_NOT_FOUND,
        CacheError::Origin(_) => STATUS_ORIGIN_ERROR,
        CacheError::Expired => STATUS_EXPIRED,
        _ => STATUS_INTERNAL,
    }
}

/// Maps a non-OK wire status back to an error, carrying the detail text.
pub fn error_for(status: u8, detail: String) -> CacheError {
    match status {
        STATUS_INVALID_ARGUMENT => CacheError::InvalidArgument(detail),
        STATUS_NOT_FOUND => CacheError::GroupNotFound(detail),
        STATUS_ORIGIN_ERROR => CacheError::Origin(detail),
        STATUS_EXPIRED => CacheError::Expired,
        _ => CacheError::PeerUnavailable(detail),
    }
}

/// Encodes a fetch request frame into `out`.
pub fn encode_fetch_request(group: &str, key: &str, out: &mut Vec<u8>) {
    let body_len = 1 + 1 + 2 + group.len() + 4 + key.len();
    out.reserve(4 + body_len);
    out.extend_from_slice(&(body_len as u32).to_be_bytes());
    out.push(PROTOCOL_VERSION);
    out.push(OP_FETCH);
    out.extend_from_slice(&(group.len() as u16).to_be_bytes());
    out.extend_from_slice(group.as_bytes());
    out.extend_from_slice(&(key.len() as u32).to_be_bytes());
    out.extend_from_slice(key.as_bytes());
}

/// Encodes a fetch response frame into `out`.
pub fn encode_fetch_response(status: u8, expire_nanos: i64, value: &[u8], out: &mut Vec<u8>) {
    let body_len = 1 + 1 + 8 + 4 + value.len();
    out.reserve(4 + body_len);
    out.extend_from_slice(&(body_len as u32).to_be_bytes());
    out.push(PROTOCOL_VERSION);
    out.push(status);
    out.extend_from_slice(&expire_nanos.to_be_bytes());
    out.extend_from_slice(&(value.len() as u32).to_be_bytes());
    out.extend_from_slice(value);
}

/// Incrementally decodes one fetch request from `buf`.
///
/// Returns `Ok(None)` when the buffer does not yet hold a complete frame;
/// the consumed bytes are split off only once a full frame is present.
pub fn decode_fetch_request(buf: &mut BytesMut) -> CacheResult<Option<FetchRequest>> {
    let Some(mut frame) = take_frame(buf)? else {
        return Ok(None);
    };

    if frame.remaining() < 2 {
        return Err(CacheError::Protocol("truncated request header".to_string()));
    }
    let version = frame.get_u8();
    if version != PROTOCOL_VERSION {
        return Err(CacheError::Protocol(format!(
            "unsupported protocol version {version}"
        )));
    }
    let op = frame.get_u8();
    if op != OP_FETCH {
        return Err(CacheError::Protocol(format!("unknown opcode {op}")));
    }

    let group = read_string(&mut frame, 2)?;
    let key = read_string(&mut frame, 4)?;
    if frame.has_remaining() {
        return Err(CacheError::Protocol("trailing bytes in request".to_string()));
    }
    Ok(Some(FetchRequest { group, key }))
}

/// Reads one fetch response from a blocking reader.
pub fn read_fetch_response<R: Read>(reader: &mut R) -> CacheResult<FetchResponse> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix)?;
    let body_len = u32::from_be_bytes(prefix) as usize;
    if body_len < 14 || body_len > MAX_FRAME_BYTES {
        return Err(CacheError::Protocol(format!(
            "response frame length {body_len} out of range"
        )));
    }

    let mut body = vec![0u8; body_len];
    reader.read_exact(&mut body)?;

    let version = body[0];
    if version != PROTOCOL_VERSION {
        return Err(CacheError::Protocol(format!(
            "unsupported protocol version {version}"
        )));
    }
    let status = body[1];
    let mut expire = [0u8; 8];
    expire.copy_from_slice(&body[2..10]);
    let expire_nanos = i64::from_be_bytes(expire);
    let mut len = [0u8; 4];
    len.copy_from_slice(&body[10..14]);
    let value_len = u32::from_be_bytes(len) as usize;
    if body_len != 14 + value_len {
        return Err(CacheError::Protocol("value length mismatch".to_string()));
    }
    body.drain(..14);

    Ok(FetchResponse {
        status,
        expire_nanos,
        value: body,
    })
}

/// Splits one complete frame body off `buf`, or returns `Ok(None)`.
fn take_frame(buf: &mut BytesMut) -> CacheResult<Option<BytesMut>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let mut prefix = [0u8; 4];
    prefix.copy_from_slice(&buf[..4]);
    let body_len = u32::from_be_bytes(prefix) as usize;
    if body_len > MAX_FRAME_BYTES {
        return Err(CacheError::Protocol(format!(
            "frame length {body_len} exceeds limit"
        )));
    }
    if buf.len() < 4 + body_len {
        return Ok(None);
    }
    let mut frame = buf.split_to(4 + body_len);
    frame.advance(4);
    Ok(Some(frame))
}

fn read_string(frame: &mut BytesMut, len_width: usize) -> CacheResult<String> {
    if frame.remaining() < len_width {
        return Err(CacheError::Protocol("truncated length field".to_string()));
    }
    let len = match len_width {
        2 => frame.get_u16() as usize,
        _ => frame.get_u32() as usize,
    };
    if frame.remaining() < len {
        return Err(CacheError::Protocol("truncated string field".to_string()));
    }
    let raw = frame.copy_to_bytes(len);
    String::from_utf8(raw.to_vec())
        .map_err(|_| CacheError::Protocol("field is not valid UTF-8".to_string()))
}
