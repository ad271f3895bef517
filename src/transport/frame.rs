//! Message framing over the upgraded stream
//!
//! Parsing is a pure function from an accumulated buffer to a parse outcome,
//! so the socket loop only has to append reads and drop consumed bytes.
//! Supported subset: single-frame text messages with 7-bit or 16-bit
//! lengths. Client frames must be masked, server frames never are.

use crate::error::{ArenaError, Result};

pub const OPCODE_TEXT: u8 = 0x1;
pub const OPCODE_CLOSE: u8 = 0x8;

const FIN_BIT: u8 = 0x80;
const MASK_BIT: u8 = 0x80;
const LENGTH_16BIT: u8 = 126;
const LENGTH_64BIT: u8 = 127;

/// Largest payload that fits the 16-bit length class
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Outcome of one parse attempt over a receive buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameParse {
    /// The buffer does not yet hold a complete frame
    Incomplete,
    /// The peer sent a close frame
    Close,
    /// A complete text message and the number of buffer bytes it used
    Text { payload: String, consumed: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Masking {
    Required,
    Forbidden,
}

/// Parse one client-to-server frame from the front of `buffer`
pub fn parse_client_frame(buffer: &[u8]) -> Result<FrameParse> {
    parse_frame(buffer, Masking::Required)
}

/// Parse one server-to-client frame from the front of `buffer`
pub fn parse_server_frame(buffer: &[u8]) -> Result<FrameParse> {
    parse_frame(buffer, Masking::Forbidden)
}

/// Fixed part of a frame: opcode, masking and where the payload sits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub opcode: u8,
    pub masked: bool,
    /// Offset of the payload, past any extended length and mask key
    pub payload_offset: usize,
    pub payload_len: usize,
}

impl FrameHeader {
    /// Total bytes the frame occupies on the wire
    pub fn frame_len(&self) -> usize {
        self.payload_offset + self.payload_len
    }
}

/// Read the header at the front of `buffer`, `None` until it is fully buffered
///
/// The 64-bit length class is rejected, so a frame's end is always known
/// once its header is.
pub fn parse_frame_header(buffer: &[u8]) -> Result<Option<FrameHeader>> {
    if buffer.len() < 2 {
        return Ok(None);
    }

    let masked = buffer[1] & MASK_BIT != 0;
    let mut payload_len = (buffer[1] & 0x7f) as usize;
    let mut offset = 2;

    if payload_len == LENGTH_16BIT as usize {
        if buffer.len() < offset + 2 {
            return Ok(None);
        }
        payload_len = u16::from_be_bytes([buffer[2], buffer[3]]) as usize;
        offset += 2;
    } else if payload_len == LENGTH_64BIT as usize {
        return Err(ArenaError::protocol("Payload too large"));
    }

    if masked {
        offset += 4;
    }

    Ok(Some(FrameHeader {
        opcode: buffer[0] & 0x0f,
        masked,
        payload_offset: offset,
        payload_len,
    }))
}

fn parse_frame(buffer: &[u8], masking: Masking) -> Result<FrameParse> {
    if buffer.len() >= 2 && buffer[0] & 0x0f == OPCODE_CLOSE {
        return Ok(FrameParse::Close);
    }

    let Some(header) = parse_frame_header(buffer)? else {
        return Ok(FrameParse::Incomplete);
    };

    if header.opcode != OPCODE_TEXT {
        return Err(ArenaError::protocol(
            "Only text WebSocket frames are supported",
        ));
    }

    match (masking, header.masked) {
        (Masking::Required, false) => {
            return Err(ArenaError::protocol("Client frames must be masked"))
        }
        (Masking::Forbidden, true) => {
            return Err(ArenaError::protocol("Server frames must not be masked"))
        }
        _ => {}
    }

    if buffer.len() < header.frame_len() {
        return Ok(FrameParse::Incomplete);
    }

    let mut payload = buffer[header.payload_offset..header.frame_len()].to_vec();
    if header.masked {
        let mask = &buffer[header.payload_offset - 4..header.payload_offset];
        apply_mask(&mut payload, mask);
    }

    let payload = String::from_utf8(payload)
        .map_err(|_| ArenaError::protocol("Frame payload is not valid UTF-8"))?;

    Ok(FrameParse::Text {
        payload,
        consumed: header.frame_len(),
    })
}

fn apply_mask(payload: &mut [u8], mask: &[u8]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}

fn frame_header(len: usize, masked: bool) -> Result<Vec<u8>> {
    if len > MAX_PAYLOAD_LEN {
        return Err(ArenaError::protocol(format!(
            "Payload of {} bytes exceeds the {} byte frame limit",
            len, MAX_PAYLOAD_LEN
        )));
    }

    let mask_bit = if masked { MASK_BIT } else { 0 };
    let mut header = Vec::with_capacity(8);
    header.push(FIN_BIT | OPCODE_TEXT);
    if len < LENGTH_16BIT as usize {
        header.push(mask_bit | len as u8);
    } else {
        header.push(mask_bit | LENGTH_16BIT);
        header.extend_from_slice(&(len as u16).to_be_bytes());
    }
    Ok(header)
}

/// Encode an unmasked server-to-client text frame
pub fn encode_text_frame(text: &str) -> Result<Vec<u8>> {
    let mut frame = frame_header(text.len(), false)?;
    frame.extend_from_slice(text.as_bytes());
    Ok(frame)
}

/// Encode a masked client-to-server text frame
pub fn encode_masked_text_frame(text: &str, mask: [u8; 4]) -> Result<Vec<u8>> {
    let mut frame = frame_header(text.len(), true)?;
    frame.extend_from_slice(&mask);
    let start = frame.len();
    frame.extend_from_slice(text.as_bytes());
    apply_mask(&mut frame[start..], &mask);
    Ok(frame)
}

/// Masked client close frame with an empty body
pub fn encode_masked_close_frame(mask: [u8; 4]) -> Vec<u8> {
    let mut frame = vec![FIN_BIT | OPCODE_CLOSE, MASK_BIT];
    frame.extend_from_slice(&mask);
    frame
}
