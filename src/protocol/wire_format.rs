//! Wire format layout and validation.
//!
//! Implements the frame layout:
//! ```text
//! ┌───────┬─────────┬────────┬───────────────┬─────────┐
//! │ Start │ Length  │ Opcode │ Payload       │ CRC     │
//! │ 1 byte│ 2 bytes │ 1 byte │ length-1 bytes│ 2 bytes │
//! │       │ u16 LE  │        │               │ u16 LE  │
//! └───────┴─────────┴────────┴───────────────┴─────────┘
//! ```
//!
//! `length` counts the opcode byte plus the payload, so the total frame
//! size on the wire is `length + 5`. The CRC covers everything from the
//! length field through the end of the payload (the start marker and the
//! trailer itself are excluded).

use crate::error::{LinkError, Result};

/// Start marker for a request frame.
pub const START_REQUEST: u8 = 0x59;

/// Start marker for a response frame.
pub const START_RESPONSE: u8 = 0x51;

/// Byte offset of the start marker.
pub const OFFSET_START: usize = 0;

/// Byte offset of the length field.
pub const OFFSET_LEN: usize = 1;

/// Byte offset of the opcode.
pub const OFFSET_OPCODE: usize = 3;

/// Byte offset of the payload.
pub const OFFSET_PAYLOAD: usize = 4;

/// Size of the CRC trailer in bytes.
pub const CRC_SIZE: usize = 2;

/// Bytes of framing around the payload: start + length + opcode + crc.
pub const FRAME_OVERHEAD: usize = OFFSET_PAYLOAD + CRC_SIZE;

/// Smallest well-formed frame: framing only, empty payload.
pub const MIN_FRAME: usize = FRAME_OVERHEAD;

/// Fixed frame capacity. No frame, inbound or outbound, may exceed this.
pub const FRAME_CAPACITY: usize = 1040;

/// Largest payload that fits in a frame.
pub const MAX_PAYLOAD: usize = FRAME_CAPACITY - FRAME_OVERHEAD;

/// Number of prefix bytes needed before the total frame length is known.
pub const LEN_PREFIX: usize = OFFSET_OPCODE;

/// Compute the 16-bit CRC over `bytes`.
///
/// CRC-CCITT, polynomial `0x1021`, MSB first. The initial value is zero;
/// interoperating peers compute the trailer the same way.
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &b in bytes {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Decode the total frame length from the 3-byte prefix (start + length).
///
/// Returns `None` until at least [`LEN_PREFIX`] bytes are present. The
/// returned value includes all framing overhead and may exceed
/// [`FRAME_CAPACITY`]; the caller decides whether that is an error.
pub fn expected_frame_len(prefix: &[u8]) -> Option<usize> {
    if prefix.len() < LEN_PREFIX {
        return None;
    }
    let len = u16::from_le_bytes([prefix[OFFSET_LEN], prefix[OFFSET_LEN + 1]]);
    Some(len as usize + OFFSET_OPCODE + CRC_SIZE)
}

/// Validate a complete frame.
///
/// Checks, in order:
/// 1. the start marker is `expected_start` (the marker the current role
///    is prepared to accept),
/// 2. the length field is consistent with the actual frame size,
/// 3. the opcode equals `expected_op` when one is pinned (host role
///    correlating a response to its outstanding request),
/// 4. the CRC trailer, when `verify_crc` is set.
///
/// All failures collapse into [`LinkError::InvalidFormat`]; callers do not
/// distinguish sub-causes.
pub fn validate(
    frame: &[u8],
    expected_start: u8,
    expected_op: Option<u8>,
    verify_crc: bool,
) -> Result<()> {
    if frame.len() < MIN_FRAME {
        tracing::error!(len = frame.len(), "invalid frame format: short");
        return Err(LinkError::InvalidFormat);
    }

    if frame[OFFSET_START] != expected_start {
        tracing::error!(start = frame[OFFSET_START], "invalid frame format: start");
        return Err(LinkError::InvalidFormat);
    }

    let len_field = u16::from_le_bytes([frame[OFFSET_LEN], frame[OFFSET_LEN + 1]]) as usize;
    // The length field counts the opcode, so zero cannot describe a frame.
    if len_field == 0 || len_field + OFFSET_OPCODE + CRC_SIZE != frame.len() {
        tracing::error!(len_field, actual = frame.len(), "invalid frame format: length");
        return Err(LinkError::InvalidFormat);
    }

    if let Some(op) = expected_op {
        if frame[OFFSET_OPCODE] != op {
            tracing::error!(
                got = frame[OFFSET_OPCODE],
                want = op,
                "invalid frame format: op code"
            );
            return Err(LinkError::InvalidFormat);
        }
    }

    if verify_crc {
        let crc_offset = frame.len() - CRC_SIZE;
        let wire_crc = u16::from_le_bytes([frame[crc_offset], frame[crc_offset + 1]]);
        let computed = crc16(&frame[OFFSET_LEN..crc_offset]);
        if wire_crc != computed {
            tracing::error!(wire_crc, computed, "invalid frame format: crc");
            return Err(LinkError::InvalidFormat);
        }
    }

    Ok(())
}
