//! Logical commands and their frame encoding.
//!
//! A [`Command`] is the decoded unit inside a frame: direction, opcode and
//! a payload view borrowing the frame bytes. It has no lifetime beyond the
//! buffer cycle it was decoded from.

use super::frame_buffer::FrameBuffer;
use super::wire_format::{
    crc16, CRC_SIZE, MAX_PAYLOAD, MIN_FRAME, OFFSET_LEN, OFFSET_OPCODE, OFFSET_PAYLOAD,
    OFFSET_START, START_REQUEST, START_RESPONSE,
};
use crate::error::{LinkError, Result};

/// Direction of a command, identified by the frame's start marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Initiates an exchange; the peer is expected to answer.
    Request,
    /// Answers the outstanding request.
    Response,
}

impl CommandKind {
    /// The start marker this kind puts on the wire.
    #[inline]
    pub fn start_marker(self) -> u8 {
        match self {
            CommandKind::Request => START_REQUEST,
            CommandKind::Response => START_RESPONSE,
        }
    }

    /// Map a start marker back to a kind.
    pub fn from_start_marker(byte: u8) -> Option<Self> {
        match byte {
            START_REQUEST => Some(CommandKind::Request),
            START_RESPONSE => Some(CommandKind::Response),
            _ => None,
        }
    }
}

/// A decoded command: a typed view into one frame buffer.
#[derive(Debug, Clone, Copy)]
pub struct Command<'a> {
    /// Request or response.
    pub kind: CommandKind,
    /// One-byte operation code selecting the handler.
    pub op_code: u8,
    /// Payload bytes, aliasing the buffer they were decoded from.
    pub payload: &'a [u8],
}

impl<'a> Command<'a> {
    /// Create a command over a borrowed payload.
    pub fn new(kind: CommandKind, op_code: u8, payload: &'a [u8]) -> Self {
        Self {
            kind,
            op_code,
            payload,
        }
    }

    /// Encode this command into `buf` as a complete frame.
    ///
    /// The buffer is reset (zeroed) first; afterwards its filled region is
    /// exactly the wire frame. Fails with [`LinkError::PayloadTooLarge`]
    /// rather than truncating a payload that cannot fit.
    pub fn encode_into(&self, buf: &mut FrameBuffer) -> Result<()> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(LinkError::PayloadTooLarge(self.payload.len()));
        }

        buf.reset();
        let pdu_len = self.payload.len();
        let frame_len = OFFSET_PAYLOAD + pdu_len + CRC_SIZE;
        let storage = buf.storage_mut();

        storage[OFFSET_START] = self.kind.start_marker();
        let len_field = (1 + pdu_len) as u16;
        storage[OFFSET_LEN..OFFSET_LEN + 2].copy_from_slice(&len_field.to_le_bytes());
        storage[OFFSET_OPCODE] = self.op_code;
        storage[OFFSET_PAYLOAD..OFFSET_PAYLOAD + pdu_len].copy_from_slice(self.payload);

        let crc = crc16(&storage[OFFSET_LEN..OFFSET_PAYLOAD + pdu_len]);
        storage[OFFSET_PAYLOAD + pdu_len..frame_len].copy_from_slice(&crc.to_le_bytes());

        buf.set_len(frame_len);
        Ok(())
    }

    /// Decode a command out of a complete frame.
    ///
    /// The payload slice aliases `frame`; nothing is copied. Fails with
    /// [`LinkError::MalformedFrame`] when the bytes cannot hold a command
    /// at all; callers wanting full format validation run
    /// [`validate`](super::wire_format::validate) first.
    pub fn decode(frame: &'a [u8]) -> Result<Self> {
        if frame.len() < MIN_FRAME {
            return Err(LinkError::MalformedFrame);
        }

        let kind =
            CommandKind::from_start_marker(frame[OFFSET_START]).ok_or(LinkError::MalformedFrame)?;
        let len_field = u16::from_le_bytes([frame[OFFSET_LEN], frame[OFFSET_LEN + 1]]) as usize;
        if len_field == 0 || OFFSET_OPCODE + len_field + CRC_SIZE > frame.len() {
            return Err(LinkError::MalformedFrame);
        }

        Ok(Self {
            kind,
            op_code: frame[OFFSET_OPCODE],
            payload: &frame[OFFSET_PAYLOAD..OFFSET_PAYLOAD + len_field - 1],
        })
    }

    /// Payload length in bytes.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// True for [`CommandKind::Response`].
    #[inline]
    pub fn is_response(&self) -> bool {
        self.kind == CommandKind::Response
    }
}

/// Read the opcode of the frame currently held in `buf`, if any.
///
/// Assumes the buffer holds a previously accepted frame; no format check.
pub fn buffered_op_code(buf: &FrameBuffer) -> Option<u8> {
    let filled = buf.filled();
    if filled.len() <= OFFSET_OPCODE {
        return None;
    }
    Some(filled[OFFSET_OPCODE])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::wire_format::FRAME_CAPACITY;

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut buf = FrameBuffer::new();
        let original = Command::new(CommandKind::Request, 0x11, b"yq");
        original.encode_into(&mut buf).unwrap();

        let decoded = Command::decode(buf.filled()).unwrap();
        assert_eq!(decoded.kind, CommandKind::Request);
        assert_eq!(decoded.op_code, 0x11);
        assert_eq!(decoded.payload, b"yq");
    }

    #[test]
    fn test_encode_wire_layout() {
        let mut buf = FrameBuffer::new();
        Command::new(CommandKind::Response, 0x2A, b"ok")
            .encode_into(&mut buf)
            .unwrap();

        let bytes = buf.filled();
        // start | len LE | opcode | payload | crc LE
        assert_eq!(bytes[0], START_RESPONSE);
        assert_eq!(u16::from_le_bytes([bytes[1], bytes[2]]), 3); // opcode + 2
        assert_eq!(bytes[3], 0x2A);
        assert_eq!(&bytes[4..6], b"ok");
        assert_eq!(bytes.len(), 3 + 5);

        let crc = u16::from_le_bytes([bytes[6], bytes[7]]);
        assert_eq!(crc, crc16(&bytes[1..6]));
    }

    #[test]
    fn test_encode_empty_payload() {
        let mut buf = FrameBuffer::new();
        Command::new(CommandKind::Request, 0x11, b"")
            .encode_into(&mut buf)
            .unwrap();

        assert_eq!(buf.len(), MIN_FRAME);
        let decoded = Command::decode(buf.filled()).unwrap();
        assert!(decoded.payload.is_empty());
        assert_eq!(decoded.payload_len(), 0);
    }

    #[test]
    fn test_encode_rejects_oversized_payload() {
        let mut buf = FrameBuffer::new();
        let payload = vec![0xAB; FRAME_CAPACITY];
        let result = Command::new(CommandKind::Request, 0x12, &payload).encode_into(&mut buf);
        assert!(matches!(result, Err(LinkError::PayloadTooLarge(_))));
    }

    #[test]
    fn test_encode_accepts_max_payload() {
        let mut buf = FrameBuffer::new();
        let payload = vec![0xCD; MAX_PAYLOAD];
        Command::new(CommandKind::Request, 0x12, &payload)
            .encode_into(&mut buf)
            .unwrap();
        assert_eq!(buf.len(), FRAME_CAPACITY);

        let decoded = Command::decode(buf.filled()).unwrap();
        assert_eq!(decoded.payload_len(), MAX_PAYLOAD);
    }

    #[test]
    fn test_decode_empty_buffer_is_malformed() {
        assert!(matches!(
            Command::decode(&[]),
            Err(LinkError::MalformedFrame)
        ));
    }

    #[test]
    fn test_decode_unknown_start_marker() {
        let mut buf = FrameBuffer::new();
        Command::new(CommandKind::Request, 0x11, b"yq")
            .encode_into(&mut buf)
            .unwrap();
        let mut bytes = buf.filled().to_vec();
        bytes[0] = 0x00;
        assert!(Command::decode(&bytes).is_err());
    }

    #[test]
    fn test_decode_aliases_frame_bytes() {
        let mut buf = FrameBuffer::new();
        Command::new(CommandKind::Request, 0x12, b"chunk")
            .encode_into(&mut buf)
            .unwrap();

        let frame = buf.filled();
        let decoded = Command::decode(frame).unwrap();
        assert_eq!(decoded.payload.as_ptr(), frame[4..].as_ptr());
    }

    #[test]
    fn test_buffered_op_code() {
        let mut buf = FrameBuffer::new();
        assert_eq!(buffered_op_code(&buf), None);

        Command::new(CommandKind::Request, 0x11, b"yq")
            .encode_into(&mut buf)
            .unwrap();
        assert_eq!(buffered_op_code(&buf), Some(0x11));
    }

    #[test]
    fn test_kind_marker_mapping() {
        assert_eq!(CommandKind::Request.start_marker(), START_REQUEST);
        assert_eq!(CommandKind::Response.start_marker(), START_RESPONSE);
        assert_eq!(
            CommandKind::from_start_marker(START_REQUEST),
            Some(CommandKind::Request)
        );
        assert_eq!(CommandKind::from_start_marker(0x42), None);
        assert!(Command::new(CommandKind::Response, 0, b"").is_response());
    }
}
