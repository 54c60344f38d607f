//! Wire protocol: frame layout, codec and the fixed frame buffers.

pub mod command;
pub mod frame_buffer;
pub mod wire_format;

pub use command::{buffered_op_code, Command, CommandKind};
pub use frame_buffer::FrameBuffer;
pub use wire_format::{
    crc16, expected_frame_len, validate, FRAME_CAPACITY, MAX_PAYLOAD, START_REQUEST,
    START_RESPONSE,
};
