#![deny(unsafe_code)]

//! VarInt codec and magic-byte tagged wire value layer.
//!
//! This crate is deliberately free of I/O: it only knows how to turn typed
//! values into bytes and back. The socket transport lives in `rapace-codec`,
//! the handshake state machine in `rapace-session`, and the object/protocol
//! registry in `rapace-schema`.

pub mod message_type;
pub mod value;
pub mod varint;

pub use message_type::{ErrorCode, MessageType, UnknownErrorCode, UnknownMessageType};
pub use value::{ArrayElems, Builder, Magic, Parser, WireValueError};
pub use varint::{VarIntError, decode as decode_varint, encode as encode_varint};
