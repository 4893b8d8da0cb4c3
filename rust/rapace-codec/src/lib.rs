//! Frame layer / socket transport: reads and writes whole logical messages
//! over one connected `AF_UNIX` stream socket, carrying out-of-band file
//! descriptors via `SCM_RIGHTS`.
//!
//! This crate does not interpret message bodies; it hands a
//! [`RawParsedMessage`] up to the session layer (`rapace-session`), which
//! knows how to read `MessageType` bytes and magic-tagged values.

mod raw;
mod transport;

pub use transport::{FrameTransport, RawParsedMessage, TransportError};
