//! Magic-byte tagged wire values: the typed primitives that make up the
//! payload of every frame, plus the `Builder`/`Parser` pair that writes and
//! reads them.

use std::fmt;

use crate::message_type::MessageType;
use crate::varint::{self, VarIntError};

/// Leading byte identifying the type of value that follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Magic {
    Uint = 0x01,
    Int = 0x02,
    F32 = 0x03,
    Seq = 0x04,
    ObjectId = 0x05,
    Varchar = 0x06,
    Array = 0x07,
    Object = 0x08,
    /// Not part of the original magic-byte table; allocated so file
    /// descriptors get a distinct tag instead of overloading `Object`.
    Fd = 0x09,
    End = 0xFF,
}

impl Magic {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Magic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Magic::Uint => "UINT",
            Magic::Int => "INT",
            Magic::F32 => "F32",
            Magic::Seq => "SEQ",
            Magic::ObjectId => "OBJECT_ID",
            Magic::Varchar => "VARCHAR",
            Magic::Array => "ARRAY",
            Magic::Object => "OBJECT",
            Magic::Fd => "FD",
            Magic::End => "END",
        };
        write!(f, "{name}")
    }
}

impl TryFrom<u8> for Magic {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Ok(match byte {
            0x01 => Magic::Uint,
            0x02 => Magic::Int,
            0x03 => Magic::F32,
            0x04 => Magic::Seq,
            0x05 => Magic::ObjectId,
            0x06 => Magic::Varchar,
            0x07 => Magic::Array,
            0x08 => Magic::Object,
            0x09 => Magic::Fd,
            0xFF => Magic::End,
            other => return Err(other),
        })
    }
}

/// The element layout of an `ARRAY` value. Array elements carry no
/// per-element magic byte; the schema determines how to read them.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayElems {
    Uint32(Vec<u32>),
    String(Vec<Vec<u8>>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WireValueError {
    BufferTooSmall,
    InvalidMagicByte { expected: Magic, found: u8 },
    VarInt(VarIntError),
}

impl fmt::Display for WireValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WireValueError::BufferTooSmall => write!(f, "buffer too small for wire value"),
            WireValueError::InvalidMagicByte { expected, found } => write!(
                f,
                "expected magic byte {expected} (0x{:02x}), found 0x{found:02x}",
                expected.as_u8()
            ),
            WireValueError::VarInt(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for WireValueError {}

impl From<VarIntError> for WireValueError {
    fn from(e: VarIntError) -> Self {
        WireValueError::VarInt(e)
    }
}

/// Builds a single frame: a `MessageType` byte, a sequence of magic-tagged
/// values, and a terminating `END` byte.
///
/// File descriptors queued via [`Builder::push_fd`] are not written inline;
/// the caller collects them with [`Builder::pending_fds`] and hands them to
/// the transport alongside the finished byte buffer.
pub struct Builder {
    buf: Vec<u8>,
    fds: Vec<std::os::fd::RawFd>,
}

impl Builder {
    pub fn new(message_type: MessageType) -> Self {
        let mut buf = Vec::with_capacity(32);
        buf.push(message_type.as_u8());
        Self {
            buf,
            fds: Vec::new(),
        }
    }

    pub fn push_uint(&mut self, value: u32) -> &mut Self {
        self.buf.push(Magic::Uint.as_u8());
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn push_int(&mut self, value: i32) -> &mut Self {
        self.buf.push(Magic::Int.as_u8());
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn push_f32(&mut self, value: f32) -> &mut Self {
        self.buf.push(Magic::F32.as_u8());
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn push_seq(&mut self, value: u32) -> &mut Self {
        self.buf.push(Magic::Seq.as_u8());
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn push_object_id(&mut self, value: u32) -> &mut Self {
        self.buf.push(Magic::ObjectId.as_u8());
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn push_varchar(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.push(Magic::Varchar.as_u8());
        varint::encode(bytes.len() as u32, &mut self.buf);
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn push_uint_array(&mut self, values: &[u32]) -> &mut Self {
        self.buf.push(Magic::Array.as_u8());
        varint::encode(values.len() as u32, &mut self.buf);
        for v in values {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
        self
    }

    pub fn push_string_array<B: AsRef<[u8]>>(&mut self, values: &[B]) -> &mut Self {
        self.buf.push(Magic::Array.as_u8());
        varint::encode(values.len() as u32, &mut self.buf);
        for v in values {
            let bytes = v.as_ref();
            varint::encode(bytes.len() as u32, &mut self.buf);
            self.buf.extend_from_slice(bytes);
        }
        self
    }

    /// Queues a file descriptor to ride out-of-band via `SCM_RIGHTS`.
    ///
    /// Ownership stays with the caller until the transport's send call
    /// returns successfully.
    pub fn push_fd(&mut self, fd: std::os::fd::RawFd) -> &mut Self {
        self.buf.push(Magic::Fd.as_u8());
        self.fds.push(fd);
        self
    }

    /// Appends `END` and returns the finished frame bytes.
    pub fn finish(mut self) -> Vec<u8> {
        self.buf.push(Magic::End.as_u8());
        std::mem::take(&mut self.buf)
    }

    /// File descriptors queued so far via [`Builder::push_fd`].
    pub fn pending_fds(&self) -> &[std::os::fd::RawFd] {
        &self.fds
    }
}

/// Reads a frame built by [`Builder`] back out: the leading `MessageType`
/// followed by an expect-as-you-go cursor over the magic-tagged values.
pub struct Parser<'a> {
    message_type: MessageType,
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    pub fn new(buf: &'a [u8]) -> Result<Self, WireValueError> {
        let (&first, rest) = buf.split_first().ok_or(WireValueError::BufferTooSmall)?;
        let message_type =
            MessageType::try_from(first).map_err(|_| WireValueError::BufferTooSmall)?;
        Ok(Self {
            message_type,
            buf: rest,
            pos: 0,
        })
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn take_magic(&mut self, expected: Magic) -> Result<(), WireValueError> {
        let &byte = self.remaining().first().ok_or(WireValueError::BufferTooSmall)?;
        let found = Magic::try_from(byte).unwrap_or(Magic::End);
        if found != expected {
            return Err(WireValueError::InvalidMagicByte {
                expected,
                found: byte,
            });
        }
        self.pos += 1;
        Ok(())
    }

    fn take_u32_le(&mut self) -> Result<u32, WireValueError> {
        let rem = self.remaining();
        if rem.len() < 4 {
            return Err(WireValueError::BufferTooSmall);
        }
        let value = u32::from_le_bytes(rem[..4].try_into().unwrap());
        self.pos += 4;
        Ok(value)
    }

    fn take_varint(&mut self) -> Result<u32, WireValueError> {
        let (value, len) = varint::decode(self.remaining())?;
        self.pos += len;
        Ok(value)
    }

    fn take_bytes(&mut self, len: usize) -> Result<&'a [u8], WireValueError> {
        let rem = self.remaining();
        if rem.len() < len {
            return Err(WireValueError::BufferTooSmall);
        }
        let bytes = &rem[..len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn expect_uint(&mut self) -> Result<u32, WireValueError> {
        self.take_magic(Magic::Uint)?;
        self.take_u32_le()
    }

    pub fn expect_int(&mut self) -> Result<i32, WireValueError> {
        self.take_magic(Magic::Int)?;
        Ok(self.take_u32_le()? as i32)
    }

    pub fn expect_f32(&mut self) -> Result<f32, WireValueError> {
        self.take_magic(Magic::F32)?;
        Ok(f32::from_bits(self.take_u32_le()?))
    }

    pub fn expect_seq(&mut self) -> Result<u32, WireValueError> {
        self.take_magic(Magic::Seq)?;
        self.take_u32_le()
    }

    pub fn expect_object_id(&mut self) -> Result<u32, WireValueError> {
        self.take_magic(Magic::ObjectId)?;
        self.take_u32_le()
    }

    pub fn expect_varchar(&mut self) -> Result<&'a [u8], WireValueError> {
        self.take_magic(Magic::Varchar)?;
        let len = self.take_varint()? as usize;
        self.take_bytes(len)
    }

    pub fn expect_uint_array(&mut self) -> Result<Vec<u32>, WireValueError> {
        self.take_magic(Magic::Array)?;
        let count = self.take_varint()? as usize;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.take_u32_le()?);
        }
        Ok(out)
    }

    pub fn expect_string_array(&mut self) -> Result<Vec<Vec<u8>>, WireValueError> {
        self.take_magic(Magic::Array)?;
        let count = self.take_varint()? as usize;
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let len = self.take_varint()? as usize;
            out.push(self.take_bytes(len)?.to_vec());
        }
        Ok(out)
    }

    /// Consumes an `FD` marker; the actual descriptor is supplied
    /// out-of-band by the transport layer and matched up positionally.
    pub fn expect_fd(&mut self) -> Result<(), WireValueError> {
        self.take_magic(Magic::Fd)
    }

    /// True once the cursor sits on the `END` magic or the buffer is fully
    /// consumed.
    pub fn is_complete(&self) -> bool {
        match self.remaining().first() {
            None => true,
            Some(&byte) => byte == Magic::End.as_u8(),
        }
    }

    /// Bytes left after the cursor, excluding the `END` byte itself.
    /// Non-empty only if the caller stopped decoding early.
    pub fn trailing(&self) -> &'a [u8] {
        let rem = self.remaining();
        if rem.first() == Some(&Magic::End.as_u8()) {
            &[]
        } else {
            rem
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_frame_is_legal() {
        let bytes = Builder::new(MessageType::Sup).finish();
        assert_eq!(bytes, vec![MessageType::Sup.as_u8(), Magic::End.as_u8()]);
        let parser = Parser::new(&bytes).unwrap();
        assert!(parser.is_complete());
    }

    #[test]
    fn sup_vax_matches_known_bytes() {
        let mut b = Builder::new(MessageType::Sup);
        b.push_varchar(b"VAX");
        let bytes = b.finish();
        assert_eq!(bytes, vec![0x01, 0x06, 0x03, b'V', b'A', b'X', 0xFF]);
    }

    #[test]
    fn round_trip_scalars() {
        let mut b = Builder::new(MessageType::GenericProtocolMessage);
        b.push_uint(42);
        b.push_int(-7);
        b.push_f32(1.5);
        b.push_seq(9);
        b.push_object_id(3);
        let bytes = b.finish();

        let mut p = Parser::new(&bytes).unwrap();
        assert_eq!(p.expect_uint().unwrap(), 42);
        assert_eq!(p.expect_int().unwrap(), -7);
        assert_eq!(p.expect_f32().unwrap(), 1.5);
        assert_eq!(p.expect_seq().unwrap(), 9);
        assert_eq!(p.expect_object_id().unwrap(), 3);
        assert!(p.is_complete());
    }

    #[test]
    fn nan_bit_pattern_is_preserved() {
        let nan = f32::from_bits(0x7fc0_1234);
        let mut b = Builder::new(MessageType::GenericProtocolMessage);
        b.push_f32(nan);
        let bytes = b.finish();
        let mut p = Parser::new(&bytes).unwrap();
        assert_eq!(p.expect_f32().unwrap().to_bits(), nan.to_bits());
    }

    #[test]
    fn varchar_zero_length_is_legal() {
        let mut b = Builder::new(MessageType::Sup);
        b.push_varchar(b"");
        let bytes = b.finish();
        let mut p = Parser::new(&bytes).unwrap();
        assert_eq!(p.expect_varchar().unwrap(), b"");
    }

    #[test]
    fn array_of_count_zero_is_legal() {
        let mut b = Builder::new(MessageType::HandshakeBegin);
        b.push_uint_array(&[]);
        let bytes = b.finish();
        let mut p = Parser::new(&bytes).unwrap();
        assert_eq!(p.expect_uint_array().unwrap(), Vec::<u32>::new());
    }

    #[test]
    fn uint_array_round_trips() {
        let mut b = Builder::new(MessageType::HandshakeBegin);
        b.push_uint_array(&[1, 2, 3]);
        let bytes = b.finish();
        let mut p = Parser::new(&bytes).unwrap();
        assert_eq!(p.expect_uint_array().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn string_array_round_trips() {
        let mut b = Builder::new(MessageType::HandshakeProtocols);
        b.push_string_array(&["demo@1", "other@2"]);
        let bytes = b.finish();
        let mut p = Parser::new(&bytes).unwrap();
        assert_eq!(
            p.expect_string_array().unwrap(),
            vec![b"demo@1".to_vec(), b"other@2".to_vec()]
        );
    }

    #[test]
    fn mismatched_magic_is_rejected() {
        let mut b = Builder::new(MessageType::GenericProtocolMessage);
        b.push_uint(1);
        let bytes = b.finish();
        let mut p = Parser::new(&bytes).unwrap();
        let err = p.expect_varchar().unwrap_err();
        assert!(matches!(err, WireValueError::InvalidMagicByte { .. }));
    }

    #[test]
    fn short_read_is_buffer_too_small() {
        let bytes = vec![MessageType::GenericProtocolMessage.as_u8(), Magic::Uint.as_u8(), 1, 2];
        let mut p = Parser::new(&bytes).unwrap();
        assert_eq!(p.expect_uint().unwrap_err(), WireValueError::BufferTooSmall);
    }

    #[test]
    fn build_generic_protocol_message_round_trips_verbatim() {
        let mut b = Builder::new(MessageType::GenericProtocolMessage);
        b.push_object_id(1);
        b.push_uint(0);
        b.push_uint(42);
        b.push_varchar(b"hi");
        let bytes = b.finish();

        let mut p = Parser::new(&bytes).unwrap();
        assert_eq!(p.message_type(), MessageType::GenericProtocolMessage);
        assert_eq!(p.expect_object_id().unwrap(), 1);
        assert_eq!(p.expect_uint().unwrap(), 0);
        assert_eq!(p.expect_uint().unwrap(), 42);
        assert_eq!(p.expect_varchar().unwrap(), b"hi");
        assert!(p.is_complete());
        assert!(p.trailing().is_empty());
    }

    #[test]
    fn fd_marker_has_no_inline_payload() {
        let mut b = Builder::new(MessageType::GenericProtocolMessage);
        b.push_fd(3);
        assert_eq!(b.pending_fds(), &[3]);
        let bytes = b.finish();
        let mut p = Parser::new(&bytes).unwrap();
        p.expect_fd().unwrap();
        assert!(p.is_complete());
    }
}
