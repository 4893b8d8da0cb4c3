use std::fmt;

/// The leading byte of every frame, identifying what kind of control or data
/// message follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Invalid = 0,
    Sup = 1,
    HandshakeBegin = 2,
    HandshakeAck = 3,
    HandshakeProtocols = 4,
    BindProtocol = 10,
    NewObject = 11,
    FatalProtocolError = 12,
    RoundtripRequest = 13,
    RoundtripDone = 14,
    GenericProtocolMessage = 100,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownMessageType(pub u8);

impl fmt::Display for UnknownMessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown message type byte: 0x{:02x}", self.0)
    }
}

impl std::error::Error for UnknownMessageType {}

impl MessageType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = UnknownMessageType;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Ok(match byte {
            0 => MessageType::Invalid,
            1 => MessageType::Sup,
            2 => MessageType::HandshakeBegin,
            3 => MessageType::HandshakeAck,
            4 => MessageType::HandshakeProtocols,
            10 => MessageType::BindProtocol,
            11 => MessageType::NewObject,
            12 => MessageType::FatalProtocolError,
            13 => MessageType::RoundtripRequest,
            14 => MessageType::RoundtripDone,
            100 => MessageType::GenericProtocolMessage,
            other => return Err(UnknownMessageType(other)),
        })
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Invalid => "INVALID",
            MessageType::Sup => "SUP",
            MessageType::HandshakeBegin => "HANDSHAKE_BEGIN",
            MessageType::HandshakeAck => "HANDSHAKE_ACK",
            MessageType::HandshakeProtocols => "HANDSHAKE_PROTOCOLS",
            MessageType::BindProtocol => "BIND_PROTOCOL",
            MessageType::NewObject => "NEW_OBJECT",
            MessageType::FatalProtocolError => "FATAL_PROTOCOL_ERROR",
            MessageType::RoundtripRequest => "ROUNDTRIP_REQUEST",
            MessageType::RoundtripDone => "ROUNDTRIP_DONE",
            MessageType::GenericProtocolMessage => "GENERIC_PROTOCOL_MESSAGE",
        };
        write!(f, "{name}")
    }
}

/// Error codes carried by `FATAL_PROTOCOL_ERROR` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    UnknownProtocol = 1,
    UnsupportedVersion = 2,
    BadHandshake = 3,
    BadPayload = 4,
    BadMethod = 5,
    NoMemory = 6,
    Internal = 7,
}

impl ErrorCode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownErrorCode(pub u32);

impl fmt::Display for UnknownErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown error code: {}", self.0)
    }
}

impl std::error::Error for UnknownErrorCode {}

impl TryFrom<u32> for ErrorCode {
    type Error = UnknownErrorCode;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => ErrorCode::UnknownProtocol,
            2 => ErrorCode::UnsupportedVersion,
            3 => ErrorCode::BadHandshake,
            4 => ErrorCode::BadPayload,
            5 => ErrorCode::BadMethod,
            6 => ErrorCode::NoMemory,
            7 => ErrorCode::Internal,
            other => return Err(UnknownErrorCode(other)),
        })
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::UnknownProtocol => "UNKNOWN_PROTOCOL",
            ErrorCode::UnsupportedVersion => "UNSUPPORTED_VERSION",
            ErrorCode::BadHandshake => "BAD_HANDSHAKE",
            ErrorCode::BadPayload => "BAD_PAYLOAD",
            ErrorCode::BadMethod => "BAD_METHOD",
            ErrorCode::NoMemory => "NO_MEMORY",
            ErrorCode::Internal => "INTERNAL",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_known_bytes() {
        for (byte, ty) in [
            (1u8, MessageType::Sup),
            (2, MessageType::HandshakeBegin),
            (3, MessageType::HandshakeAck),
            (4, MessageType::HandshakeProtocols),
            (10, MessageType::BindProtocol),
            (11, MessageType::NewObject),
            (12, MessageType::FatalProtocolError),
            (13, MessageType::RoundtripRequest),
            (14, MessageType::RoundtripDone),
            (100, MessageType::GenericProtocolMessage),
        ] {
            assert_eq!(MessageType::try_from(byte).unwrap(), ty);
            assert_eq!(ty.as_u8(), byte);
        }
    }

    #[test]
    fn unknown_byte_is_rejected() {
        assert_eq!(MessageType::try_from(5).unwrap_err(), UnknownMessageType(5));
    }

    #[test]
    fn error_code_round_trips_through_u32() {
        for code in [
            ErrorCode::UnknownProtocol,
            ErrorCode::UnsupportedVersion,
            ErrorCode::BadHandshake,
            ErrorCode::BadPayload,
            ErrorCode::BadMethod,
            ErrorCode::NoMemory,
            ErrorCode::Internal,
        ] {
            assert_eq!(ErrorCode::try_from(code.as_u32()).unwrap(), code);
        }
        assert_eq!(ErrorCode::try_from(99).unwrap_err(), UnknownErrorCode(99));
    }
}
