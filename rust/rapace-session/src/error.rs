use std::fmt;

use rapace_wire::ErrorCode;

#[derive(Debug)]
pub enum SessionError {
    Transport(rapace_codec::TransportError),
    Wire(rapace_wire::WireValueError),
    UnknownMessageType(rapace_wire::UnknownMessageType),
    Dispatch(rapace_schema::DispatchError),
    Registry(rapace_schema::RegistryError),
    /// The peer sent a frame with a non-`SCM_RIGHTS` control message; the
    /// frame was discarded per the framing-error policy, no error frame is
    /// emitted, and the session closes.
    BadControlMessage,
    /// We are about to emit `FATAL_PROTOCOL_ERROR` and close.
    Fatal {
        object_id: u32,
        code: ErrorCode,
        message: String,
    },
    /// The peer closed the connection cleanly.
    Closed,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Transport(e) => write!(f, "transport error: {e}"),
            SessionError::Wire(e) => write!(f, "wire decode error: {e}"),
            SessionError::UnknownMessageType(e) => write!(f, "{e}"),
            SessionError::Dispatch(e) => write!(f, "dispatch error: {e}"),
            SessionError::Registry(e) => write!(f, "registry error: {e}"),
            SessionError::BadControlMessage => {
                write!(f, "received a control message that was not SCM_RIGHTS")
            }
            SessionError::Fatal { object_id, code, message } => {
                write!(f, "fatal protocol error on object {object_id}: {code}: {message}")
            }
            SessionError::Closed => write!(f, "session closed by peer"),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<rapace_codec::TransportError> for SessionError {
    fn from(e: rapace_codec::TransportError) -> Self {
        match e {
            rapace_codec::TransportError::Closed => SessionError::Closed,
            other => SessionError::Transport(other),
        }
    }
}

impl From<rapace_wire::WireValueError> for SessionError {
    fn from(e: rapace_wire::WireValueError) -> Self {
        SessionError::Wire(e)
    }
}

impl From<rapace_wire::UnknownMessageType> for SessionError {
    fn from(e: rapace_wire::UnknownMessageType) -> Self {
        SessionError::UnknownMessageType(e)
    }
}

impl From<rapace_schema::DispatchError> for SessionError {
    fn from(e: rapace_schema::DispatchError) -> Self {
        SessionError::Dispatch(e)
    }
}

impl From<rapace_schema::RegistryError> for SessionError {
    fn from(e: rapace_schema::RegistryError) -> Self {
        SessionError::Registry(e)
    }
}
