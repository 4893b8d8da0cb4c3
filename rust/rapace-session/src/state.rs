use std::fmt;

/// `LISTEN_SUP → AWAITING_ACK → BOUND → (FATAL | CLOSED)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    ListenSup,
    AwaitingAck,
    Bound,
    Fatal,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::ListenSup => "LISTEN_SUP",
            SessionState::AwaitingAck => "AWAITING_ACK",
            SessionState::Bound => "BOUND",
            SessionState::Fatal => "FATAL",
            SessionState::Closed => "CLOSED",
        };
        write!(f, "{name}")
    }
}
