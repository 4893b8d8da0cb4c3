//! The handshake/bind/roundtrip session state machine: drives one
//! [`rapace_codec::FrameTransport`] through `LISTEN_SUP → AWAITING_ACK →
//! BOUND → (FATAL | CLOSED)`, dispatching bound protocol messages through a
//! [`rapace_schema::Bindings`] table.

mod error;
mod session;
mod state;

pub use error::SessionError;
pub use session::Session;
pub use state::SessionState;
