#![doc = include_str!("../README.md")]

//! Top-level facade over the four layers of the Rapace core protocol:
//! [`rapace_wire`] (VarInt codec + magic-tagged values), [`rapace_codec`]
//! (the `AF_UNIX` frame transport with `SCM_RIGHTS` FD passing),
//! [`rapace_schema`] (the object/protocol registry), and [`rapace_session`]
//! (the handshake/bind/roundtrip state machine tying the others together).

// Re-export wire layer
pub use rapace_wire::{
    ArrayElems, Builder, ErrorCode, Magic, MessageType, Parser, UnknownMessageType, VarIntError,
    WireValueError, decode_varint, encode_varint,
};

// Re-export frame transport
pub use rapace_codec::{FrameTransport, RawParsedMessage, TransportError};

// Re-export object/protocol registry
pub use rapace_schema::{
    Bindings, DispatchError, Instance, Listener, Method, ObjectSpec, ParamKind, ProtocolRegistry,
    ProtocolSpec, RegistryError, Role, Value, decode_args, parse_qualified_name,
};

// Re-export session state machine
pub use rapace_session::{Session, SessionError, SessionState};

// Re-export tracing for consistency with the rest of the stack.
#[doc(hidden)]
pub extern crate tracing;

/// Convenience re-exports for the common path: stand up a transport, build a
/// registry, drive a session.
///
/// ```ignore
/// use rapace::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Bindings, ErrorCode, FrameTransport, MessageType, Method, ObjectSpec, ParamKind,
        ProtocolRegistry, ProtocolSpec, Role, Session, SessionError, SessionState,
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn facade_drives_a_full_handshake_and_bind() {
        let (client_t, server_t) = FrameTransport::pair().unwrap();

        let mut registry = ProtocolRegistry::new();
        registry.register(
            ProtocolSpec::new("demo", 1).with_object(
                ObjectSpec::new("demo").with_c2s(Method::new(0, vec![ParamKind::Uint], 1)),
            ),
        );
        let registry = Arc::new(registry);

        let mut server = Session::server(server_t, registry.clone(), vec![1]);
        let mut client = Session::client(client_t, registry);

        let server_task = tokio::spawn(async move {
            server.run().await.unwrap();
            assert_eq!(server.state(), SessionState::Bound);
            server
        });

        client.connect().await.unwrap();
        assert_eq!(client.state(), SessionState::Bound);
        assert_eq!(client.chosen_version(), Some(1));

        drop(client);
        let server = server_task.await.unwrap();
        assert_eq!(server.chosen_version(), Some(1));
    }
}
