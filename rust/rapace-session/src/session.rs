//! Drives the `SUP` / `HANDSHAKE_*` / `BIND_PROTOCOL` / `ROUNDTRIP_*`
//! exchange over one [`FrameTransport`], mediating version negotiation and
//! roundtrip ordering.
//!
//! A session is single-threaded by contract: `run` owns the receive loop
//! and dispatch, processing one frame at a time, which is what gives the
//! roundtrip fence its ordering guarantee for free — every reply is sent
//! before the next incoming frame is even read.

use std::sync::Arc;

use rapace_codec::FrameTransport;
use rapace_schema::{Bindings, ProtocolRegistry, Role};
use rapace_wire::{Builder, ErrorCode, MessageType, Parser};

use crate::error::SessionError;
use crate::state::SessionState;

const SUP_PAYLOAD: &[u8] = b"VAX";

pub struct Session {
    transport: FrameTransport,
    role: Role,
    state: SessionState,
    registry: Arc<ProtocolRegistry>,
    bindings: Bindings,
    supported_versions: Vec<u32>,
    chosen_version: Option<u32>,
}

impl Session {
    /// Builds a session in `LISTEN_SUP`, ready to answer a client's `SUP`.
    pub fn server(
        transport: FrameTransport,
        registry: Arc<ProtocolRegistry>,
        supported_versions: Vec<u32>,
    ) -> Self {
        Self {
            transport,
            role: Role::Server,
            state: SessionState::ListenSup,
            registry,
            bindings: Bindings::new(Role::Server),
            supported_versions,
            chosen_version: None,
        }
    }

    /// Builds a session for the connecting side. Call [`Session::connect`]
    /// before using [`Session::run`].
    pub fn client(transport: FrameTransport, registry: Arc<ProtocolRegistry>) -> Self {
        Self {
            transport,
            role: Role::Client,
            state: SessionState::ListenSup,
            registry,
            bindings: Bindings::new(Role::Client),
            supported_versions: Vec::new(),
            chosen_version: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn chosen_version(&self) -> Option<u32> {
        self.chosen_version
    }

    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    pub fn bindings_mut(&mut self) -> &mut Bindings {
        &mut self.bindings
    }

    /// Looks up a live instance by handle id without needing a mutable
    /// borrow of the whole session.
    pub fn instance(&self, object_id: u32) -> Option<&rapace_schema::Instance> {
        self.bindings.instance(object_id)
    }

    /// Local request to destroy a bound handle: runs its `on_destroy` hook
    /// and removes it from the table. The handle id is not reassigned.
    pub fn destroy_handle(&mut self, object_id: u32) {
        self.bindings.remove(object_id);
    }

    async fn send(&self, bytes: Vec<u8>) -> Result<(), SessionError> {
        self.transport.send_with_fds(&bytes, &[]).await?;
        Ok(())
    }

    async fn send_fatal(&mut self, object_id: u32, code: ErrorCode, message: &str) {
        let mut b = Builder::new(MessageType::FatalProtocolError);
        b.push_object_id(object_id);
        b.push_uint(code.as_u32());
        b.push_varchar(message.as_bytes());
        let bytes = b.finish();
        tracing::warn!(object_id, %code, message, "sending FATAL_PROTOCOL_ERROR");
        // Best-effort: if the send itself fails the peer is gone anyway.
        let _ = self.transport.send_with_fds(&bytes, &[]).await;
        self.state = SessionState::Fatal;
    }

    /// Client-side handshake: send `SUP("VAX")`, await `HANDSHAKE_BEGIN`
    /// and `HANDSHAKE_PROTOCOLS`, pick a version, send `HANDSHAKE_ACK`.
    pub async fn connect(&mut self) -> Result<(), SessionError> {
        let mut sup = Builder::new(MessageType::Sup);
        sup.push_varchar(SUP_PAYLOAD);
        self.send(sup.finish()).await?;

        let begin = self.recv_frame().await?;
        let mut parser = Parser::new(&begin.data)?;
        if parser.message_type() != MessageType::HandshakeBegin {
            return Err(SessionError::Fatal {
                object_id: 0,
                code: ErrorCode::BadHandshake,
                message: "expected HANDSHAKE_BEGIN".into(),
            });
        }
        let offered_versions = parser.expect_uint_array()?;

        let protocols = self.recv_frame().await?;
        let mut parser = Parser::new(&protocols.data)?;
        if parser.message_type() != MessageType::HandshakeProtocols {
            return Err(SessionError::Fatal {
                object_id: 0,
                code: ErrorCode::BadHandshake,
                message: "expected HANDSHAKE_PROTOCOLS".into(),
            });
        }
        let _advertised = parser.expect_string_array()?;

        let version = *offered_versions.iter().max().ok_or_else(|| SessionError::Fatal {
            object_id: 0,
            code: ErrorCode::UnsupportedVersion,
            message: "server offered no versions".into(),
        })?;

        let mut ack = Builder::new(MessageType::HandshakeAck);
        ack.push_uint(version);
        self.send(ack.finish()).await?;

        self.chosen_version = Some(version);
        self.state = SessionState::Bound;
        Ok(())
    }

    async fn send_built(&self, builder: Builder) -> Result<(), SessionError> {
        let fds: Vec<std::os::fd::RawFd> = builder.pending_fds().to_vec();
        let bytes = builder.finish();
        self.transport.send_with_fds(&bytes, &fds).await?;
        Ok(())
    }

    /// Client-side: binds `qualified_name` (e.g. `"greeter@1"`) and returns
    /// the handle id the server allocated for it. `seq` is echoed back
    /// verbatim in `NEW_OBJECT` and is the caller's to pick.
    pub async fn bind_protocol(&mut self, seq: u32, qualified_name: &str) -> Result<u32, SessionError> {
        let mut b = Builder::new(MessageType::BindProtocol);
        b.push_uint(seq);
        b.push_varchar(qualified_name.as_bytes());
        self.send_built(b).await?;

        let msg = self.recv_frame().await?;
        let mut parser = Parser::new(&msg.data)?;
        match parser.message_type() {
            MessageType::NewObject => {
                let object_id = parser.expect_object_id()?;
                let _echoed_seq = parser.expect_seq()?;
                Ok(object_id)
            }
            MessageType::FatalProtocolError => Err(self.parse_fatal_frame(&mut parser)?),
            _ => Err(SessionError::BadControlMessage),
        }
    }

    /// Client-side: sends a `GENERIC_PROTOCOL_MESSAGE` to `object_id`.
    /// `encode` appends the method's parameters (and queues any file
    /// descriptors via [`Builder::push_fd`]) after the envelope is written.
    pub async fn call(
        &mut self,
        object_id: u32,
        method_id: u32,
        encode: impl FnOnce(&mut Builder),
    ) -> Result<(), SessionError> {
        let mut b = Builder::new(MessageType::GenericProtocolMessage);
        b.push_object_id(object_id);
        b.push_uint(method_id);
        encode(&mut b);
        self.send_built(b).await
    }

    /// Client-side: sends `ROUNDTRIP_REQUEST(seq)` and waits for the
    /// matching `ROUNDTRIP_DONE(seq)`, which the peer only emits after every
    /// frame sent ahead of this one has been fully processed.
    pub async fn roundtrip(&mut self, seq: u32) -> Result<(), SessionError> {
        let mut req = Builder::new(MessageType::RoundtripRequest);
        req.push_uint(seq);
        self.send_built(req).await?;

        let msg = self.recv_frame().await?;
        let mut parser = Parser::new(&msg.data)?;
        if parser.message_type() != MessageType::RoundtripDone {
            return Err(SessionError::BadControlMessage);
        }
        let echoed = parser.expect_uint()?;
        if echoed != seq {
            return Err(SessionError::BadControlMessage);
        }
        Ok(())
    }

    fn parse_fatal_frame(&mut self, parser: &mut Parser<'_>) -> Result<SessionError, SessionError> {
        let object_id = parser.expect_object_id()?;
        let code = ErrorCode::try_from(parser.expect_uint()?).unwrap_or(ErrorCode::Internal);
        let message = String::from_utf8_lossy(parser.expect_varchar()?).into_owned();
        self.state = SessionState::Fatal;
        Ok(SessionError::Fatal { object_id, code, message })
    }

    async fn recv_frame(&self) -> Result<rapace_codec::RawParsedMessage, SessionError> {
        let msg = self.transport.parse_frame().await?;
        if msg.bad {
            return Err(SessionError::BadControlMessage);
        }
        Ok(msg)
    }

    /// Drives the session for as long as it stays in `BOUND` (or the
    /// pre-bound handshake states for the server role). Returns once the
    /// session transitions to `FATAL` or `CLOSED`.
    pub async fn run(&mut self) -> Result<(), SessionError> {
        loop {
            if matches!(self.state, SessionState::Closed | SessionState::Fatal) {
                return Ok(());
            }
            self.step().await?;
        }
    }

    /// Processes exactly one incoming frame for the current state. `run` is
    /// just this in a loop; callers that need to interleave work between
    /// frames (e.g. registering a listener right after a bind) can drive the
    /// session with this directly instead.
    pub async fn step(&mut self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Closed | SessionState::Fatal => Ok(()),
            SessionState::ListenSup => self.step_listen_sup().await,
            SessionState::AwaitingAck => self.step_awaiting_ack().await,
            SessionState::Bound => self.step_bound().await,
        }
    }

    async fn step_listen_sup(&mut self) -> Result<(), SessionError> {
        let msg = match self.recv_frame().await {
            Ok(msg) => msg,
            Err(SessionError::Closed) => {
                self.state = SessionState::Closed;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut parser = Parser::new(&msg.data)?;
        let is_valid_sup =
            parser.message_type() == MessageType::Sup && parser.expect_varchar().ok() == Some(SUP_PAYLOAD);

        if !is_valid_sup {
            self.send_fatal(0, ErrorCode::BadHandshake, "expected SUP(\"VAX\")").await;
            return Ok(());
        }

        let mut begin = Builder::new(MessageType::HandshakeBegin);
        begin.push_uint_array(&self.supported_versions);
        self.send(begin.finish()).await?;

        let qualified_names = self.registry.qualified_names();
        let mut protocols = Builder::new(MessageType::HandshakeProtocols);
        protocols.push_string_array(&qualified_names);
        self.send(protocols.finish()).await?;

        self.state = SessionState::AwaitingAck;
        Ok(())
    }

    async fn step_awaiting_ack(&mut self) -> Result<(), SessionError> {
        let msg = self.recv_frame().await?;
        let mut parser = Parser::new(&msg.data)?;

        if parser.message_type() != MessageType::HandshakeAck {
            self.send_fatal(0, ErrorCode::BadHandshake, "expected HANDSHAKE_ACK").await;
            return Ok(());
        }
        let version = parser.expect_uint()?;

        if !self.supported_versions.contains(&version) {
            self.send_fatal(0, ErrorCode::UnsupportedVersion, "unsupported version").await;
            return Ok(());
        }

        self.chosen_version = Some(version);
        self.state = SessionState::Bound;
        tracing::debug!(version, "session BOUND");
        Ok(())
    }

    async fn step_bound(&mut self) -> Result<(), SessionError> {
        let msg = match self.recv_frame().await {
            Ok(msg) => msg,
            Err(SessionError::Closed) => {
                self.state = SessionState::Closed;
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut parser = Parser::new(&msg.data)?;
        match parser.message_type() {
            MessageType::BindProtocol => self.handle_bind_protocol(&mut parser).await,
            MessageType::RoundtripRequest => self.handle_roundtrip_request(&mut parser).await,
            MessageType::GenericProtocolMessage => {
                self.handle_generic_message(&mut parser, msg.fds).await
            }
            MessageType::FatalProtocolError => {
                self.state = SessionState::Fatal;
                Ok(())
            }
            _other => {
                self.send_fatal(0, ErrorCode::BadHandshake, "unexpected frame while BOUND").await;
                Ok(())
            }
        }
    }

    async fn handle_bind_protocol(&mut self, parser: &mut Parser<'_>) -> Result<(), SessionError> {
        let seq = parser.expect_uint()?;
        let qualified_name = parser.expect_varchar()?.to_vec();
        let qualified_name = String::from_utf8_lossy(&qualified_name).into_owned();

        match self.bindings.bind(&self.registry, &qualified_name) {
            Ok(handle) => {
                let mut reply = Builder::new(MessageType::NewObject);
                reply.push_object_id(handle);
                reply.push_seq(seq);
                self.send(reply.finish()).await?;
                Ok(())
            }
            Err(_) => {
                self.send_fatal(0, ErrorCode::UnknownProtocol, &qualified_name).await;
                Ok(())
            }
        }
    }

    async fn handle_roundtrip_request(&mut self, parser: &mut Parser<'_>) -> Result<(), SessionError> {
        let seq = parser.expect_uint()?;
        // Every reply for frames received before this one has already been
        // sent by the time we get here, since `run` processes one frame at
        // a time and replies inline before reading the next.
        let mut done = Builder::new(MessageType::RoundtripDone);
        done.push_seq(seq);
        self.send(done.finish()).await?;
        Ok(())
    }

    async fn handle_generic_message(
        &mut self,
        parser: &mut Parser<'_>,
        fds: Vec<std::os::fd::OwnedFd>,
    ) -> Result<(), SessionError> {
        let object_id = parser.expect_object_id()?;
        let method_id = parser.expect_uint()?;

        match self.bindings.dispatch(object_id, method_id, parser, fds) {
            Ok(()) => Ok(()),
            Err(e) => {
                let code = match &e {
                    rapace_schema::DispatchError::BadPayload(_) => ErrorCode::BadPayload,
                    rapace_schema::DispatchError::ObjectNotFound(_)
                    | rapace_schema::DispatchError::MethodNotFound { .. } => ErrorCode::BadMethod,
                    rapace_schema::DispatchError::Listener(_) => ErrorCode::Internal,
                };
                self.send_fatal(object_id, code, &e.to_string()).await;
                Ok(())
            }
        }
    }
}

impl Drop for Session {
    /// Runs `on_destroy` for every live instance in reverse creation order.
    /// Un-adopted file descriptors and the socket itself close as their
    /// owning values drop along with `self`.
    fn drop(&mut self) {
        self.bindings.destroy_all();
    }
}
