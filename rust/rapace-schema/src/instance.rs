//! Live bound protocol instances and generic-message dispatch.

use std::collections::HashMap;
use std::fmt;
use std::os::fd::OwnedFd;

use rapace_wire::{Parser, WireValueError};

use crate::protocol::{Method, ParamKind};

/// A decoded method argument. Array element types are carried by the
/// schema, not the wire, so the two array variants stay distinct.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Uint(u32),
    Int(i32),
    F32(f32),
    Seq(u32),
    ObjectId(u32),
    Varchar(Vec<u8>),
    UintArray(Vec<u32>),
    StringArray(Vec<Vec<u8>>),
    /// Placeholder marking where a file descriptor parameter sits in the
    /// argument list; the descriptor itself travels in the listener's `fds`
    /// parameter, in declaration order.
    Fd,
}

#[derive(Debug)]
pub enum DispatchError {
    ObjectNotFound(u32),
    MethodNotFound { object_id: u32, method_id: u32 },
    BadPayload(WireValueError),
    /// The listener returned an application-level error.
    Listener(String),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::ObjectNotFound(id) => write!(f, "no instance bound at object id {id}"),
            DispatchError::MethodNotFound { object_id, method_id } => write!(
                f,
                "object {object_id} has no method {method_id}"
            ),
            DispatchError::BadPayload(e) => write!(f, "bad method payload: {e}"),
            DispatchError::Listener(msg) => write!(f, "listener error: {msg}"),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<WireValueError> for DispatchError {
    fn from(e: WireValueError) -> Self {
        DispatchError::BadPayload(e)
    }
}

/// A registered method handler. Receives the decoded arguments and any file
/// descriptors that arrived with the frame, in declaration order.
///
/// Ownership of `fds` transfers to the callback: if it drops the vector
/// without storing the descriptors elsewhere, they are closed; storing one
/// (e.g. in `Instance::user_data`) is how a listener "adopts" it.
pub type Listener = Box<dyn Fn(&[Value], Vec<OwnedFd>) -> Result<(), String> + Send + Sync>;

/// A live handle bound to a protocol object within one session.
pub struct Instance {
    pub id: u32,
    pub protocol_name: String,
    pub version: u32,
    pub user_data: Option<Box<dyn std::any::Any + Send + Sync>>,
    on_destroy: Option<Box<dyn FnOnce(&mut Instance) + Send>>,
    listeners: HashMap<u32, Listener>,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("protocol_name", &self.protocol_name)
            .field("version", &self.version)
            .field("registered_methods", &self.listeners.len())
            .finish()
    }
}

impl Instance {
    pub fn new(id: u32, protocol_name: impl Into<String>, version: u32) -> Self {
        assert_ne!(id, 0, "handle id 0 is reserved and must never be assigned");
        Self {
            id,
            protocol_name: protocol_name.into(),
            version,
            user_data: None,
            on_destroy: None,
            listeners: HashMap::new(),
        }
    }

    pub fn set_on_destroy(&mut self, hook: impl FnOnce(&mut Instance) + Send + 'static) {
        self.on_destroy = Some(Box::new(hook));
    }

    pub fn on(&mut self, method_idx: u32, listener: Listener) {
        self.listeners.insert(method_idx, listener);
    }

    pub fn listener(&self, method_idx: u32) -> Option<&Listener> {
        self.listeners.get(&method_idx)
    }

    /// Runs the `on_destroy` hook exactly once, if one was registered.
    pub fn destroy(&mut self) {
        if let Some(hook) = self.on_destroy.take() {
            hook(self);
        }
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Decodes a `GENERIC_PROTOCOL_MESSAGE` payload against a method's declared
/// parameter list, peeling file descriptors off `fds` in order for every
/// `Fd` parameter.
pub fn decode_args(
    method: &Method,
    parser: &mut Parser<'_>,
    fds: &mut std::vec::IntoIter<OwnedFd>,
) -> Result<(Vec<Value>, Vec<OwnedFd>), DispatchError> {
    let mut values = Vec::with_capacity(method.params.len());
    let mut taken_fds = Vec::new();
    for kind in &method.params {
        let value = match kind {
            ParamKind::Uint => Value::Uint(parser.expect_uint()?),
            ParamKind::Int => Value::Int(parser.expect_int()?),
            ParamKind::F32 => Value::F32(parser.expect_f32()?),
            ParamKind::Seq => Value::Seq(parser.expect_seq()?),
            ParamKind::ObjectId => Value::ObjectId(parser.expect_object_id()?),
            ParamKind::Varchar => Value::Varchar(parser.expect_varchar()?.to_vec()),
            ParamKind::UintArray => Value::UintArray(parser.expect_uint_array()?),
            ParamKind::StringArray => Value::StringArray(parser.expect_string_array()?),
            ParamKind::Fd => {
                parser.expect_fd()?;
                let fd = fds
                    .next()
                    .ok_or_else(|| DispatchError::BadPayload(WireValueError::BufferTooSmall))?;
                taken_fds.push(fd);
                Value::Fd
            }
        };
        values.push(value);
    }
    Ok((values, taken_fds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ObjectSpec;
    use rapace_wire::{Builder, MessageType};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn handle_zero_is_rejected() {
        let result = std::panic::catch_unwind(|| Instance::new(0, "demo", 1));
        assert!(result.is_err());
    }

    #[test]
    fn on_destroy_runs_exactly_once() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = ran.clone();
        let mut inst = Instance::new(1, "demo", 1);
        inst.set_on_destroy(move |_| {
            ran_clone.store(true, Ordering::SeqCst);
        });
        inst.destroy();
        inst.destroy();
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn decode_args_matches_declared_params() {
        let method = Method::new(0, vec![ParamKind::Uint, ParamKind::Varchar], 1);
        let mut b = Builder::new(MessageType::GenericProtocolMessage);
        b.push_object_id(1);
        b.push_uint(0);
        b.push_uint(42);
        b.push_varchar(b"hi");
        let bytes = b.finish();

        let mut parser = Parser::new(&bytes).unwrap();
        parser.expect_object_id().unwrap();
        parser.expect_uint().unwrap();

        let mut fds = Vec::new().into_iter();
        let (values, taken) = decode_args(&method, &mut parser, &mut fds).unwrap();
        assert_eq!(values, vec![Value::Uint(42), Value::Varchar(b"hi".to_vec())]);
        assert!(taken.is_empty());
    }

    #[test]
    fn listener_dropping_fds_closes_them_by_default() {
        let _ = ObjectSpec::new("unused"); // keep import alive for doc clarity
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();
        let mut inst = Instance::new(1, "demo", 1);
        inst.on(
            1,
            Box::new(move |_values, _fds| {
                called_clone.store(true, Ordering::SeqCst);
                Ok(())
            }),
        );
        let listener = inst.listener(1).unwrap();
        listener(&[], Vec::new()).unwrap();
        assert!(called.load(Ordering::SeqCst));
    }
}
