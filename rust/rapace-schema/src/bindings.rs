//! Per-session handle table: allocates object ids and dispatches incoming
//! `GENERIC_PROTOCOL_MESSAGE` frames to the right `Instance`.

use std::collections::HashMap;
use std::os::fd::OwnedFd;
use std::sync::Arc;

use rapace_wire::Parser;

use crate::instance::{decode_args, DispatchError, Instance};
use crate::protocol::{parse_qualified_name, ProtocolRegistry, ProtocolSpec, RegistryError};

/// Which side of a protocol object we're playing: determines whether
/// incoming generic messages are matched against `c2s` or `s2c` methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// Owns the live `Instance` table for one session and allocates handle ids.
///
/// Handle ids start at 1; id 0 is reserved and is never assigned.
pub struct Bindings {
    role: Role,
    next_handle: u32,
    instances: HashMap<u32, (Arc<ProtocolSpec>, Instance)>,
}

impl Bindings {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            next_handle: 1,
            instances: HashMap::new(),
        }
    }

    /// Resolves `name@version` against `registry` and allocates a new
    /// `Instance`, returning its freshly-assigned handle id.
    pub fn bind(
        &mut self,
        registry: &ProtocolRegistry,
        qualified_name: &str,
    ) -> Result<u32, RegistryError> {
        parse_qualified_name(qualified_name)?;
        let spec = match registry.lookup(qualified_name) {
            Ok(spec) => spec,
            Err(e) => {
                tracing::warn!(qualified_name, "bind failed: {e}");
                return Err(e);
            }
        };
        let id = self.next_handle;
        self.next_handle = self
            .next_handle
            .checked_add(1)
            .expect("handle id space exhausted");
        let instance = Instance::new(id, spec.name.clone(), spec.version);
        self.instances.insert(id, (spec, instance));
        Ok(id)
    }

    pub fn instance(&self, object_id: u32) -> Option<&Instance> {
        self.instances.get(&object_id).map(|(_, inst)| inst)
    }

    pub fn instance_mut(&mut self, object_id: u32) -> Option<&mut Instance> {
        self.instances.get_mut(&object_id).map(|(_, inst)| inst)
    }

    /// Removes and drops an instance, running its `on_destroy` hook.
    pub fn remove(&mut self, object_id: u32) {
        self.instances.remove(&object_id);
    }

    /// Decodes and invokes the listener registered for
    /// `(object_id, method_id)`. `parser` must already be positioned right
    /// after the `object_id`/`method_id` values, i.e. at the start of the
    /// method's own parameters; `fds` are the descriptors that arrived
    /// alongside the frame, in order.
    pub fn dispatch(
        &mut self,
        object_id: u32,
        method_id: u32,
        parser: &mut Parser<'_>,
        fds: Vec<OwnedFd>,
    ) -> Result<(), DispatchError> {
        let (spec, instance) = self
            .instances
            .get(&object_id)
            .ok_or(DispatchError::ObjectNotFound(object_id))?;

        let object = spec
            .object(&instance.protocol_name)
            .or_else(|| spec.objects.first())
            .ok_or(DispatchError::MethodNotFound { object_id, method_id })?;

        let method = match self.role {
            Role::Server => object.c2s_method(method_id),
            Role::Client => object.s2c_method(method_id),
        }
        .ok_or(DispatchError::MethodNotFound { object_id, method_id })?;

        let mut fds_iter = fds.into_iter();
        let (values, taken_fds) = decode_args(method, parser, &mut fds_iter)?;

        let listener = instance
            .listener(method_id)
            .ok_or(DispatchError::MethodNotFound { object_id, method_id })?;

        listener(&values, taken_fds).map_err(|e| {
            tracing::warn!(object_id, method_id, "listener returned an error: {e}");
            DispatchError::Listener(e)
        })
    }

    /// Drops every live instance in reverse creation order, running each
    /// `on_destroy` hook as it goes. Called on session teardown.
    pub fn destroy_all(&mut self) {
        let mut ids: Vec<u32> = self.instances.keys().copied().collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        for id in ids {
            self.instances.remove(&id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Method, ObjectSpec, ParamKind};
    use rapace_wire::{Builder, MessageType};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc as StdArc;

    fn registry_with_demo() -> ProtocolRegistry {
        let mut registry = ProtocolRegistry::new();
        registry.register(
            ProtocolSpec::new("demo", 1).with_object(
                ObjectSpec::new("demo")
                    .with_c2s(Method::new(0, vec![ParamKind::Uint, ParamKind::Varchar], 1)),
            ),
        );
        registry
    }

    #[test]
    fn first_handle_is_one_and_zero_is_never_assigned() {
        let registry = registry_with_demo();
        let mut bindings = Bindings::new(Role::Server);
        let id = bindings.bind(&registry, "demo@1").unwrap();
        assert_eq!(id, 1);
        assert_ne!(id, 0);
    }

    #[test]
    fn unknown_protocol_is_rejected() {
        let registry = registry_with_demo();
        let mut bindings = Bindings::new(Role::Server);
        assert!(bindings.bind(&registry, "missing@1").is_err());
    }

    #[test]
    fn dispatch_invokes_registered_listener_exactly_once() {
        let registry = registry_with_demo();
        let mut bindings = Bindings::new(Role::Server);
        let id = bindings.bind(&registry, "demo@1").unwrap();

        let call_count = StdArc::new(AtomicU32::new(0));
        let call_count_clone = call_count.clone();
        bindings.instance_mut(id).unwrap().on(
            0,
            Box::new(move |values, _fds| {
                call_count_clone.fetch_add(1, Ordering::SeqCst);
                assert_eq!(values.len(), 2);
                Ok(())
            }),
        );

        let mut b = Builder::new(MessageType::GenericProtocolMessage);
        b.push_object_id(id);
        b.push_uint(0); // method_id
        b.push_uint(42);
        b.push_varchar(b"hi");
        let bytes = b.finish();

        let mut parser = rapace_wire::Parser::new(&bytes).unwrap();
        assert_eq!(parser.expect_object_id().unwrap(), id);
        assert_eq!(parser.expect_uint().unwrap(), 0);

        bindings.dispatch(id, 0, &mut parser, Vec::new()).unwrap();
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dispatch_to_unknown_object_fails() {
        let mut bindings = Bindings::new(Role::Server);
        let bytes = Builder::new(MessageType::GenericProtocolMessage).finish();
        let mut parser = rapace_wire::Parser::new(&bytes).unwrap();
        let err = bindings.dispatch(1, 0, &mut parser, Vec::new()).unwrap_err();
        assert!(matches!(err, DispatchError::ObjectNotFound(1)));
    }
}
