use std::sync::Arc;

use rapace::{Method, ObjectSpec, ParamKind, ProtocolRegistry, ProtocolSpec};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// A single `greeter@1` protocol with two methods: `greet(name: varchar)`
/// and `send_fd(fd: fd)`. Shared across scenarios so the wire bytes each
/// test reasons about stay consistent.
pub fn demo_registry() -> Arc<ProtocolRegistry> {
    let mut registry = ProtocolRegistry::new();
    registry.register(
        ProtocolSpec::new("greeter", 1).with_object(
            ObjectSpec::new("greeter")
                .with_c2s(Method::new(0, vec![ParamKind::Varchar], 1))
                .with_c2s(Method::new(1, vec![ParamKind::Fd], 1)),
        ),
    );
    Arc::new(registry)
}
