//! Object & Protocol registry: the server-advertised `ProtocolSpec` table,
//! the per-session handle table of bound `Instance`s, and dispatch of
//! incoming `GENERIC_PROTOCOL_MESSAGE` frames to registered listeners.

mod bindings;
mod instance;
mod protocol;

pub use bindings::{Bindings, Role};
pub use instance::{decode_args, DispatchError, Instance, Listener, Value};
pub use protocol::{
    parse_qualified_name, Method, ObjectSpec, ParamKind, ProtocolRegistry, ProtocolSpec,
    RegistryError,
};
