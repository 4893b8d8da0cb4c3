//! The immutable, server-advertised table of protocols: `ProtocolSpec`,
//! `ObjectSpec` and `Method`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// The type of one method parameter.
///
/// This is richer than the wire's [`rapace_wire::Magic`] byte: `ARRAY`
/// carries no element-type tag on the wire, so the schema records the
/// element kind the way the design notes call for ("array element types
/// are part of the schema, not the wire").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Uint,
    Int,
    F32,
    Seq,
    ObjectId,
    Varchar,
    Fd,
    UintArray,
    StringArray,
}

/// A single method a protocol object exposes in one direction
/// (client-to-server or server-to-client).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub idx: u32,
    pub params: Vec<ParamKind>,
    pub since: u32,
}

impl Method {
    pub fn new(idx: u32, params: Vec<ParamKind>, since: u32) -> Self {
        Self { idx, params, since }
    }
}

/// One object kind defined by a protocol: its client-to-server and
/// server-to-client method lists.
#[derive(Debug, Clone)]
pub struct ObjectSpec {
    pub object_name: String,
    pub c2s: Vec<Method>,
    pub s2c: Vec<Method>,
}

impl ObjectSpec {
    pub fn new(object_name: impl Into<String>) -> Self {
        Self {
            object_name: object_name.into(),
            c2s: Vec::new(),
            s2c: Vec::new(),
        }
    }

    pub fn with_c2s(mut self, method: Method) -> Self {
        self.c2s.push(method);
        self
    }

    pub fn with_s2c(mut self, method: Method) -> Self {
        self.s2c.push(method);
        self
    }

    pub fn c2s_method(&self, idx: u32) -> Option<&Method> {
        self.c2s.iter().find(|m| m.idx == idx)
    }

    pub fn s2c_method(&self, idx: u32) -> Option<&Method> {
        self.s2c.iter().find(|m| m.idx == idx)
    }
}

/// A named, versioned protocol: a set of object kinds it can hand out.
#[derive(Debug, Clone)]
pub struct ProtocolSpec {
    pub name: String,
    pub version: u32,
    pub objects: Vec<ObjectSpec>,
}

impl ProtocolSpec {
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self {
            name: name.into(),
            version,
            objects: Vec::new(),
        }
    }

    pub fn with_object(mut self, object: ObjectSpec) -> Self {
        self.objects.push(object);
        self
    }

    /// The `"name@version"` string used on the wire by `BIND_PROTOCOL` and
    /// `HANDSHAKE_PROTOCOLS`.
    pub fn qualified_name(&self) -> String {
        format!("{}@{}", self.name, self.version)
    }

    pub fn object(&self, object_name: &str) -> Option<&ObjectSpec> {
        self.objects.iter().find(|o| o.object_name == object_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The `"name@version"` string did not parse (missing `@`, or the
    /// version segment was not a valid `u32`).
    InvalidProtocolSpec(String),
    /// No registered protocol matched the requested name/version.
    UnknownProtocol(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::InvalidProtocolSpec(s) => {
                write!(f, "malformed protocol spec string: {s:?}")
            }
            RegistryError::UnknownProtocol(s) => write!(f, "no such protocol: {s:?}"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Splits a `"name@version"` string into its parts.
pub fn parse_qualified_name(s: &str) -> Result<(&str, u32), RegistryError> {
    let (name, version) = s
        .split_once('@')
        .ok_or_else(|| RegistryError::InvalidProtocolSpec(s.to_string()))?;
    let version: u32 = version
        .parse()
        .map_err(|_| RegistryError::InvalidProtocolSpec(s.to_string()))?;
    if name.is_empty() {
        return Err(RegistryError::InvalidProtocolSpec(s.to_string()));
    }
    Ok((name, version))
}

/// The immutable, process-wide table of protocols a server advertises.
///
/// Built once at startup and shared (`Arc`) across sessions; sessions never
/// mutate it, matching the read-mostly contract for cross-session state.
#[derive(Debug, Default)]
pub struct ProtocolRegistry {
    by_qualified_name: HashMap<String, Arc<ProtocolSpec>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: ProtocolSpec) {
        self.by_qualified_name
            .insert(spec.qualified_name(), Arc::new(spec));
    }

    pub fn lookup(&self, qualified_name: &str) -> Result<Arc<ProtocolSpec>, RegistryError> {
        self.by_qualified_name
            .get(qualified_name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownProtocol(qualified_name.to_string()))
    }

    /// The `"name@version"` strings advertised in `HANDSHAKE_PROTOCOLS`.
    pub fn qualified_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_qualified_name.keys().cloned().collect();
        names.sort();
        names
    }
}
