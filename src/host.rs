//! Pipeline host: component ids and the extension registry
//!
//! Components declare which extension they need by id; the host resolves
//! the id at startup. A missing id, or one naming an extension of the
//! wrong kind, fails startup.

use crate::breaker::CircuitBreaker;
use crate::storage::StorageExtension;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Identifies a component instance: `type` or `type/name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ComponentId {
    kind: String,
    name: Option<String>,
}

impl ComponentId {
    pub fn new(kind: impl Into<String>) -> Self {
        ComponentId {
            kind: kind.into(),
            name: None,
        }
    }

    pub fn with_name(kind: impl Into<String>, name: impl Into<String>) -> Self {
        ComponentId {
            kind: kind.into(),
            name: Some(name.into()),
        }
    }

    /// Parse `type` or `type/name`
    pub fn parse(s: &str) -> Result<Self, HostError> {
        let mut parts = s.splitn(2, '/');
        let kind = parts.next().unwrap_or_default().trim();
        if kind.is_empty() || !kind.chars().all(is_id_char) {
            return Err(HostError::InvalidId(s.to_string()));
        }
        match parts.next() {
            None => Ok(ComponentId::new(kind)),
            Some(name) => {
                let name = name.trim();
                if name.is_empty() || name.contains('/') {
                    return Err(HostError::InvalidId(s.to_string()));
                }
                Ok(ComponentId::with_name(kind, name))
            }
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}/{}", self.kind, name),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::str::FromStr for ComponentId {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ComponentId::parse(s)
    }
}

impl TryFrom<String> for ComponentId {
    type Error = HostError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ComponentId::parse(&value)
    }
}

impl From<ComponentId> for String {
    fn from(id: ComponentId) -> Self {
        id.to_string()
    }
}

/// Errors resolving components on the host
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("invalid component id {0:?}")]
    InvalidId(String),
    #[error("extension {0} not found")]
    NotFound(ComponentId),
    #[error("extension {id} is a {actual} extension, expected {expected}")]
    WrongKind {
        id: ComponentId,
        expected: &'static str,
        actual: &'static str,
    },
}

/// An extension registered on the host
#[derive(Clone)]
pub enum Extension {
    Storage(Arc<dyn StorageExtension>),
    CircuitBreaker(Arc<CircuitBreaker>),
}

impl Extension {
    pub fn kind(&self) -> &'static str {
        match self {
            Extension::Storage(_) => "storage",
            Extension::CircuitBreaker(_) => "circuit breaker",
        }
    }
}

impl std::fmt::Debug for Extension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Extension").field(&self.kind()).finish()
    }
}

/// Registry of extensions available to components at startup
#[derive(Debug, Clone, Default)]
pub struct Host {
    extensions: HashMap<ComponentId, Extension>,
}

impl Host {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_extension(&mut self, id: ComponentId, extension: Extension) {
        self.extensions.insert(id, extension);
    }

    pub fn with_extension(mut self, id: ComponentId, extension: Extension) -> Self {
        self.add_extension(id, extension);
        self
    }

    pub fn extension(&self, id: &ComponentId) -> Option<&Extension> {
        self.extensions.get(id)
    }

    /// Resolve a storage extension by id
    pub fn storage(&self, id: &ComponentId) -> Result<Arc<dyn StorageExtension>, HostError> {
        match self.extensions.get(id) {
            Some(Extension::Storage(ext)) => Ok(ext.clone()),
            Some(other) => Err(HostError::WrongKind {
                id: id.clone(),
                expected: "storage",
                actual: other.kind(),
            }),
            None => Err(HostError::NotFound(id.clone())),
        }
    }

    /// Resolve a circuit breaker extension by id
    pub fn circuit_breaker(&self, id: &ComponentId) -> Result<Arc<CircuitBreaker>, HostError> {
        match self.extensions.get(id) {
            Some(Extension::CircuitBreaker(cb)) => Ok(cb.clone()),
            Some(other) => Err(HostError::WrongKind {
                id: id.clone(),
                expected: "circuit breaker",
                actual: other.kind(),
            }),
            None => Err(HostError::NotFound(id.clone())),
        }
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }
}
