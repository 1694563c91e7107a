//! Fixed set of named responders

use super::Responder;
use crate::router::route_tool_name;
use std::sync::Arc;
use thiserror::Error;

/// Builds a fresh responder for each turn that selects it
pub type ResponderFactory = Arc<dyn Fn() -> Arc<dyn Responder> + Send + Sync>;

/// Name and domain summary of a registered responder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponderDescriptor {
    pub name: String,
    pub description: String,
}

enum Source {
    Shared(Arc<dyn Responder>),
    Scoped(ResponderFactory),
}

struct Entry {
    descriptor: ResponderDescriptor,
    source: Source,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Registry has no responders")]
    Empty,
    #[error("Responder name must not be empty")]
    EmptyName,
    /// Same name, or a name that maps to an already offered route
    #[error("Responder registered twice: {0}")]
    Duplicate(String),
}

/// Responders available to the router, fixed at construction
pub struct ResponderRegistry {
    entries: Vec<Entry>,
}

impl ResponderRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            entries: Vec::new(),
        }
    }

    /// Get the responder registered under `name`.
    ///
    /// Scoped entries build a new instance on every call.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Responder>> {
        let entry = self.entries.iter().find(|e| e.descriptor.name == name)?;
        match &entry.source {
            Source::Shared(responder) => Some(Arc::clone(responder)),
            Source::Scoped(factory) => {
                tracing::debug!(responder = %name, "Building request-scoped responder");
                Some(factory())
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.descriptor.name == name)
    }

    /// Registered names, in registration order
    pub fn names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .map(|e| e.descriptor.name.as_str())
            .collect()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &ResponderDescriptor> {
        self.entries.iter().map(|e| &e.descriptor)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub struct RegistryBuilder {
    entries: Vec<Entry>,
}

impl RegistryBuilder {
    /// Register one instance shared by every turn
    #[must_use]
    pub fn shared(mut self, responder: Arc<dyn Responder>) -> Self {
        self.entries.push(Entry {
            descriptor: ResponderDescriptor {
                name: responder.name().to_string(),
                description: responder.description().to_string(),
            },
            source: Source::Shared(responder),
        });
        self
    }

    /// Register a factory invoked for every turn routed to `name`
    #[must_use]
    pub fn scoped<F>(
        mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        factory: F,
    ) -> Self
    where
        F: Fn() -> Arc<dyn Responder> + Send + Sync + 'static,
    {
        self.entries.push(Entry {
            descriptor: ResponderDescriptor {
                name: name.into(),
                description: description.into(),
            },
            source: Source::Scoped(Arc::new(factory)),
        });
        self
    }

    pub fn build(self) -> Result<ResponderRegistry, RegistryError> {
        if self.entries.is_empty() {
            return Err(RegistryError::Empty);
        }
        let mut tools: Vec<String> = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let name = &entry.descriptor.name;
            if name.is_empty() {
                return Err(RegistryError::EmptyName);
            }
            let tool = route_tool_name(name);
            if tools.contains(&tool) {
                return Err(RegistryError::Duplicate(name.clone()));
            }
            tools.push(tool);
        }
        Ok(ResponderRegistry {
            entries: self.entries,
        })
    }
}
