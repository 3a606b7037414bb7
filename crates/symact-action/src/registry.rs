use std::collections::HashMap;

use tracing::{debug, warn};

use crate::action::{Action, ExecutionContext};
use crate::error::{RegistryError, Result};
use crate::handler::{ActionHandler, TypedHandler};
use crate::open_session::OpenSession;

/// Identifier-keyed table of action handlers, immutable once built.
///
/// Built once at startup with [`ActionRegistryBuilder`] and only read
/// afterwards, so lookups need no synchronization.
pub struct ActionRegistry<C: ExecutionContext> {
    handlers: HashMap<&'static str, Box<dyn ActionHandler<C>>>,
}

impl<C: ExecutionContext> ActionRegistry<C> {
    /// Start building a registry. `OpenSession` is always included.
    pub fn builder() -> ActionRegistryBuilder<C> {
        ActionRegistryBuilder::new()
    }

    /// Look up the handler for `identifier`.
    pub fn find(&self, identifier: &str) -> Result<&dyn ActionHandler<C>> {
        self.handlers
            .get(identifier)
            .map(|handler| handler.as_ref())
            .ok_or_else(|| RegistryError::UnknownIdentifier(identifier.to_string()))
    }

    /// Check if an action is registered under `identifier`.
    pub fn contains(&self, identifier: &str) -> bool {
        self.handlers.contains_key(identifier)
    }

    /// Registered identifiers, sorted.
    pub fn identifiers(&self) -> Vec<&'static str> {
        let mut identifiers: Vec<&'static str> = self.handlers.keys().copied().collect();
        identifiers.sort_unstable();
        identifiers
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl<C: ExecutionContext> Default for ActionRegistry<C> {
    /// A registry holding only `OpenSession`.
    fn default() -> Self {
        ActionRegistryBuilder::new().build()
    }
}

impl<C: ExecutionContext> std::fmt::Debug for ActionRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("identifiers", &self.identifiers())
            .finish()
    }
}

/// Collects actions for an [`ActionRegistry`].
pub struct ActionRegistryBuilder<C: ExecutionContext> {
    handlers: HashMap<&'static str, Box<dyn ActionHandler<C>>>,
}

impl<C: ExecutionContext> ActionRegistryBuilder<C> {
    pub fn new() -> Self {
        let mut handlers: HashMap<&'static str, Box<dyn ActionHandler<C>>> = HashMap::new();
        handlers.insert(
            <OpenSession as crate::ActionSpec>::IDENTIFIER,
            Box::new(TypedHandler::<OpenSession>::new()),
        );
        Self { handlers }
    }

    /// Add action `A`.
    ///
    /// Registering an identifier twice is a construction error: the builder
    /// is consumed and no registry is produced.
    pub fn register<A: Action<C>>(mut self) -> Result<Self> {
        if self.handlers.contains_key(A::IDENTIFIER) {
            warn!(action = A::IDENTIFIER, "duplicate action registration");
            return Err(RegistryError::DuplicateIdentifier(A::IDENTIFIER));
        }
        debug!(action = A::IDENTIFIER, "registered action");
        self.handlers
            .insert(A::IDENTIFIER, Box::new(TypedHandler::<A>::new()));
        Ok(self)
    }

    pub fn build(self) -> ActionRegistry<C> {
        ActionRegistry {
            handlers: self.handlers,
        }
    }
}

impl<C: ExecutionContext> Default for ActionRegistryBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}
