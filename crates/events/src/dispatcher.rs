//! Typed command dispatch.
//!
//! Handlers are registered in an explicit registry at startup, keyed by the
//! command's type. A missing registration is an explicit dispatch error, not
//! a naming-convention miss discovered at runtime.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

/// A request to change one aggregate.
///
/// Commands are transient (never persisted) and are transformed into events
/// by the aggregate they target.
pub trait Command: core::fmt::Debug + Send + Sync + 'static {
    /// What a successful dispatch returns.
    type Output;

    /// Failure the handler can produce.
    type Error: core::fmt::Debug + Send + Sync + 'static;

    /// Stable name used in logs and dispatch errors.
    fn name() -> &'static str;
}

/// Handles one command type.
pub trait Handles<C: Command>: Send + Sync {
    fn handle(&self, command: C) -> Result<C::Output, C::Error>;
}

impl<C, H> Handles<C> for Arc<H>
where
    C: Command,
    H: Handles<C> + ?Sized,
{
    fn handle(&self, command: C) -> Result<C::Output, C::Error> {
        (**self).handle(command)
    }
}

#[derive(Debug, Error)]
pub enum DispatchError<E> {
    /// No handler was registered for the command type.
    #[error("no handler registered for {0}")]
    NoHandler(&'static str),

    /// The handler ran and rejected the command.
    #[error("handler failed: {0:?}")]
    Handler(E),
}

/// Explicit command-to-handler registry, built once at startup.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `C`. The last registration wins.
    pub fn register<C: Command>(&mut self, handler: Arc<dyn Handles<C>>) {
        self.handlers.insert(TypeId::of::<C>(), Box::new(handler));
    }

    /// Resolve and invoke the handler for `command`.
    pub fn dispatch<C: Command>(&self, command: C) -> Result<C::Output, DispatchError<C::Error>> {
        let handler = self
            .handlers
            .get(&TypeId::of::<C>())
            .and_then(|entry| entry.downcast_ref::<Arc<dyn Handles<C>>>())
            .ok_or(DispatchError::NoHandler(C::name()))?;

        handler.handle(command).map_err(DispatchError::Handler)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl core::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
