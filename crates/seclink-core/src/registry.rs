//! Event dispatch registry for routing decrypted envelopes.
//!
//! The registry is an explicit table from application event name to a
//! handler object, built once per channel with a builder and immutable
//! afterwards. Typed registration decodes the envelope payload into the
//! handler's declared parameter shape before invoking it; an event with
//! several parameters carries a JSON array decoded into a tuple.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

// ============================================================================
// Error Types
// ============================================================================

/// Errors returned by event handlers.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Payload did not decode into the declared parameter shape
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    /// Handler ran but failed
    #[error("processing failed: {0}")]
    ProcessingFailed(String),
}

/// Errors from dispatch operations.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No handler registered for the event name
    #[error("no handler registered for \"{0}\"")]
    NoHandler(String),
    /// Handler returned an error
    #[error("handler error: {0}")]
    Handler(#[from] HandlerError),
}

// ============================================================================
// Event Handler Trait
// ============================================================================

/// Trait for handling a decrypted application event.
///
/// Handlers receive the envelope's payload as a JSON string. Most
/// callers register plain functions through [`EventRegistryBuilder::on`]
/// instead of implementing this directly; a direct implementation is the
/// escape hatch for handlers that need async work or custom decoding.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, payload: &str) -> Result<(), HandlerError>;
}

// Adapts a typed function to the payload-string interface.
struct TypedHandler<T, F> {
    f: F,
    _marker: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T, F> EventHandler for TypedHandler<T, F>
where
    T: DeserializeOwned + Send,
    F: Fn(T) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, payload: &str) -> Result<(), HandlerError> {
        let value: T =
            serde_json::from_str(payload).map_err(|e| HandlerError::InvalidPayload(e.to_string()))?;
        (self.f)(value)
    }
}

// Ignores the payload entirely.
struct EmptyHandler<F> {
    f: F,
}

#[async_trait]
impl<F> EventHandler for EmptyHandler<F>
where
    F: Fn() -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, _payload: &str) -> Result<(), HandlerError> {
        (self.f)()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Immutable event-name to handler table.
pub struct EventRegistry {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl EventRegistry {
    pub fn builder() -> EventRegistryBuilder {
        EventRegistryBuilder {
            handlers: HashMap::new(),
        }
    }

    /// A registry with no handlers; every dispatch reports `NoHandler`.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    pub fn contains(&self, event: &str) -> bool {
        self.handlers.contains_key(event)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Route a decrypted envelope to its handler.
    ///
    /// `NoHandler` means the event name is unknown to this registry; the
    /// caller logs and drops the message, the channel stays usable.
    pub async fn dispatch(&self, event: &str, payload: &str) -> Result<(), DispatchError> {
        let handler = self
            .handlers
            .get(event)
            .cloned()
            .ok_or_else(|| DispatchError::NoHandler(event.to_string()))?;
        handler.handle(payload).await?;
        debug!(event, "dispatched");
        Ok(())
    }
}

/// Builder populating an [`EventRegistry`].
///
/// Registration is explicit and happens once at channel construction;
/// there is no runtime scanning.
pub struct EventRegistryBuilder {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl EventRegistryBuilder {
    /// Register a handler object for an event name. A second
    /// registration for the same name replaces the first.
    pub fn handler(mut self, event: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        let event = event.into();
        if self.handlers.insert(event.clone(), handler).is_some() {
            debug!(event = %event, "replacing existing handler");
        }
        self
    }

    /// Register a typed function; the payload is decoded into `T` before
    /// the function runs. For a multi-parameter event, `T` is a tuple
    /// and the payload a JSON array.
    pub fn on<T, F>(self, event: impl Into<String>, f: F) -> Self
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.handler(
            event,
            Arc::new(TypedHandler {
                f,
                _marker: PhantomData,
            }),
        )
    }

    /// Register a function for an event that carries no parameters.
    pub fn on_empty<F>(self, event: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.handler(event, Arc::new(EmptyHandler { f }))
    }

    pub fn build(self) -> EventRegistry {
        EventRegistry {
            handlers: self.handlers,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
