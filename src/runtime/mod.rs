//! Adapter core and public API
//!
//! This module provides the [`Adapter`] that owns the instance registry, the
//! registered callbacks and the script executor, and turns inbound platform
//! events into outbound ones.

pub mod codec;
pub mod dispatch;
pub mod error;
pub mod invoke;
pub mod metadata;
pub mod registry;

use serde_json::Value;
use tracing::debug;

use crate::config::AdapterConfig;
use crate::protocol::Element;
use crate::script::{ScriptExecutor, ScriptRunner};
use codec::FieldMap;
use error::{Result, TransportError};
use registry::InstanceRegistry;

/// Outbound half of the connection.
pub trait EventSink {
    /// Deliver one event.
    fn send(&mut self, event: &Element) -> std::result::Result<(), TransportError>;
}

impl EventSink for Vec<Element> {
    fn send(&mut self, event: &Element) -> std::result::Result<(), TransportError> {
        self.push(event.clone());
        Ok(())
    }
}

/// Bridges platform events to callbacks and scripts.
///
/// Events are handled strictly one at a time; the adapter is driven by a
/// single session loop.
pub struct Adapter {
    config: AdapterConfig,
    registry: InstanceRegistry,
    callbacks: Callbacks,
    executor: Box<dyn ScriptExecutor>,
}

impl Adapter {
    /// Create an adapter with the default script runner.
    pub fn new(config: AdapterConfig) -> Self {
        let executor = Box::new(ScriptRunner::new(config.scripts.clone()));
        Self::with_executor(config, executor)
    }

    /// Create an adapter with a custom script executor.
    pub fn with_executor(config: AdapterConfig, executor: Box<dyn ScriptExecutor>) -> Self {
        debug!(env_root = ?config.env_root, "creating adapter");
        Self {
            config,
            registry: InstanceRegistry::new(),
            callbacks: Callbacks::default(),
            executor,
        }
    }

    /// Register the handler for request and consume operations.
    pub fn on_request<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(&str, &FieldMap) -> anyhow::Result<Outcome> + Send + 'static,
    {
        self.callbacks.on_request(handler);
        self
    }

    /// Register the handler for one-way operations.
    pub fn on_one_way<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(&str, &FieldMap) -> anyhow::Result<Outcome> + Send + 'static,
    {
        self.callbacks.on_one_way(handler);
        self
    }

    /// Register the handler for response events.
    pub fn on_response<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(&FieldMap) -> anyhow::Result<()> + Send + 'static,
    {
        self.callbacks.on_response(handler);
        self
    }

    /// Get the current configuration
    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    /// Get the instance registry
    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    /// Schema of an instance.
    pub fn metadata(&self, instance_id: &str) -> Result<&Metadata> {
        self.registry.get(instance_id)
    }

    /// Send a data event for the operation named `op_name` of an instance.
    /// Used for notifications and solicits originated by the service.
    pub fn collect_event(
        &self,
        instance_id: &str,
        op_name: &str,
        fields: &FieldMap,
        outbound: &mut dyn EventSink,
    ) -> Result<()> {
        let metadata = self.registry.get(instance_id)?;
        let event = dispatch::collect_event(instance_id, metadata, op_name, fields)?;
        outbound.send(&event)?;
        Ok(())
    }
}

/// Value used as the correlation reference of an inbound event.
pub(crate) fn correlation_id(event: &Element) -> Value {
    event
        .attr(crate::protocol::attrs::ID)
        .cloned()
        .unwrap_or(Value::Null)
}

// Re-export commonly used types
pub use error::{AdapterError, Result as AdapterResult};
pub use invoke::{Callbacks, Outcome};
pub use metadata::{Metadata, OpKind};
