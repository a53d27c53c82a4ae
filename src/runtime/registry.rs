//! Instance registry and handler cache
//!
//! The registry maps instance ids to their learned schema. It is owned by
//! the [`Adapter`](super::Adapter) of a session rather than living in a
//! global, and entries live until the adapter is dropped.

use std::collections::HashMap;

use tracing::debug;

use super::error::{AdapterError, Result};
use super::metadata::Metadata;
use crate::protocol::Node;

/// Schema entries keyed by instance id.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: HashMap<String, Metadata>,
}

impl InstanceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge metadata items into the instance's schema, creating it on first sight.
    pub fn merge(&mut self, instance_id: &str, items: &[Node]) {
        let metadata = self
            .instances
            .entry(instance_id.to_string())
            .or_insert_with(|| {
                debug!(instance = instance_id, "creating instance metadata");
                Metadata::new()
            });
        metadata.merge(items);
    }

    /// Look up an instance's schema.
    pub fn get(&self, instance_id: &str) -> Result<&Metadata> {
        self.instances
            .get(instance_id)
            .ok_or_else(|| AdapterError::UnknownInstance(instance_id.to_string()))
    }

    /// Check whether an instance has been opened.
    pub fn contains(&self, instance_id: &str) -> bool {
        self.instances.contains_key(instance_id)
    }

    /// List known instance ids.
    pub fn instance_ids(&self) -> Vec<String> {
        self.instances.keys().cloned().collect()
    }

    /// Number of known instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Whether no instance has been opened yet.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Loaded handler handles keyed by instance id.
///
/// Nothing in the dispatcher evicts entries; [`HandlerCache::invalidate`] is
/// the hook for callers that know a handler is stale.
#[derive(Debug)]
pub struct HandlerCache<H> {
    handlers: HashMap<String, H>,
}

impl<H> Default for HandlerCache<H> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<H: Clone> HandlerCache<H> {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached handler for an instance.
    pub fn get(&self, instance_id: &str) -> Option<H> {
        self.handlers.get(instance_id).cloned()
    }

    /// Return the cached handler, loading and caching it on a miss.
    pub fn get_or_try_load<E, F>(&mut self, instance_id: &str, load: F) -> std::result::Result<H, E>
    where
        F: FnOnce() -> std::result::Result<H, E>,
    {
        if let Some(handler) = self.handlers.get(instance_id) {
            return Ok(handler.clone());
        }

        let handler = load()?;
        self.handlers
            .insert(instance_id.to_string(), handler.clone());
        Ok(handler)
    }

    /// Drop the cached handler for an instance.
    pub fn invalidate(&mut self, instance_id: &str) -> Option<H> {
        self.handlers.remove(instance_id)
    }

    /// Number of cached handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
