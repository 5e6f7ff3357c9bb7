//! Connection lookup by logical name.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use super::Connection;
use crate::error::{ConduitError, ConduitResult};
use crate::state_machine::Component;

/// Explicit registry of shared connections
///
/// Channels resolve their connection here, so every channel naming the same
/// connection shares one instance and one recovery coordinator.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<Connection>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection; names must be unique
    pub fn register(&self, connection: Arc<Connection>) -> ConduitResult<()> {
        let name = connection.name().to_string();
        match self.connections.entry(name) {
            Entry::Occupied(entry) => Err(ConduitError::configuration(
                "connection registry",
                format!("connection '{}' is already registered", entry.key()),
            )),
            Entry::Vacant(entry) => {
                debug!(connection = %entry.key(), "Registering connection");
                entry.insert(connection);
                Ok(())
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Connection>> {
        self.connections.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Look up a connection, failing with a configuration error when unknown
    pub fn resolve(&self, name: &str) -> ConduitResult<Arc<Connection>> {
        self.get(name).ok_or_else(|| {
            ConduitError::configuration(
                "connection registry",
                format!("unknown connection '{name}'"),
            )
        })
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Connection>> {
        self.connections.remove(name).map(|(_, connection)| connection)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
