//! # Message Model
//!
//! The unit of work flowing through consumers, service chains and producers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A message received from or sent to a broker destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier assigned at creation
    pub unique_id: String,
    /// Raw payload bytes
    pub payload: Vec<u8>,
    /// String metadata carried alongside the payload
    pub metadata: HashMap<String, String>,
    /// When the message was created
    pub created_at: DateTime<Utc>,
    /// How many times the broker has handed this message out
    pub delivery_count: u32,
    /// Set by a service to suppress the producer while still committing
    #[serde(default)]
    skip_production: bool,
}

impl Message {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            unique_id: Uuid::new_v4().to_string(),
            payload: payload.into(),
            metadata: HashMap::new(),
            created_at: Utc::now(),
            delivery_count: 0,
            skip_production: false,
        }
    }

    pub fn from_text(text: &str) -> Self {
        Self::new(text.as_bytes().to_vec())
    }

    /// Builder-style metadata insertion
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Payload as UTF-8 text (lossy)
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    pub fn set_payload(&mut self, payload: impl Into<Vec<u8>>) {
        self.payload = payload.into();
    }

    /// Mark the message as fully handled; the workflow commits without producing
    pub fn mark_skip_production(&mut self) {
        self.skip_production = true;
    }

    pub fn skip_production(&self) -> bool {
        self.skip_production
    }
}
