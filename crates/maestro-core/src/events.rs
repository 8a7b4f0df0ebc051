//! Event system abstractions for engine progress notifications.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::AppError;

/// Represents a domain event emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier
    pub id: Uuid,
    /// Event type (e.g., "workflow.started", "workflow.step.completed")
    pub event_type: String,
    /// Timestamp when the event occurred
    pub timestamp: DateTime<Utc>,
    /// Event payload
    pub payload: serde_json::Value,
    /// Metadata for the event
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Event {
    /// Create a new event with the given type and payload.
    pub fn new<T: Serialize>(event_type: impl Into<String>, payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            payload: serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
            metadata: HashMap::new(),
        }
    }

    /// Add metadata to the event.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Check if the event matches a given type pattern.
    pub fn matches(&self, pattern: &str) -> bool {
        if pattern == "*" {
            return true;
        }
        if pattern.ends_with(".*") {
            let prefix = &pattern[..pattern.len() - 2];
            return self.event_type.starts_with(prefix);
        }
        self.event_type == pattern
    }
}

/// Outbound notification channel the engine uses to announce progress.
///
/// A surrounding service layer maps this to whatever transport it chooses
/// (websocket fan-out, message bus, webhooks). The engine only publishes.
#[async_trait]
pub trait NotificationPort: Send + Sync {
    /// Publish an event on a channel (by convention, the workflow id).
    async fn publish(&self, channel: &str, event: &Event) -> Result<(), AppError>;
}

/// Capturing notifier for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryNotifier {
    published: std::sync::Mutex<Vec<(String, Event)>>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events published on a given channel, in order.
    pub fn events_for(&self, channel: &str) -> Vec<Event> {
        self.published
            .lock()
            .map(|published| {
                published
                    .iter()
                    .filter(|(c, _)| c == channel)
                    .map(|(_, e)| e.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All published events matching a type pattern.
    pub fn events_matching(&self, pattern: &str) -> Vec<Event> {
        self.published
            .lock()
            .map(|published| {
                published
                    .iter()
                    .filter(|(_, e)| e.matches(pattern))
                    .map(|(_, e)| e.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl NotificationPort for InMemoryNotifier {
    async fn publish(&self, channel: &str, event: &Event) -> Result<(), AppError> {
        self.published
            .lock()
            .map_err(|_| AppError::Internal("notifier mutex poisoned".to_string()))?
            .push((channel.to_string(), event.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_creation() {
        let event = Event::new("test.event", serde_json::json!({"key": "value"}));

        assert!(!event.id.is_nil());
        assert_eq!(event.event_type, "test.event");
        assert!(event.payload.get("key").is_some());
    }

    #[test]
    fn test_event_with_metadata() {
        let event = Event::new("test.event", serde_json::json!({}))
            .with_metadata("source", "test")
            .with_metadata("version", "1.0");

        assert_eq!(event.metadata.get("source"), Some(&"test".to_string()));
        assert_eq!(event.metadata.get("version"), Some(&"1.0".to_string()));
    }

    #[test]
    fn test_event_matches() {
        let event = Event::new("workflow.step.completed", serde_json::json!({}));

        assert!(event.matches("*"));
        assert!(event.matches("workflow.step.completed"));
        assert!(event.matches("workflow.*"));
        assert!(!event.matches("elicitation.*"));
        assert!(!event.matches("workflow.completed"));
    }

    #[tokio::test]
    async fn test_in_memory_notifier() {
        let notifier = InMemoryNotifier::new();
        let event = Event::new("workflow.started", serde_json::json!({}));

        notifier.publish("wf-1", &event).await.unwrap();
        notifier
            .publish("wf-2", &Event::new("workflow.completed", serde_json::json!({})))
            .await
            .unwrap();

        assert_eq!(notifier.events_for("wf-1").len(), 1);
        assert_eq!(notifier.events_matching("workflow.*").len(), 2);
    }
}
