pub mod config;
pub mod error;
pub mod events;
pub mod kv;
pub mod llm;
pub mod types;

// Re-export specific items to avoid ambiguity
pub use config::*;
pub use error::*;
pub use types::*;

// Re-export port traits
pub use events::{Event, InMemoryNotifier, NotificationPort};
pub use kv::{KeyValueStore, KvError};
pub use llm::{Completion, CompletionRequest, LlmError, LlmProvider, TokenUsage};
