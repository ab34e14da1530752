//! The interpreter's view of the world outside the automaton.

use crate::tables::MemoryTableStore;
use gapl_core::{PackedTuple, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("topic does not exist: {0}")]
    UnknownTopic(String),
    #[error("error publishing event to topic {topic}: {reason}")]
    Rejected { topic: String, reason: String },
    #[error("registrant channel closed")]
    Closed,
}

/// Keyed rows of persistent tables, addressed by table name.
pub trait TableStore: Send + Sync {
    fn has_entry(&self, table: &str, key: &str) -> Result<bool, HostError>;
    fn lookup(&self, table: &str, key: &str) -> Result<Option<Vec<Value>>, HostError>;
    fn update(&self, table: &str, key: &str, row: Vec<Value>) -> Result<(), HostError>;
    fn keys(&self, table: &str) -> Result<Vec<String>, HostError>;
}

/// Effects an executing program may have on its surroundings.
pub trait Host {
    fn automaton_id(&self) -> u64;
    /// Text written by `print`.
    fn print(&mut self, text: &str);
    /// Deliver a tuple to whoever registered the automaton.
    fn send(&mut self, tuple: PackedTuple) -> Result<(), HostError>;
    fn publish(&mut self, topic: &str, tuple: PackedTuple) -> Result<(), HostError>;
    fn tables(&self) -> &dyn TableStore;
}

/// Host that records every effect in memory.
#[derive(Debug, Default)]
pub struct CaptureHost {
    pub id: u64,
    /// Captured `print` output
    pub output: Vec<String>,
    pub sent: Vec<PackedTuple>,
    pub published: Vec<(String, PackedTuple)>,
    /// Topics `publish` accepts. Empty accepts all.
    pub topics: Vec<String>,
    pub tables: MemoryTableStore,
}

impl CaptureHost {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Host for CaptureHost {
    fn automaton_id(&self) -> u64 {
        self.id
    }

    fn print(&mut self, text: &str) {
        self.output.push(text.to_string());
    }

    fn send(&mut self, tuple: PackedTuple) -> Result<(), HostError> {
        self.sent.push(tuple);
        Ok(())
    }

    fn publish(&mut self, topic: &str, tuple: PackedTuple) -> Result<(), HostError> {
        if !self.topics.is_empty() && !self.topics.iter().any(|t| t == topic) {
            return Err(HostError::UnknownTopic(topic.to_string()));
        }
        self.published.push((topic.to_string(), tuple));
        Ok(())
    }

    fn tables(&self) -> &dyn TableStore {
        &self.tables
    }
}
