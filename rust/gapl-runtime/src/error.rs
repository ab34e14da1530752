use crate::compiler::CompileError;
use crate::config::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("subscription to nonexistent topic: {0}")]
    UnknownTopic(String),
    #[error("topic {0} exists with a different schema")]
    TopicConflict(String),
    #[error("no automaton ids left")]
    IdsExhausted,
    #[error("failed to start thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    pub fn is_compile(&self) -> bool {
        matches!(self, RuntimeError::Compile(_))
    }

    pub fn is_unknown_topic(&self) -> bool {
        matches!(self, RuntimeError::UnknownTopic(_))
    }

    pub fn is_config(&self) -> bool {
        matches!(self, RuntimeError::Config(_))
    }
}
