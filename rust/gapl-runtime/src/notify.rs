//! Messages from an automaton back to whoever registered it.

use crossbeam_channel::{Receiver, Sender};
use gapl_core::PackedTuple;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Behavior,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Init => f.write_str("initialization"),
            Phase::Behavior => f.write_str("behavior"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A line written by `print`.
    Output(String),
    /// A tuple passed to `send`.
    Sent(PackedTuple),
    /// The automaton failed and is being torn down. Sent at most once.
    Error { phase: Phase, message: String },
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Output(text) => f.write_str(text),
            Notification::Sent(tuple) => write!(f, "{}", tuple),
            Notification::Error { phase, message } => {
                write!(f, "{} execution error: {}", phase, message)
            }
        }
    }
}

pub type Notifier = Sender<Notification>;

/// Unbounded notification channel.
pub fn channel() -> (Notifier, Receiver<Notification>) {
    crossbeam_channel::unbounded()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_names_phase() {
        let n = Notification::Error {
            phase: Phase::Init,
            message: "stack underflow".into(),
        };
        assert_eq!(n.to_string(), "initialization execution error: stack underflow");
    }
}
