//! 💀 The error taxonomy — which failures end the run, and which ones just get counted.
//!
//! Fatal stuff rides inside `anyhow::Error` like everywhere else in refill. The markers below
//! are attached as `.context(...)` so the CLI can peel the onion and pick an exit code.
//! Record-level stuff (`TransformError`, failed items) never becomes an `anyhow::Error` at all:
//! it gets absorbed into `RunCounters` and surfaces only in the summary. 🦆

use thiserror::Error;

/// 🚨 The run-enders. Each variant maps to its own exit code in the CLI.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FatalError {
    /// 🔧 Bad knobs. Caught at INIT before a single byte touches the target.
    #[error("💀 configuration rejected: {0}")]
    Configuration(String),
    /// 📡 Source or target unreachable, never ready, or stopped answering mid-load.
    #[error("💀 could not reach {0}")]
    Connectivity(String),
    /// 🗑️ The replace precondition (DEL / drop+create) blew up.
    #[error("💀 could not clear target collection '{0}'")]
    ClearTarget(String),
}

impl FatalError {
    /// 🚪 Process exit code for this flavour of doom.
    pub fn exit_code(&self) -> i32 {
        match self {
            FatalError::Configuration(_) => 2,
            FatalError::Connectivity(_) => 3,
            FatalError::ClearTarget(_) => 4,
        }
    }

    /// 🧅 Peel the context layers until we find one of ours. `None` = some other fatal thing.
    /// anyhow's `downcast_ref` walks nested contexts for us; `chain()` would not, because
    /// each layer there is a private `ContextError<C, E>` wrapper.
    pub fn classify(err: &anyhow::Error) -> Option<&FatalError> {
        err.downcast_ref::<FatalError>()
    }
}

/// 🙈 One record could not be shaped into a target entry. Skipped, counted, forgiven.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("record '{record}' could not be transformed: {reason}")]
pub struct TransformError {
    pub record: String,
    pub reason: String,
}

impl TransformError {
    pub fn new(record: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            record: record.into(),
            reason: reason.into(),
        }
    }
}
