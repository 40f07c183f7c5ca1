//! Error types for adapter tracking

use thiserror::Error;

use crate::ListenerCategory;

/// Failure reported by an adapter-change listener.
///
/// Returning this from a listener asks the adapter list to retry the whole
/// notification pass for that category after a backoff delay.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ListenerError(String);

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors that can occur while tracking network adapters
#[derive(Debug, Error)]
pub enum NetifError {
    /// The OS interface list could not be read
    #[error("Failed to enumerate network interfaces: {0}")]
    Enumeration(#[from] std::io::Error),

    /// A background thread could not be started
    #[error("Failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Listeners kept failing after every retry delay was used up
    #[error("{category} listeners still failing after {attempts} attempts: {last_error}")]
    CallbackRetriesExhausted {
        category: ListenerCategory,
        attempts: usize,
        last_error: ListenerError,
    },
}

/// Result type for adapter tracking operations
pub type Result<T> = std::result::Result<T, NetifError>;
