//! Error types for DKG result finalization

use crate::types::RequestId;
use thiserror::Error;

/// Result type alias for DKG result finalization
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while signing, publishing or resolving a DKG result
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid protocol configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Publishing index outside of the 1-based member range
    #[error("Invalid publishing index: {0}, must be >= 1")]
    InvalidIndex(usize),

    /// Caller handed in something that cannot be processed
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The chain could not calculate a result hash
    #[error("Hash computation failed: {0}")]
    HashComputation(String),

    /// Signature primitive failed
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Invalid signature
    #[error("Invalid signature")]
    InvalidSignature,

    /// Signature or key could not be checked
    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    /// Operation called in the wrong protocol state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Chain collaborator failure
    #[error("Chain error: {0}")]
    Chain(String),

    /// Broadcast channel failure
    #[error("Broadcast error: {0}")]
    Broadcast(String),

    /// Conflict resolution started before anything was submitted
    #[error("nothing submitted for request {0}")]
    NothingSubmitted(RequestId),

    /// The signing state machine stopped outside of the submission state
    #[error("Unexpected final state: {0}")]
    UnexpectedFinalState(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl Error {
    /// Whether the orchestrator may retry the phase that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::NothingSubmitted(_) | Error::Chain(_) | Error::Broadcast(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
