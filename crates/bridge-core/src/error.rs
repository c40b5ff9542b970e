//! Named error kinds shared across the dispatcher and reliability substrate.
//!
//! These map one-to-one onto the error kinds in the design spec: each
//! variant corresponds to a propagation policy, not just a message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("protocol decode error: {0}")]
    ProtocolDecode(String),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("authentication failure: {0}")]
    AuthFailure(String),

    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    #[error("circuit open for {0}")]
    CircuitOpen(String),

    #[error("validation failure: {0}")]
    ValidationFailure(String),

    #[error("fatal invariant violated: {0}")]
    FatalInvariant(String),
}

impl BridgeError {
    /// Whether this kind is a connection-class error for the purposes of the
    /// Bridge Dispatcher's Healing Protocol trigger (§4.1).
    pub fn is_connection_class(&self) -> bool {
        matches!(self, BridgeError::TransientNetwork(_) | BridgeError::CircuitOpen(_))
    }

    /// The app-facing severity used when logging this error to the Error
    /// Aggregator.
    pub fn severity(&self) -> crate::model::Severity {
        use crate::model::Severity;
        match self {
            BridgeError::TransientNetwork(_) | BridgeError::CircuitOpen(_) => Severity::Warning,
            BridgeError::ProtocolDecode(_)
            | BridgeError::UnknownTool(_)
            | BridgeError::UnknownAgent(_)
            | BridgeError::BudgetExceeded(_)
            | BridgeError::ValidationFailure(_) => Severity::Info,
            BridgeError::AuthFailure(_) => Severity::Error,
            BridgeError::FatalInvariant(_) => Severity::Critical,
        }
    }
}
