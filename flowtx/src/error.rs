//! Unified error types for flowtx.
//!
//! Every failure that can reach the presentation layer is expressed as an
//! [`Error`], and every [`Error`] maps onto exactly one [`ErrorKind`] so the
//! caller can decide whether to show it, prompt the user, or stay silent.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cadence::InputError;
use crate::status::TxId;

// ============================================================================
// Main Error Type
// ============================================================================

/// The main error type for flowtx operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An action was attempted without the required session preconditions.
    #[error("precondition: {0}")]
    Gate(#[from] GateError),

    /// The lifecycle observer rejected a transition.
    #[error("lifecycle: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// The user cancelled, declined or rejected the request in their wallet.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// An external collaborator (wallet, access node, status stream) failed.
    #[error("provider: {0}")]
    Provider(#[from] ProviderError),

    /// User input could not be turned into a request.
    #[error("input: {0}")]
    Input(#[from] InputError),

    /// Configuration error.
    #[error("config: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Translate a raw provider failure into either a suppressed
    /// cancellation or a surfaced provider error.
    #[must_use]
    pub fn from_provider(err: ProviderError) -> Self {
        if err.is_cancellation() {
            Self::Cancelled(err.message)
        } else {
            Self::Provider(err)
        }
    }

    /// The taxonomy bucket this error belongs to.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Gate(_) => ErrorKind::PreconditionFailed,
            Self::Lifecycle(LifecycleError::AlreadyInProgress { .. }) => {
                ErrorKind::AlreadyInProgress
            }
            Self::Lifecycle(_) => ErrorKind::InvalidTransition,
            Self::Cancelled(_) => ErrorKind::UserCancelled,
            Self::Provider(_) => ErrorKind::ProviderFailure,
            Self::Input(_) => ErrorKind::InvalidInput,
            Self::Config(_) => ErrorKind::Configuration,
        }
    }

    /// Message to show the user, or `None` when the error is suppressed.
    #[must_use]
    pub fn user_message(&self) -> Option<String> {
        match self {
            Self::Cancelled(_) | Self::Lifecycle(LifecycleError::Superseded { .. }) => None,
            Self::Gate(GateError::NotLoggedIn) => {
                Some("Connect your wallet to continue.".to_string())
            }
            Self::Gate(GateError::MissingAuthorizationCapability) => Some(
                "The connected wallet cannot authorize transactions. Reconnect with a wallet that supports signing."
                    .to_string(),
            ),
            Self::Provider(e) => Some(e.message.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Whether the presentation layer should surface this error.
    #[must_use]
    pub fn is_user_visible(&self) -> bool {
        self.user_message().is_some()
    }
}

/// Result type alias for flowtx operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy shared with the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// User cancelled in the wallet; never shown as an error.
    UserCancelled,
    /// Session precondition failed; shown as a corrective prompt.
    PreconditionFailed,
    /// External provider failure; surfaced verbatim.
    ProviderFailure,
    /// A second submission was attempted while one is in flight.
    AlreadyInProgress,
    /// A transition arrived for a state the observer has already left.
    InvalidTransition,
    /// Amount or address input was rejected before any request was made.
    InvalidInput,
    /// Configuration could not be loaded or is invalid.
    Configuration,
}

// ============================================================================
// Gate Errors
// ============================================================================

/// Preconditions checked locally before any call into the SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    /// No wallet is connected.
    #[error("not logged in")]
    NotLoggedIn,

    /// The wallet is connected but advertised no authorization service.
    #[error("missing authorization capability")]
    MissingAuthorizationCapability,
}

// ============================================================================
// Lifecycle Errors
// ============================================================================

/// Rejected lifecycle transitions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    /// A transaction is already being submitted or tracked.
    #[error("transaction already in progress{}", in_flight_suffix(.in_flight.as_ref()))]
    AlreadyInProgress {
        /// The transaction currently tracked, if it already has an id.
        in_flight: Option<TxId>,
    },

    /// `on_submitted` / `on_submit_failed` arrived outside `Submitting`.
    #[error("observer is not submitting (state: {state})")]
    NotSubmitting {
        /// Name of the state the observer was in.
        state: &'static str,
    },

    /// The submission completed after the observer had been reset.
    #[error("transaction {tx_id} was submitted after the session was reset")]
    Superseded {
        /// The identifier returned by the late submission.
        tx_id: TxId,
    },
}

fn in_flight_suffix(in_flight: Option<&TxId>) -> String {
    in_flight.map_or_else(String::new, |id| format!(" ({id})"))
}

// ============================================================================
// Provider Errors
// ============================================================================

/// Failure reported by an external collaborator.
///
/// The message is kept verbatim: it is what the user sees for
/// [`ErrorKind::ProviderFailure`], and it is what cancellation detection
/// matches against.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    /// Provider-defined reason string.
    pub message: String,
}

impl ProviderError {
    /// Create a provider error from a reason string.
    #[inline]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Whether the reason reads as a user cancellation.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        crate::lifecycle::FailureReason::classify(&self.message).is_user_cancelled()
    }
}

// ============================================================================
// Configuration Errors
// ============================================================================

/// Error type for configuration operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("parse: {0}")]
    Parse(#[from] serde_json::Error),

    /// Missing required field.
    #[error("missing: {0}")]
    Missing(String),

    /// Invalid value.
    #[error("invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Create a missing field error.
    #[inline]
    pub fn missing(field: impl Into<String>) -> Self {
        Self::Missing(field.into())
    }

    /// Create an invalid value error.
    #[inline]
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ============================================================================
// Display Helpers
// ============================================================================

/// Displays an error the way the presentation layer should render it.
#[derive(Debug)]
pub struct DisplayError<'a>(pub &'a Error);

impl fmt::Display for DisplayError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Error::Gate(_) => match self.0.user_message() {
                Some(msg) => f.write_str(&msg),
                None => Ok(()),
            },
            Error::Lifecycle(e) => write!(f, "Transaction error: {e}"),
            Error::Cancelled(_) => f.write_str("Request cancelled"),
            Error::Provider(e) => write!(f, "Transaction failed: {e}"),
            Error::Input(e) => write!(f, "Check your input: {e}"),
            Error::Config(e) => write!(f, "Configuration error: {e}"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversions() {
        let err: Error = GateError::NotLoggedIn.into();
        assert!(matches!(err, Error::Gate(_)));
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

        let err: Error = LifecycleError::AlreadyInProgress { in_flight: None }.into();
        assert_eq!(err.kind(), ErrorKind::AlreadyInProgress);

        let err: Error = ConfigError::missing("network").into();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_provider_cancellation_is_suppressed() {
        let err = Error::from_provider(ProviderError::new("User rejected request"));
        assert_eq!(err.kind(), ErrorKind::UserCancelled);
        assert!(!err.is_user_visible());

        let err = Error::from_provider(ProviderError::new("access node unreachable"));
        assert_eq!(err.kind(), ErrorKind::ProviderFailure);
        assert_eq!(err.user_message().as_deref(), Some("access node unreachable"));
    }

    #[test]
    fn test_already_in_progress_message() {
        let err = LifecycleError::AlreadyInProgress {
            in_flight: Some(TxId::new("abc")),
        };
        assert_eq!(err.to_string(), "transaction already in progress (abc)");
    }

    #[test]
    fn test_gate_errors_render_as_prompts() {
        let err = Error::from(GateError::NotLoggedIn);
        assert_eq!(
            DisplayError(&err).to_string(),
            "Connect your wallet to continue."
        );
    }
}
