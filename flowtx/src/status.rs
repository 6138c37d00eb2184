//! Transaction identifiers and network status codes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier returned by a submit action.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(String);

impl TxId {
    /// Wrap a provider-issued identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the identifier string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TxId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TxId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Status code reported by the network for a submitted transaction.
///
/// Ordering follows the numeric code. Within one subscription a well-behaved
/// provider only moves forward, except that [`TxStatusCode::Expired`] may
/// arrive from any state.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TxStatusCode {
    /// Not yet known to the network.
    #[default]
    Unknown = 0,
    /// Received by a collection node, awaiting inclusion.
    Pending = 1,
    /// Included in a finalized block.
    Finalized = 2,
    /// Executed by execution nodes.
    Executed = 3,
    /// Sealed; the result is final and immutable.
    Sealed = 4,
    /// Dropped before finalization.
    Expired = 5,
}

impl TxStatusCode {
    /// Whether no further updates are expected after this code.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Sealed | Self::Expired)
    }

    /// Short label for display.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Pending => "pending",
            Self::Finalized => "finalized",
            Self::Executed => "executed",
            Self::Sealed => "sealed",
            Self::Expired => "expired",
        }
    }
}

impl fmt::Display for TxStatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Raw status code outside the known range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown transaction status code {0}")]
pub struct InvalidStatusCode(pub u8);

impl TryFrom<u8> for TxStatusCode {
    type Error = InvalidStatusCode;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Pending),
            2 => Ok(Self::Finalized),
            3 => Ok(Self::Executed),
            4 => Ok(Self::Sealed),
            5 => Ok(Self::Expired),
            other => Err(InvalidStatusCode(other)),
        }
    }
}

impl From<TxStatusCode> for u8 {
    fn from(code: TxStatusCode) -> Self {
        code as Self
    }
}

/// A single delivery from the status stream.
///
/// The access node reports an execution error alongside the status; a
/// sealed transaction with an error message has reverted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxStatusUpdate {
    /// Status code.
    pub status: TxStatusCode,
    /// Execution error reported by the network, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl TxStatusUpdate {
    /// An update carrying only a status code.
    #[must_use]
    pub const fn new(status: TxStatusCode) -> Self {
        Self {
            status,
            error_message: None,
        }
    }

    /// An update carrying an execution error.
    #[must_use]
    pub fn failed(status: TxStatusCode, error_message: impl Into<String>) -> Self {
        Self {
            status,
            error_message: Some(error_message.into()),
        }
    }

    /// The execution error, ignoring blank messages.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error_message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
    }
}

impl From<TxStatusCode> for TxStatusUpdate {
    fn from(status: TxStatusCode) -> Self {
        Self::new(status)
    }
}
