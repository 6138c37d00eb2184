//! Submit and query actions provided by the blockchain SDK.
//!
//! The core never talks to an access node itself. It hands a
//! [`TransactionRequest`] to a [`SubmitAction`] and a [`ScriptRequest`] to a
//! [`QueryAction`], and only interprets what comes back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cadence::{self, InputError, UFix64};
use crate::error::ProviderError;
use crate::network::Network;
use crate::status::TxId;

/// Default computation limit for transactions.
pub const DEFAULT_COMPUTE_LIMIT: u64 = 1000;

/// Cadence argument type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArgumentType {
    /// Account address.
    Address,
    /// Unsigned fixed-point.
    UFix64,
    /// Unsigned 64-bit integer.
    UInt64,
    /// UTF-8 string.
    String,
    /// Boolean.
    Bool,
}

/// A Cadence argument in JSON-Cadence form (`{"type": ..., "value": ...}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argument {
    /// Cadence type.
    #[serde(rename = "type")]
    pub kind: ArgumentType,
    /// Value encoded as a string.
    pub value: String,
}

impl Argument {
    /// An `Address` argument.
    pub fn address(value: impl Into<String>) -> Self {
        Self {
            kind: ArgumentType::Address,
            value: value.into(),
        }
    }

    /// A `UFix64` argument.
    #[must_use]
    pub fn ufix64(value: UFix64) -> Self {
        Self {
            kind: ArgumentType::UFix64,
            value: value.to_string(),
        }
    }
}

/// A read-only Cadence script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptRequest {
    /// Script source with imports resolved.
    pub cadence: String,
    /// Arguments in declaration order.
    pub args: Vec<Argument>,
}

impl ScriptRequest {
    /// FLOW balance of `address` on `network`.
    ///
    /// # Errors
    ///
    /// [`InputError::InvalidAddress`] if `address` is malformed.
    pub fn balance(network: Network, address: &str) -> Result<Self, InputError> {
        Ok(Self {
            cadence: cadence::resolve_imports(cadence::FLOW_BALANCE_SCRIPT, network),
            args: vec![Argument::address(cadence::normalize_address(address)?)],
        })
    }
}

/// A Cadence transaction to be signed by the connected wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRequest {
    /// Transaction source with imports resolved.
    pub cadence: String,
    /// Arguments in declaration order.
    pub args: Vec<Argument>,
    /// Computation limit.
    pub compute_limit: u64,
}

impl TransactionRequest {
    /// Transfer `amount` FLOW to `recipient` on `network`.
    ///
    /// # Errors
    ///
    /// [`InputError`] if the amount or address is malformed.
    pub fn transfer(network: Network, amount: &str, recipient: &str) -> Result<Self, InputError> {
        let amount = UFix64::parse_amount(amount)?;
        let recipient = cadence::normalize_address(recipient)?;
        Ok(Self {
            cadence: cadence::resolve_imports(cadence::TRANSFER_FLOW_TRANSACTION, network),
            args: vec![Argument::ufix64(amount), Argument::address(recipient)],
            compute_limit: DEFAULT_COMPUTE_LIMIT,
        })
    }

    /// Override the computation limit.
    #[must_use]
    pub const fn with_compute_limit(mut self, limit: u64) -> Self {
        self.compute_limit = limit;
        self
    }
}

/// Signs and sends a transaction through the connected wallet.
#[async_trait]
pub trait SubmitAction: Send + Sync {
    /// Submit `request`, returning the network's transaction id.
    ///
    /// Wallet cancellations are reported as errors whose message mentions
    /// the cancellation.
    async fn submit(&self, request: TransactionRequest) -> Result<TxId, ProviderError>;
}

/// Executes a read-only script against an access node.
#[async_trait]
pub trait QueryAction: Send + Sync {
    /// Run `request`, returning the decoded result.
    async fn query(&self, request: ScriptRequest) -> Result<serde_json::Value, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_request() {
        let request =
            TransactionRequest::transfer(Network::Testnet, "1.5", "01cf0e2f2f715450").unwrap();
        assert!(request.cadence.contains("0x7e60df042a9c0868"));
        assert_eq!(
            request.args,
            vec![
                Argument {
                    kind: ArgumentType::UFix64,
                    value: "1.50000000".into()
                },
                Argument::address("0x01cf0e2f2f715450"),
            ]
        );
        assert_eq!(request.compute_limit, DEFAULT_COMPUTE_LIMIT);
    }

    #[test]
    fn test_transfer_rejects_bad_input() {
        assert!(TransactionRequest::transfer(Network::Testnet, "", "0x01").is_err());
        assert!(TransactionRequest::transfer(Network::Testnet, "1", "nothex").is_err());
    }

    #[test]
    fn test_argument_json_cadence_shape() {
        let json = serde_json::to_value(Argument::address("0x01")).unwrap();
        assert_eq!(json, serde_json::json!({"type": "Address", "value": "0x01"}));
    }
}
