//! Cadence templates and argument formatting.
//!
//! Templates import the token contracts through `0xFungibleToken` and
//! `0xFlowToken` placeholders, resolved per [`Network`] before submission.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::network::Network;

/// Script returning the FLOW balance of an address.
pub const FLOW_BALANCE_SCRIPT: &str = r#"
import FungibleToken from 0xFungibleToken
import FlowToken from 0xFlowToken

access(all) fun main(address: Address): UFix64 {
    let account = getAccount(address)
    let vaultRef = account.capabilities
        .get<&FlowToken.Vault>(/public/flowTokenBalance)
        .borrow()
        ?? panic("Could not borrow Balance reference to the Vault")
    return vaultRef.balance
}
"#;

/// Transaction moving FLOW from the signer to a recipient.
pub const TRANSFER_FLOW_TRANSACTION: &str = r#"
import FungibleToken from 0xFungibleToken
import FlowToken from 0xFlowToken

transaction(amount: UFix64, to: Address) {
    let vault: @{FungibleToken.Vault}

    prepare(signer: auth(BorrowValue) &Account) {
        let vaultRef = signer.storage.borrow<auth(FungibleToken.Withdraw) &FlowToken.Vault>(
            from: /storage/flowTokenVault
        ) ?? panic("Could not borrow reference to the owner's Vault!")

        self.vault <- vaultRef.withdraw(amount: amount)
    }

    execute {
        let recipient = getAccount(to)
        let receiverRef = recipient.capabilities
            .get<&{FungibleToken.Receiver}>(/public/flowTokenReceiver)
            .borrow()
            ?? panic("Could not borrow receiver reference to the recipient's Vault")

        receiverRef.deposit(from: <-self.vault)
    }
}
"#;

/// Partial amount input as typed by the user.
static AMOUNT_INPUT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d*\.?\d*$").expect("valid amount pattern"));

/// Rejected user input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    /// Amount is not a positive decimal within UFix64 range.
    #[error("invalid amount '{input}': {reason}")]
    InvalidAmount {
        /// What the user typed.
        input: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Address is not a hex account address.
    #[error("invalid address '{0}'")]
    InvalidAddress(String),
}

/// Substitute the network's contract addresses into a template.
#[must_use]
pub fn resolve_imports(template: &str, network: Network) -> String {
    let contracts = network.contracts();
    template
        .replace("0xFungibleToken", contracts.fungible_token)
        .replace("0xFlowToken", contracts.flow_token)
}

/// Whether `input` is acceptable while the user is still typing an amount.
#[must_use]
pub fn is_amount_input(input: &str) -> bool {
    AMOUNT_INPUT.is_match(input)
}

/// Ensure an account address carries the `0x` prefix.
///
/// # Errors
///
/// [`InputError::InvalidAddress`] unless the address is 1 to 16 hex digits.
pub fn normalize_address(input: &str) -> Result<String, InputError> {
    let trimmed = input.trim();
    let hex = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    if hex.is_empty() || hex.len() > 16 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(InputError::InvalidAddress(input.to_string()));
    }
    Ok(format!("0x{hex}"))
}

/// Format a user-typed amount as a Cadence `UFix64` literal.
///
/// # Errors
///
/// [`InputError::InvalidAmount`] for negative, non-numeric or out-of-range
/// input.
pub fn format_ufix64(input: &str) -> Result<String, InputError> {
    input.parse::<UFix64>().map(|v| v.to_string())
}

/// Cadence `UFix64`: an unsigned fixed-point value with 8 decimal places.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(into = "String", try_from = "String")]
pub struct UFix64(u64);

impl UFix64 {
    /// Units per whole token.
    pub const SCALE: u64 = 100_000_000;

    /// Zero.
    pub const ZERO: Self = Self(0);

    /// Wrap a raw value in 10^-8 units.
    #[must_use]
    pub const fn from_units(units: u64) -> Self {
        Self(units)
    }

    /// Raw value in 10^-8 units.
    #[must_use]
    pub const fn units(self) -> u64 {
        self.0
    }

    /// Parse a transfer amount; zero is rejected.
    ///
    /// # Errors
    ///
    /// [`InputError::InvalidAmount`] for anything that is not a positive
    /// decimal representable as `UFix64`.
    pub fn parse_amount(input: &str) -> Result<Self, InputError> {
        let value: Self = input.parse()?;
        if value == Self::ZERO {
            return Err(InputError::InvalidAmount {
                input: input.to_string(),
                reason: "must be greater than zero",
            });
        }
        Ok(value)
    }
}

impl FromStr for UFix64 {
    type Err = InputError;

    /// Digits beyond the eighth decimal place are rounded half-up.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| InputError::InvalidAmount {
            input: input.to_string(),
            reason,
        };

        let s = input.trim();
        if s.is_empty() || s == "." || !is_amount_input(s) {
            return Err(invalid("not a decimal number"));
        }

        let (whole, fraction) = s.split_once('.').unwrap_or((s, ""));
        let whole = if whole.is_empty() { "0" } else { whole };
        let fraction8: String = fraction
            .chars()
            .chain(std::iter::repeat('0'))
            .take(8)
            .collect();
        let round_up = fraction.as_bytes().get(8).is_some_and(|d| *d >= b'5');

        let units: u128 = format!("{whole}{fraction8}")
            .parse()
            .map_err(|_| invalid("exceeds UFix64 range"))?;
        let units = units
            .checked_add(u128::from(round_up))
            .and_then(|u| u64::try_from(u).ok())
            .ok_or_else(|| invalid("exceeds UFix64 range"))?;
        Ok(Self(units))
    }
}

impl fmt::Display for UFix64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:08}", self.0 / Self::SCALE, self.0 % Self::SCALE)
    }
}

impl From<UFix64> for String {
    fn from(value: UFix64) -> Self {
        value.to_string()
    }
}

impl TryFrom<String> for UFix64 {
    type Error = InputError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_imports_per_network() {
        let script = resolve_imports(FLOW_BALANCE_SCRIPT, Network::Mainnet);
        assert!(script.contains("import FungibleToken from 0xf233dcee88fe0abe"));
        assert!(script.contains("import FlowToken from 0x1654653399040a61"));
        assert!(!script.contains("0xFlowToken"));
    }

    #[test]
    fn test_amount_input_filter() {
        assert!(is_amount_input(""));
        assert!(is_amount_input("1."));
        assert!(is_amount_input(".5"));
        assert!(is_amount_input("10.25"));
        assert!(!is_amount_input("1.2.3"));
        assert!(!is_amount_input("-1"));
        assert!(!is_amount_input("1e5"));
    }

    #[test]
    fn test_ufix64_formatting() {
        assert_eq!("1".parse::<UFix64>().unwrap().to_string(), "1.00000000");
        assert_eq!(".5".parse::<UFix64>().unwrap().to_string(), "0.50000000");
        assert_eq!("1.".parse::<UFix64>().unwrap().to_string(), "1.00000000");
        assert_eq!(
            "0.123456789".parse::<UFix64>().unwrap().to_string(),
            "0.12345679"
        );
        assert_eq!(
            "0.999999995".parse::<UFix64>().unwrap().to_string(),
            "1.00000000"
        );
    }

    #[test]
    fn test_format_ufix64() {
        assert_eq!(format_ufix64("3").unwrap(), "3.00000000");
        assert_eq!(format_ufix64("0").unwrap(), "0.00000000");
        assert!(format_ufix64("-1").is_err());
        assert!(format_ufix64("ten").is_err());
    }

    #[test]
    fn test_ufix64_range() {
        assert_eq!(
            "184467440737.09551615".parse::<UFix64>().unwrap().units(),
            u64::MAX
        );
        assert!("184467440737.09551616".parse::<UFix64>().is_err());
        assert!("99999999999999999999999999999999999999999".parse::<UFix64>().is_err());
    }

    #[test]
    fn test_ufix64_rounding_at_range_edge() {
        assert_eq!(
            "184467440737.095516154".parse::<UFix64>().unwrap().units(),
            u64::MAX
        );
        assert!("184467440737.095516155".parse::<UFix64>().is_err());

        // Eight-decimal value equal to u128::MAX before rounding.
        let err = "3402823669209384634633746074317.682114559"
            .parse::<UFix64>()
            .unwrap_err();
        assert!(matches!(
            err,
            InputError::InvalidAmount {
                reason: "exceeds UFix64 range",
                ..
            }
        ));
    }

    #[test]
    fn test_parse_amount_rejects_zero_and_garbage() {
        assert!(UFix64::parse_amount("0").is_err());
        assert!(UFix64::parse_amount("0.000000001").is_err());
        assert!(UFix64::parse_amount("abc").is_err());
        assert!(UFix64::parse_amount(".").is_err());
        assert_eq!(UFix64::parse_amount("2.5").unwrap().units(), 250_000_000);
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(
            normalize_address("01cf0e2f2f715450").unwrap(),
            "0x01cf0e2f2f715450"
        );
        assert_eq!(normalize_address(" 0xf8d6e0586b0a20c7 ").unwrap(), "0xf8d6e0586b0a20c7");
        assert!(normalize_address("0x").is_err());
        assert!(normalize_address("0xzz").is_err());
        assert!(normalize_address("0x01cf0e2f2f71545011").is_err());
    }

    #[test]
    fn test_ufix64_serde_as_string() {
        let value: UFix64 = serde_json::from_str("\"12.5\"").unwrap();
        assert_eq!(serde_json::to_string(&value).unwrap(), "\"12.50000000\"");
    }
}
