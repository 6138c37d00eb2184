//! Flow network endpoints and well-known contract addresses.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::status::TxId;

/// A Flow network the app can connect to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Public test network.
    #[default]
    Testnet,
    /// Production network.
    Mainnet,
}

/// Addresses of the core token contracts on one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractAddresses {
    /// `FungibleToken` standard.
    pub fungible_token: &'static str,
    /// `FlowToken` vault.
    pub flow_token: &'static str,
}

impl Network {
    /// Network name as used in config and by the SDK.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Testnet => "testnet",
            Self::Mainnet => "mainnet",
        }
    }

    /// Parse a network name, falling back to testnet for anything unknown.
    #[must_use]
    pub fn from_str_or_testnet(name: &str) -> Self {
        name.parse().unwrap_or_default()
    }

    /// Access node REST API.
    #[must_use]
    pub const fn access_node(self) -> &'static str {
        match self {
            Self::Testnet => "https://rest-testnet.onflow.org",
            Self::Mainnet => "https://rest-mainnet.onflow.org",
        }
    }

    /// Wallet discovery page.
    #[must_use]
    pub const fn discovery_wallet(self) -> &'static str {
        match self {
            Self::Testnet => "https://fcl-discovery.onflow.org/testnet/authn",
            Self::Mainnet => "https://fcl-discovery.onflow.org/mainnet/authn",
        }
    }

    /// Wallet discovery API endpoint.
    #[must_use]
    pub const fn discovery_authn_endpoint(self) -> &'static str {
        match self {
            Self::Testnet => "https://fcl-discovery.onflow.org/api/testnet/authn",
            Self::Mainnet => "https://fcl-discovery.onflow.org/api/mainnet/authn",
        }
    }

    /// Block explorer base URL.
    #[must_use]
    pub const fn explorer(self) -> &'static str {
        match self {
            Self::Testnet => "https://testnet.flowscan.io",
            Self::Mainnet => "https://flowscan.io",
        }
    }

    /// Explorer page for a transaction.
    #[must_use]
    pub fn explorer_tx_url(self, tx_id: &TxId) -> String {
        format!("{}/transaction/{tx_id}", self.explorer())
    }

    /// Faucet for funding test accounts; mainnet has none.
    #[must_use]
    pub const fn faucet(self) -> Option<&'static str> {
        match self {
            Self::Testnet => Some("https://faucet.flow.com/fund-account"),
            Self::Mainnet => None,
        }
    }

    /// Token contract addresses.
    #[must_use]
    pub const fn contracts(self) -> ContractAddresses {
        match self {
            Self::Testnet => ContractAddresses {
                fungible_token: "0x9a0766d93b6608b7",
                flow_token: "0x7e60df042a9c0868",
            },
            Self::Mainnet => ContractAddresses {
                fungible_token: "0xf233dcee88fe0abe",
                flow_token: "0x1654653399040a61",
            },
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized network name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown network '{0}' (expected testnet or mainnet)")]
pub struct UnknownNetwork(pub String);

impl FromStr for Network {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "testnet" => Ok(Self::Testnet),
            "mainnet" => Ok(Self::Mainnet),
            _ => Err(UnknownNetwork(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_network() {
        assert_eq!("MainNet".parse::<Network>(), Ok(Network::Mainnet));
        assert!("emulator".parse::<Network>().is_err());
        assert_eq!(Network::from_str_or_testnet("emulator"), Network::Testnet);
    }

    #[test]
    fn test_explorer_url() {
        let id = TxId::new("abc123");
        assert_eq!(
            Network::Mainnet.explorer_tx_url(&id),
            "https://flowscan.io/transaction/abc123"
        );
        assert_eq!(
            Network::Testnet.explorer_tx_url(&id),
            "https://testnet.flowscan.io/transaction/abc123"
        );
    }

    #[test]
    fn test_faucet_only_on_testnet() {
        assert!(Network::Testnet.faucet().is_some());
        assert!(Network::Mainnet.faucet().is_none());
    }
}
