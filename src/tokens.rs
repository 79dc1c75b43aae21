//! Payment tokens accepted by the gateway.
//!
//! Three kinds are supported: native STX, bridged BTC (sBTC), and a bridged
//! USD stablecoin. The bridged tokens are SIP-010 fungible tokens addressed
//! by `(contract-address, contract-name)` per network; STX never carries a
//! contract. Each kind has fixed decimals and a fixed USD rate used only for
//! pricing symmetry; settlement validity is decided by the relay, never by
//! these rates.

use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use crate::network::StacksNetwork;

/// The closed set of token kinds a challenge may advertise.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    /// Native STX, 6 decimals (micro-STX).
    #[serde(rename = "Native")]
    Stx,
    /// Bridged Bitcoin (sBTC), 8 decimals (satoshis).
    #[serde(rename = "BridgedBTC")]
    Sbtc,
    /// Bridged USD stablecoin, 6 decimals.
    #[serde(rename = "BridgedUSD")]
    Susd,
}

/// A SIP-010 contract identifier scoped to one network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenContract {
    pub address: &'static str,
    pub name: &'static str,
}

impl TokenContract {
    /// Fully qualified contract principal, `ADDRESS.name`.
    pub fn principal(&self) -> String {
        format!("{}.{}", self.address, self.name)
    }
}

static SBTC_MAINNET: Lazy<TokenContract> = Lazy::new(|| TokenContract {
    address: "SM3VDXK3WZZSA84XXFKAFAF15NNZX32CTSG82JFQ4",
    name: "sbtc-token",
});

static SBTC_TESTNET: Lazy<TokenContract> = Lazy::new(|| TokenContract {
    address: "ST1F7QA2MDF17S807EPA36TSS8AMEFY4KA9TVGWXT",
    name: "sbtc-token",
});

static SUSD_MAINNET: Lazy<TokenContract> = Lazy::new(|| TokenContract {
    address: "SP2C2YFP12AJZB4MABJBAJ55XECVS7E4PMMZ89YZR",
    name: "usda-token",
});

impl TokenKind {
    /// All token kinds in challenge-advertisement order (native first).
    pub fn variants() -> &'static [TokenKind] {
        &[TokenKind::Stx, TokenKind::Sbtc, TokenKind::Susd]
    }

    pub fn decimals(&self) -> u32 {
        match self {
            TokenKind::Stx => 6,
            TokenKind::Sbtc => 8,
            TokenKind::Susd => 6,
        }
    }

    /// Fixed USD rate, used only so fixed-tier prices are symmetric across
    /// tokens.
    pub fn usd_rate(&self) -> Decimal {
        match self {
            TokenKind::Stx => Decimal::new(2, 0),
            TokenKind::Sbtc => Decimal::new(100_000, 0),
            TokenKind::Susd => Decimal::ONE,
        }
    }

    /// The smallest challenge amount the gateway will quote, in atomic units.
    pub fn minimum_atomic(&self) -> u128 {
        match self {
            TokenKind::Stx => 100,
            TokenKind::Sbtc => 10,
            TokenKind::Susd => 100,
        }
    }

    /// SIP-010 contract for this kind on `network`. `None` for native STX and
    /// for bridged tokens with no deployment on the network.
    pub fn contract(&self, network: StacksNetwork) -> Option<&'static TokenContract> {
        match (self, network) {
            (TokenKind::Stx, _) => None,
            (TokenKind::Sbtc, StacksNetwork::Mainnet) => Some(&SBTC_MAINNET),
            (TokenKind::Sbtc, StacksNetwork::Testnet) => Some(&SBTC_TESTNET),
            (TokenKind::Susd, StacksNetwork::Mainnet) => Some(&SUSD_MAINNET),
            (TokenKind::Susd, StacksNetwork::Testnet) => None,
        }
    }

    /// Whether challenges on `network` may advertise this kind.
    pub fn supported_on(&self, network: StacksNetwork) -> bool {
        matches!(self, TokenKind::Stx) || self.contract(network).is_some()
    }

    /// Asset designation used in payment requirements: `STX` for native,
    /// otherwise the contract principal.
    pub fn asset(&self, network: StacksNetwork) -> String {
        match self.contract(network) {
            Some(contract) => contract.principal(),
            None => "STX".to_string(),
        }
    }

    /// Wire name, identical to the serde representation.
    pub fn wire_name(&self) -> &'static str {
        match self {
            TokenKind::Stx => "Native",
            TokenKind::Sbtc => "BridgedBTC",
            TokenKind::Susd => "BridgedUSD",
        }
    }
}

impl Display for TokenKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire_name())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown token type: {0}")]
pub struct UnknownToken(pub String);

impl FromStr for TokenKind {
    type Err = UnknownToken;

    /// Parses a client-supplied token selector. Canonical wire names are
    /// accepted along with the asset symbols clients commonly send.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Native" | "STX" | "stx" => Ok(TokenKind::Stx),
            "BridgedBTC" | "sBTC" | "sbtc" => Ok(TokenKind::Sbtc),
            "BridgedUSD" | "sUSD" | "susd" => Ok(TokenKind::Susd),
            other => Err(UnknownToken(other.to_string())),
        }
    }
}

/// An atomic token amount.
///
/// Serialized as a decimal string so amounts survive JSON round-trips without
/// floating-point truncation. `u128` comfortably covers every supported
/// token's supply in atomic units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenAmount(pub u128);

impl Serialize for TokenAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TokenAmount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let value = s
            .parse::<u128>()
            .map_err(|_| serde::de::Error::custom("amount must be a non-negative integer string"))?;
        Ok(TokenAmount(value))
    }
}

impl Display for TokenAmount {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u128> for TokenAmount {
    fn from(value: u128) -> Self {
        TokenAmount(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_has_no_contract() {
        for network in [StacksNetwork::Mainnet, StacksNetwork::Testnet] {
            assert!(TokenKind::Stx.contract(network).is_none());
            assert_eq!(TokenKind::Stx.asset(network), "STX");
        }
    }

    #[test]
    fn bridged_usd_is_mainnet_only() {
        assert!(TokenKind::Susd.supported_on(StacksNetwork::Mainnet));
        assert!(!TokenKind::Susd.supported_on(StacksNetwork::Testnet));
    }

    #[test]
    fn sbtc_asset_is_the_contract_principal() {
        assert_eq!(
            TokenKind::Sbtc.asset(StacksNetwork::Mainnet),
            "SM3VDXK3WZZSA84XXFKAFAF15NNZX32CTSG82JFQ4.sbtc-token"
        );
    }

    #[test]
    fn token_selector_accepts_wire_names_and_symbols() {
        assert_eq!("Native".parse::<TokenKind>().unwrap(), TokenKind::Stx);
        assert_eq!("sBTC".parse::<TokenKind>().unwrap(), TokenKind::Sbtc);
        assert_eq!("BridgedUSD".parse::<TokenKind>().unwrap(), TokenKind::Susd);
        assert!("DOGE".parse::<TokenKind>().is_err());
    }

    #[test]
    fn amounts_serialize_as_decimal_strings() {
        let amount = TokenAmount(340_282_366_920_938_463_463);
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"340282366920938463463\"");
        let back: TokenAmount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amount);
    }

    #[test]
    fn amounts_reject_floats_and_negatives() {
        assert!(serde_json::from_str::<TokenAmount>("\"1.5\"").is_err());
        assert!(serde_json::from_str::<TokenAmount>("\"-3\"").is_err());
        assert!(serde_json::from_str::<TokenAmount>("1000").is_err());
    }
}
