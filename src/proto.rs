//! Wire types for the x402 payment protocol as spoken by this gateway.
//!
//! The gateway emits a [`PaymentRequired`] challenge on unpaid requests,
//! accepts a [`PaymentPayload`] on retries, and forwards the signed transfer
//! blob to the settlement relay untouched. The blob's internal structure is
//! opaque here: the relay is authoritative for signature validity, chain
//! submission, and payer extraction.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;
use std::fmt;
use std::fmt::{Display, Formatter};

use crate::tokens::TokenAmount;

/// Version marker for x402 protocol version 2, serialized as the integer `2`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct X402Version2;

impl X402Version2 {
    pub const VALUE: u8 = 2;
}

impl Serialize for X402Version2 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(Self::VALUE)
    }
}

impl<'de> Deserialize<'de> for X402Version2 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let num = u8::deserialize(deserializer)?;
        if num == Self::VALUE {
            Ok(X402Version2)
        } else {
            Err(serde::de::Error::custom(format!(
                "expected version {}, got {}",
                Self::VALUE,
                num
            )))
        }
    }
}

impl Display for X402Version2 {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Self::VALUE)
    }
}

/// Payment schemes. Only `exact` is supported: the transfer amount must match
/// the quoted amount exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Exact,
}

impl Display for Scheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Scheme::Exact => write!(f, "exact"),
        }
    }
}

/// One acceptable way to pay for a resource.
///
/// A challenge carries one of these per supported token. The client signs a
/// transfer matching one requirement and echoes it back verbatim inside the
/// payment payload; the gateway matches it by structural equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: Scheme,
    /// CAIP-2 chain id, e.g. `stacks:1`.
    pub network: String,
    pub max_amount_required: TokenAmount,
    /// `STX` for native payments, otherwise the SIP-010 contract principal.
    pub asset: String,
    pub pay_to: String,
    pub max_timeout_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Metadata about the resource being paid for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInfo {
    pub url: String,
    pub description: String,
    pub mime_type: String,
}

/// The HTTP 402 challenge body.
///
/// Emitted both as the JSON response body and, base64-encoded, as the
/// `payment-required` header.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequired {
    pub x402_version: X402Version2,
    pub resource: ResourceInfo,
    pub accepts: Vec<PaymentRequirements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A signed payment submitted by the client on retry.
///
/// `accepted` is the requirement the client chose, echoed from the challenge.
/// `payload` is the signed transfer blob, carried as raw JSON and forwarded
/// to the relay without inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: X402Version2,
    pub accepted: PaymentRequirements,
    pub payload: Box<RawValue>,
}

/// Request body for the relay's `POST /settle`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleRequest {
    pub x402_version: X402Version2,
    pub payment_payload: PaymentPayload,
    pub payment_requirements: PaymentRequirements,
}

/// Result of a settlement attempt, as reported by the relay.
///
/// On success `payer` is present and becomes the authoritative identity for
/// the remainder of the request. The result is echoed to the client in the
/// `payment-response` header as the settlement receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}
