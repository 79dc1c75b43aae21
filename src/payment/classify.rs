//! Settlement failure classification.
//!
//! The relay reports failures as free-form strings. The gateway maps them
//! into a closed taxonomy that fixes the HTTP status and the `Retry-After`
//! hint, so clients can distinguish "retry later" from "fix your payment"
//! without parsing prose. Matching is ordered, case-insensitive substring
//! search over a normalized detail string; the first rule wins.

use axum::http::StatusCode;
use serde::Serialize;

/// The closed failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PaymentFailureKind {
    /// Relay transport trouble or anything unclassified.
    UnexpectedSettle,
    /// Payer balance cannot cover the transfer.
    InsufficientFunds,
    /// The transfer exists but is unusable: expired, stale nonce, failed or
    /// still pending on chain.
    InvalidTransactionState,
    /// The signed amount is below the quoted amount.
    AmountInsufficient,
    /// Malformed payload, bad signature, or unsupported scheme.
    InvalidPayload,
    /// The transfer pays someone other than the configured recipient.
    RecipientMismatch,
    /// The transfer's sender does not match the claimed payer.
    SenderMismatch,
}

/// A classified failure: taxonomy, HTTP status, and optional retry hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifiedFailure {
    pub kind: PaymentFailureKind,
    pub status: StatusCode,
    pub retry_after: Option<u64>,
}

struct Rule {
    needles: &'static [&'static str],
    kind: PaymentFailureKind,
    status: StatusCode,
    retry_after: Option<u64>,
}

/// Ordered rule table. Earlier rows shadow later ones, so e.g. an
/// "invalid recipient" detail classifies as `InvalidPayload`.
const RULES: &[Rule] = &[
    Rule {
        needles: &["network", "timeout"],
        kind: PaymentFailureKind::UnexpectedSettle,
        status: StatusCode::BAD_GATEWAY,
        retry_after: Some(5),
    },
    Rule {
        needles: &["503", "unavailable"],
        kind: PaymentFailureKind::UnexpectedSettle,
        status: StatusCode::SERVICE_UNAVAILABLE,
        retry_after: Some(30),
    },
    Rule {
        needles: &["insufficient", "balance"],
        kind: PaymentFailureKind::InsufficientFunds,
        status: StatusCode::PAYMENT_REQUIRED,
        retry_after: None,
    },
    Rule {
        needles: &["expired", "nonce"],
        kind: PaymentFailureKind::InvalidTransactionState,
        status: StatusCode::PAYMENT_REQUIRED,
        retry_after: None,
    },
    Rule {
        needles: &["amount too low", "amount low", "below minimum"],
        kind: PaymentFailureKind::AmountInsufficient,
        status: StatusCode::PAYMENT_REQUIRED,
        retry_after: None,
    },
    Rule {
        needles: &["invalid", "signature"],
        kind: PaymentFailureKind::InvalidPayload,
        status: StatusCode::BAD_REQUEST,
        retry_after: None,
    },
    Rule {
        needles: &["recipient mismatch"],
        kind: PaymentFailureKind::RecipientMismatch,
        status: StatusCode::BAD_REQUEST,
        retry_after: None,
    },
    Rule {
        needles: &["broadcast"],
        kind: PaymentFailureKind::UnexpectedSettle,
        status: StatusCode::BAD_GATEWAY,
        retry_after: Some(5),
    },
    Rule {
        needles: &["tx failed", "transaction failed"],
        kind: PaymentFailureKind::InvalidTransactionState,
        status: StatusCode::PAYMENT_REQUIRED,
        retry_after: None,
    },
    Rule {
        needles: &["tx pending", "transaction pending"],
        kind: PaymentFailureKind::InvalidTransactionState,
        status: StatusCode::PAYMENT_REQUIRED,
        retry_after: Some(10),
    },
    Rule {
        needles: &["sender mismatch"],
        kind: PaymentFailureKind::SenderMismatch,
        status: StatusCode::BAD_REQUEST,
        retry_after: None,
    },
    Rule {
        needles: &["unsupported scheme"],
        kind: PaymentFailureKind::InvalidPayload,
        status: StatusCode::BAD_REQUEST,
        retry_after: None,
    },
];

const DEFAULT_RULE: ClassifiedFailure = ClassifiedFailure {
    kind: PaymentFailureKind::UnexpectedSettle,
    status: StatusCode::INTERNAL_SERVER_ERROR,
    retry_after: Some(5),
};

/// Classifies a free-form relay failure detail.
pub fn classify(detail: &str) -> ClassifiedFailure {
    let normalized = detail.to_ascii_lowercase().replace(['_', '-'], " ");
    for rule in RULES {
        if rule.needles.iter().any(|needle| normalized.contains(needle)) {
            return ClassifiedFailure {
                kind: rule.kind,
                status: rule.status,
                retry_after: rule.retry_after,
            };
        }
    }
    DEFAULT_RULE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_are_retryable_gateway_errors() {
        let classified = classify("network timeout reaching relay");
        assert_eq!(classified.kind, PaymentFailureKind::UnexpectedSettle);
        assert_eq!(classified.status, StatusCode::BAD_GATEWAY);
        assert_eq!(classified.retry_after, Some(5));

        let classified = classify("relay unavailable (503)");
        assert_eq!(classified.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(classified.retry_after, Some(30));
    }

    #[test]
    fn broadcast_failed_is_502_retry_5() {
        let classified = classify("broadcast_failed");
        assert_eq!(classified.kind, PaymentFailureKind::UnexpectedSettle);
        assert_eq!(classified.status, StatusCode::BAD_GATEWAY);
        assert_eq!(classified.retry_after, Some(5));
    }

    #[test]
    fn client_recoverable_failures_are_402() {
        assert_eq!(
            classify("insufficient funds").kind,
            PaymentFailureKind::InsufficientFunds
        );
        assert_eq!(
            classify("balance too small for transfer").kind,
            PaymentFailureKind::InsufficientFunds
        );
        assert_eq!(
            classify("nonce already used").kind,
            PaymentFailureKind::InvalidTransactionState
        );
        assert_eq!(
            classify("amount_too_low").kind,
            PaymentFailureKind::AmountInsufficient
        );
        for detail in ["insufficient funds", "nonce already used", "amount_too_low"] {
            assert_eq!(classify(detail).status, StatusCode::PAYMENT_REQUIRED);
        }
    }

    #[test]
    fn pending_transactions_carry_a_retry_hint() {
        let classified = classify("tx_pending");
        assert_eq!(classified.kind, PaymentFailureKind::InvalidTransactionState);
        assert_eq!(classified.status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(classified.retry_after, Some(10));

        let failed = classify("tx_failed");
        assert_eq!(failed.retry_after, None);
    }

    #[test]
    fn protocol_violations_are_400() {
        for detail in [
            "invalid signature",
            "recipient_mismatch",
            "sender_mismatch",
            "unsupported scheme: upto",
        ] {
            assert_eq!(classify(detail).status, StatusCode::BAD_REQUEST, "{detail}");
        }
        assert_eq!(
            classify("recipient_mismatch").kind,
            PaymentFailureKind::RecipientMismatch
        );
        assert_eq!(
            classify("sender_mismatch").kind,
            PaymentFailureKind::SenderMismatch
        );
    }

    #[test]
    fn earlier_rules_shadow_later_ones() {
        // "invalid recipient address" hits the invalid/signature rule first.
        assert_eq!(
            classify("invalid recipient address").kind,
            PaymentFailureKind::InvalidPayload
        );
    }

    #[test]
    fn unclassified_details_default_to_500() {
        let classified = classify("weird unheard-of condition");
        assert_eq!(classified, DEFAULT_RULE);
    }

    #[test]
    fn classification_is_stable() {
        for detail in ["broadcast_failed", "tx_pending", "no idea"] {
            assert_eq!(classify(detail), classify(detail));
        }
    }
}
