use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Monotonic identity assigned by the Store on insert; also the ordering
/// key spec §3 invariant 1 is defined over.
pub type PaymentId = i64;

/// An opaque ledger address. Concrete address-format validation (base58
/// checksums, network prefixes, and the like) is out of scope for this
/// core — see spec §1's Non-goals — so this newtype only guards against
/// the empty-string and obviously-too-long cases a caller could pass by
/// mistake.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LedgerAddress(String);

const MAX_ADDRESS_LEN: usize = 128;

impl LedgerAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for LedgerAddress {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(PipelineError::Validation(
                "ledger address must not be empty".to_string(),
            ));
        }
        if s.len() > MAX_ADDRESS_LEN {
            return Err(PipelineError::Validation(format!(
                "ledger address exceeds {MAX_ADDRESS_LEN} characters"
            )));
        }
        Ok(Self(s.to_string()))
    }
}

impl fmt::Display for LedgerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Amount as either a scalar in the native asset, or an issued tuple
/// `(value, currency, issuer)` (spec §3, §9 "tagged variant").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Amount {
    Native(Decimal),
    Issued {
        value: Decimal,
        currency: String,
        issuer: LedgerAddress,
    },
}

impl Amount {
    pub fn value(&self) -> Decimal {
        match self {
            Amount::Native(v) => *v,
            Amount::Issued { value, .. } => *value,
        }
    }

    /// Validated once at the payment-creation boundary (spec §1, §9).
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.value() <= Decimal::ZERO {
            return Err(PipelineError::Validation(
                "amount value must be positive".to_string(),
            ));
        }
        if let Amount::Issued { currency, .. } = self {
            if currency.trim().is_empty() {
                return Err(PipelineError::Validation(
                    "issued amount currency must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Lifecycle state of a Payment row (spec §3, §4.5 state diagram).
///
/// `Error` and `Aborted` carry no payload here; the `errorKind`/`fatal`
/// detail spec §3 describes lives on `Payment` itself so it survives a
/// plain `TEXT` column in the Store without a second enum-in-enum layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Pending,
    Signed,
    Submitted,
    Confirmed,
    Error,
    Aborted,
}

impl fmt::Display for PaymentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentState::Pending => "pending",
            PaymentState::Signed => "signed",
            PaymentState::Submitted => "submitted",
            PaymentState::Confirmed => "confirmed",
            PaymentState::Error => "error",
            PaymentState::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

/// A row in the Store representing one intended transfer (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub destination: LedgerAddress,
    pub amount: Amount,
    pub memo: Option<String>,
    pub state: PaymentState,
    pub sequence: Option<u64>,
    pub signed_artifact: Option<Vec<u8>>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub error_kind: Option<String>,
    pub error_fatal: bool,
}

impl Payment {
    /// True once the row has consumed a sequence number the ledger has
    /// not yet confirmed (spec GLOSSARY "in-flight").
    pub fn is_in_flight(&self) -> bool {
        matches!(self.state, PaymentState::Signed | PaymentState::Submitted)
    }
}
