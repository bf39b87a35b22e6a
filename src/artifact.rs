//! Placeholder for the opaque signing operation spec §1 explicitly
//! excludes from this core ("ledger-library cryptographic primitives").
//!
//! A real deployment swaps this out for whatever the target ledger's
//! client library provides (e.g. an XDR transaction envelope signed
//! with an ed25519 secret key). This stand-in produces a deterministic,
//! inspectable byte string from the row and its stamped sequence number
//! so the rest of the pipeline has something concrete to push through
//! `LedgerClient::submit`.

use sha2::{Digest, Sha256};

use crate::model::Payment;

/// Hashes the payment's destination, amount, memo, and sequence number
/// into a fixed-size artifact. Not a real transaction envelope and not
/// signed with any key; exists only to exercise the Signer/Submitter
/// seam end to end.
pub fn placeholder_artifact(payment: &Payment, sequence: u64) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(payment.destination.as_str().as_bytes());
    hasher.update(payment.amount.value().to_string().as_bytes());
    hasher.update(payment.memo.as_deref().unwrap_or("").as_bytes());
    hasher.update(sequence.to_le_bytes());
    hasher.finalize().to_vec()
}
