//! LedgerClient: opaque interface to the distributed ledger (spec §4.2).
//!
//! This core never speaks a concrete wire protocol (spec §1 Non-goals:
//! "concrete network transports"). Implementers classify raw ledger
//! responses into the four `SubmitOutcome` / three `ConfirmOutcome`
//! variants below; see SPEC_FULL.md §3 for the classification guidance
//! this crate follows.

// `fake` doubles as the test double and the only ledger this crate ships
// ready to run without a concrete transport: `main` wires it up for
// `--dry-run` and for every build that doesn't enable `live-ledger`
// (spec §1 Non-goals: "concrete network transports").
pub mod fake;
#[cfg(feature = "live-ledger")]
pub mod http;

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::model::{LedgerAddress, Payment};

/// The ledger's view of an account's next usable sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountInfo {
    pub next_sequence: u64,
}

/// Outcome of `LedgerClient::submit` (spec §4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    TransientNetwork,
    /// The ledger will never accept this sequenced artifact; the whole
    /// trailing window behind it must be re-signed.
    Resign(String),
    /// A definitive rejection unrelated to sequencing (e.g. destination
    /// policy). Recorded on the row alone unless classified as
    /// sequence-invalidating (see `crate::submitter`).
    PermanentReject(String),
}

/// Outcome of `LedgerClient::confirm` (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed,
    StillPending,
    /// The ledger has no record of the artifact ever landing; treat the
    /// row (and everything behind it) as needing resign recovery.
    Lost,
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn get_account_info(&self, address: &LedgerAddress) -> Result<AccountInfo, PipelineError>;

    async fn submit(&self, artifact: &[u8]) -> Result<SubmitOutcome, PipelineError>;

    async fn confirm(&self, payment: &Payment) -> Result<ConfirmOutcome, PipelineError>;
}
