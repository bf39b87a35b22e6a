//! Documents the wire shape a real ledger transport would need, without
//! implementing one (spec §1 Non-goals: "concrete network transports").
//!
//! Field names here follow the submit-result shape XRPL-family ledgers
//! report (`engine_result`, `account_sequence_next`), since that is the
//! closest public precedent for a sequence-discipline ledger's response
//! format; a different ledger family would shuffle field names but keep
//! the same four-way `SubmitOutcome` classification.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::PipelineError;
use crate::ledger::{AccountInfo, ConfirmOutcome, LedgerClient, SubmitOutcome};
use crate::model::{LedgerAddress, Payment};

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
struct SubmitResponse {
    engine_result: String,
    engine_result_message: String,
    account_sequence_next: Option<u64>,
}

/// Not a working transport. Exists so the seam between the pipeline core
/// and a real network client is visible; every call returns
/// `PipelineError::Ledger`.
pub struct HttpLedgerClient {
    pub endpoint: String,
}

impl HttpLedgerClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }

    fn unimplemented(&self, op: &str) -> PipelineError {
        PipelineError::Ledger(format!(
            "live ledger transport not implemented ({op} against {})",
            self.endpoint
        ))
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn get_account_info(&self, _address: &LedgerAddress) -> Result<AccountInfo, PipelineError> {
        Err(self.unimplemented("get_account_info"))
    }

    async fn submit(&self, _artifact: &[u8]) -> Result<SubmitOutcome, PipelineError> {
        Err(self.unimplemented("submit"))
    }

    async fn confirm(&self, _payment: &Payment) -> Result<ConfirmOutcome, PipelineError> {
        Err(self.unimplemented("confirm"))
    }
}
