//! A scriptable `LedgerClient` used to drive every scenario in spec §8
//! without a network. Mirrors the role `opensub-keeper`'s `--dry-run` /
//! `--no-simulate` flags play for its collector, generalized into a full
//! fake so tests can script arbitrary outcome sequences instead of just
//! toggling two booleans.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::ledger::{AccountInfo, ConfirmOutcome, LedgerClient, SubmitOutcome};
use crate::model::{LedgerAddress, Payment, PaymentId};

#[derive(Debug, Default)]
pub struct FakeLedgerClient {
    /// Next-sequence to report for a given address, consulted only when
    /// the Store has no highest-sequence row (spec §4.5.2).
    next_sequence: Mutex<HashMap<String, u64>>,
    /// Scripted submit outcomes, consumed in order, one per call.
    submit_script: Mutex<VecDeque<SubmitOutcome>>,
    /// Scripted hard failures, consumed in order ahead of `submit_script`;
    /// used to exercise the Driver's fatal-promotion path (spec §4.5.4),
    /// which only fires on an unclassified `Err`, not on any `SubmitOutcome`.
    submit_errors: Mutex<VecDeque<String>>,
    /// Scripted confirm outcomes, keyed by payment id.
    confirm_script: Mutex<HashMap<PaymentId, ConfirmOutcome>>,
    /// Every artifact ever handed to `submit`, for test assertions.
    pub submitted: Mutex<Vec<Vec<u8>>>,
}

impl FakeLedgerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_next_sequence(&self, address: &LedgerAddress, next: u64) {
        self.next_sequence
            .lock()
            .unwrap()
            .insert(address.as_str().to_string(), next);
    }

    pub fn push_submit_outcome(&self, outcome: SubmitOutcome) {
        self.submit_script.lock().unwrap().push_back(outcome);
    }

    pub fn push_submit_error(&self, reason: impl Into<String>) {
        self.submit_errors.lock().unwrap().push_back(reason.into());
    }

    pub fn set_confirm_outcome(&self, id: PaymentId, outcome: ConfirmOutcome) {
        self.confirm_script.lock().unwrap().insert(id, outcome);
    }
}

#[async_trait]
impl LedgerClient for FakeLedgerClient {
    async fn get_account_info(&self, address: &LedgerAddress) -> Result<AccountInfo, PipelineError> {
        let next_sequence = self
            .next_sequence
            .lock()
            .unwrap()
            .get(address.as_str())
            .copied()
            .unwrap_or(0);
        Ok(AccountInfo { next_sequence })
    }

    async fn submit(&self, artifact: &[u8]) -> Result<SubmitOutcome, PipelineError> {
        self.submitted.lock().unwrap().push(artifact.to_vec());

        if let Some(reason) = self.submit_errors.lock().unwrap().pop_front() {
            return Err(PipelineError::Ledger(reason));
        }

        let outcome = self
            .submit_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(SubmitOutcome::Accepted);
        Ok(outcome)
    }

    async fn confirm(&self, payment: &Payment) -> Result<ConfirmOutcome, PipelineError> {
        let outcome = self
            .confirm_script
            .lock()
            .unwrap()
            .get(&payment.id)
            .copied()
            .unwrap_or(ConfirmOutcome::Confirmed);
        Ok(outcome)
    }
}
