//! In-memory `Store`, used by tests and by `--database-url memory` for
//! local dry-runs. Every operation takes the lock for its whole body, so
//! it is trivially atomic -- the in-process analogue of the single
//! Postgres transaction `clear_signed_from` needs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use crate::error::PipelineError;
use crate::model::{Amount, LedgerAddress, Payment, PaymentId, PaymentState};
use crate::store::Store;

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    rows: BTreeMap<PaymentId, Payment>,
    next_id: PaymentId,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn not_found(id: PaymentId) -> PipelineError {
        PipelineError::Store(format!("no payment with id {id}"))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_pending(
        &self,
        destination: LedgerAddress,
        amount: Amount,
        memo: Option<String>,
    ) -> Result<PaymentId, PipelineError> {
        amount.validate()?;
        let mut inner = self.inner.lock().await;
        inner.next_id += 1;
        let id = inner.next_id;
        inner.rows.insert(
            id,
            Payment {
                id,
                destination,
                amount,
                memo,
                state: PaymentState::Pending,
                sequence: None,
                signed_artifact: None,
                submitted_at: None,
                confirmed_at: None,
                error_kind: None,
                error_fatal: false,
            },
        );
        Ok(id)
    }

    async fn list_unsigned(&self, limit: i64) -> Result<Vec<Payment>, PipelineError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rows
            .values()
            .filter(|p| p.state == PaymentState::Pending)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn list_signed_unsubmitted(&self) -> Result<Vec<Payment>, PipelineError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rows
            .values()
            .filter(|p| p.state == PaymentState::Signed && p.signed_artifact.is_some())
            .cloned()
            .collect())
    }

    async fn list_submitted_unconfirmed(&self) -> Result<Vec<Payment>, PipelineError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .rows
            .values()
            .filter(|p| p.state == PaymentState::Submitted)
            .cloned()
            .collect())
    }

    async fn mark_signed(
        &self,
        id: PaymentId,
        sequence: u64,
        artifact: Vec<u8>,
    ) -> Result<(), PipelineError> {
        let mut inner = self.inner.lock().await;
        let row = inner.rows.get_mut(&id).ok_or_else(|| Self::not_found(id))?;
        if row.state != PaymentState::Pending {
            return Err(PipelineError::Store(format!(
                "cannot mark_signed row {id}: state is {} not pending",
                row.state
            )));
        }
        row.state = PaymentState::Signed;
        row.sequence = Some(sequence);
        row.signed_artifact = Some(artifact);
        Ok(())
    }

    async fn mark_submitted(&self, id: PaymentId) -> Result<(), PipelineError> {
        let mut inner = self.inner.lock().await;
        let row = inner.rows.get_mut(&id).ok_or_else(|| Self::not_found(id))?;
        if row.state != PaymentState::Signed {
            return Err(PipelineError::Store(format!(
                "cannot mark_submitted row {id}: state is {} not signed",
                row.state
            )));
        }
        row.state = PaymentState::Submitted;
        row.submitted_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_confirmed(&self, id: PaymentId) -> Result<(), PipelineError> {
        let mut inner = self.inner.lock().await;
        let row = inner.rows.get_mut(&id).ok_or_else(|| Self::not_found(id))?;
        if row.state != PaymentState::Submitted {
            return Err(PipelineError::Store(format!(
                "cannot mark_confirmed row {id}: state is {} not submitted",
                row.state
            )));
        }
        row.state = PaymentState::Confirmed;
        row.confirmed_at = Some(Utc::now());
        Ok(())
    }

    async fn mark_error(&self, id: PaymentId, kind: String, fatal: bool) -> Result<(), PipelineError> {
        let mut inner = self.inner.lock().await;
        let row = inner.rows.get_mut(&id).ok_or_else(|| Self::not_found(id))?;
        if is_terminal(row) {
            return Err(PipelineError::Store(format!(
                "cannot mark_error row {id}: already terminal ({})",
                row.state
            )));
        }
        row.state = PaymentState::Error;
        row.error_kind = Some(kind);
        row.error_fatal = fatal;
        Ok(())
    }

    async fn is_aborted(&self, id: PaymentId) -> Result<bool, PipelineError> {
        let inner = self.inner.lock().await;
        let row = inner.rows.get(&id).ok_or_else(|| Self::not_found(id))?;
        Ok(row.state == PaymentState::Aborted)
    }

    async fn abort(&self, id: PaymentId) -> Result<(), PipelineError> {
        let mut inner = self.inner.lock().await;
        let row = inner.rows.get_mut(&id).ok_or_else(|| Self::not_found(id))?;
        // A fatally-errored row IS abortable: it's the sanctioned escape
        // hatch §4.5.1 relies on to unwedge the pipeline. Only Confirmed
        // and already-Aborted are closed to it.
        if matches!(row.state, PaymentState::Confirmed | PaymentState::Aborted) {
            return Err(PipelineError::Store(format!(
                "cannot abort row {id}: already terminal ({})",
                row.state
            )));
        }
        row.state = PaymentState::Aborted;
        Ok(())
    }

    async fn highest_sequence(&self) -> Result<Option<u64>, PipelineError> {
        let inner = self.inner.lock().await;
        Ok(inner.rows.values().filter_map(|p| p.sequence).max())
    }

    async fn clear_signed_from(&self, id: PaymentId) -> Result<usize, PipelineError> {
        let mut inner = self.inner.lock().await;
        let mut cleared = 0usize;
        for row in inner.rows.values_mut() {
            if row.id < id {
                continue;
            }
            if row.state == PaymentState::Signed || row.state == PaymentState::Submitted {
                row.state = PaymentState::Pending;
                row.sequence = None;
                row.signed_artifact = None;
                row.submitted_at = None;
                cleared += 1;
            }
        }
        Ok(cleared)
    }
}

fn is_terminal(row: &Payment) -> bool {
    row.state == PaymentState::Confirmed
        || row.state == PaymentState::Aborted
        || (row.state == PaymentState::Error && row.error_fatal)
}
