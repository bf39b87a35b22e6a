//! Persistence contract (spec §4.1). Every operation here must be
//! atomic and durable; implementations are swappable via `Arc<dyn
//! Store>`, the trait-object generalization of the teacher's
//! `Arc<M: Middleware>` client parameter (see SPEC_FULL.md §2).

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;

use crate::error::PipelineError;
use crate::model::{Amount, LedgerAddress, Payment, PaymentId};

#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_pending(
        &self,
        destination: LedgerAddress,
        amount: Amount,
        memo: Option<String>,
    ) -> Result<PaymentId, PipelineError>;

    /// The `limit` lowest-id Pending rows, ordered by id ascending.
    async fn list_unsigned(&self, limit: i64) -> Result<Vec<Payment>, PipelineError>;

    /// Rows with a signed artifact present and state = Signed, ordered
    /// by id ascending.
    async fn list_signed_unsubmitted(&self) -> Result<Vec<Payment>, PipelineError>;

    /// Rows in state Submitted, ordered by id ascending.
    async fn list_submitted_unconfirmed(&self) -> Result<Vec<Payment>, PipelineError>;

    /// Pending -> Signed. Fails if the row's current state is not
    /// Pending.
    async fn mark_signed(
        &self,
        id: PaymentId,
        sequence: u64,
        artifact: Vec<u8>,
    ) -> Result<(), PipelineError>;

    /// Signed -> Submitted.
    async fn mark_submitted(&self, id: PaymentId) -> Result<(), PipelineError>;

    /// Submitted -> Confirmed.
    async fn mark_confirmed(&self, id: PaymentId) -> Result<(), PipelineError>;

    /// Any non-terminal state -> Error(kind, fatal).
    async fn mark_error(&self, id: PaymentId, kind: String, fatal: bool) -> Result<(), PipelineError>;

    async fn is_aborted(&self, id: PaymentId) -> Result<bool, PipelineError>;

    /// Operator action: transitions a row to Aborted. Permitted from any
    /// state except Confirmed and Aborted itself — including a fatally
    /// errored row, since that is the Driver's sanctioned way out of a
    /// wedged pipeline (spec §4.5.1).
    async fn abort(&self, id: PaymentId) -> Result<(), PipelineError>;

    /// max(sequence) across rows in state >= Signed.
    async fn highest_sequence(&self) -> Result<Option<u64>, PipelineError>;

    /// Atomically demotes every row with `id >= given` that is in state
    /// Signed or Submitted-unconfirmed back to Pending, clearing
    /// `signed_artifact` and `sequence`. Returns the number of rows
    /// demoted. Used by resign recovery (spec §4.5.3).
    async fn clear_signed_from(&self, id: PaymentId) -> Result<usize, PipelineError>;
}
