//! Pushes signed artifacts to the ledger; classifies responses into
//! confirm/retry/resign/fatal (spec §4.4).

use std::sync::Arc;

use crate::error::PipelineError;
use crate::ledger::{ConfirmOutcome, LedgerClient, SubmitOutcome};
use crate::store::Store;

/// Ledger response strings judged not to invalidate the sequence chain
/// (spec §9's Open Question, resolved fail-closed: anything not on this
/// list is treated as Resign). These are placeholders for whatever a
/// concrete ledger's error taxonomy uses; see SPEC_FULL.md §5.
const NON_INVALIDATING_REJECT_REASONS: &[&str] = &[
    "destination policy",
    "destination tag required",
    "amount too small",
    "destination does not exist",
];

fn is_sequence_invalidating(reason: &str) -> bool {
    !NON_INVALIDATING_REJECT_REASONS
        .iter()
        .any(|known| reason.contains(known))
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SubmitReport {
    pub submitted: usize,
    pub confirmed: usize,
}

pub struct Submitter<L: LedgerClient> {
    ledger: Arc<L>,
}

impl<L: LedgerClient> Submitter<L> {
    pub fn new(ledger: Arc<L>) -> Self {
        Self { ledger }
    }

    /// Drains all signed-unsubmitted rows in id-ascending order, then
    /// sweeps all submitted-unconfirmed rows for confirmation. Rows are
    /// processed strictly sequentially (not fanned out concurrently,
    /// unlike the teacher's collector) because submission order is
    /// load-bearing for sequence correctness (spec §5).
    pub async fn submit_transactions(
        &self,
        store: &dyn Store,
    ) -> Result<SubmitReport, PipelineError> {
        let mut report = SubmitReport::default();

        let submit_result = self.drain_signed(store, &mut report).await;

        // The confirmation sweep runs regardless of whether submission
        // stopped early (spec §4.4: "may be interleaved or run as part
        // of the same call"). A submission error takes priority over a
        // confirmation error when both occur in the same tick, since it
        // reflects an earlier id in the ordering.
        let confirm_result = self.sweep_confirmations(store, &mut report).await;

        submit_result?;
        confirm_result?;
        Ok(report)
    }

    async fn drain_signed(
        &self,
        store: &dyn Store,
        report: &mut SubmitReport,
    ) -> Result<(), PipelineError> {
        let rows = store.list_signed_unsubmitted().await?;

        for row in rows {
            let artifact = row.signed_artifact.as_deref().ok_or_else(|| {
                PipelineError::Store(format!(
                    "row {} is signed but has no artifact on record",
                    row.id
                ))
            })?;

            match self.ledger.submit(artifact).await? {
                SubmitOutcome::Accepted => {
                    store.mark_submitted(row.id).await?;
                    report.submitted += 1;
                }
                SubmitOutcome::TransientNetwork => {
                    return Err(PipelineError::Transient(format!(
                        "submit transient failure on row {}",
                        row.id
                    )));
                }
                SubmitOutcome::Resign(reason) => {
                    return Err(PipelineError::Resign {
                        row: row.id,
                        reason,
                        demote_row: true,
                    });
                }
                SubmitOutcome::PermanentReject(reason) => {
                    store
                        .mark_error(row.id, reason.clone(), false)
                        .await?;

                    if is_sequence_invalidating(&reason) {
                        return Err(PipelineError::Resign {
                            row: row.id,
                            reason,
                            demote_row: false,
                        });
                    }
                }
            }
        }

        Ok(())
    }

    async fn sweep_confirmations(
        &self,
        store: &dyn Store,
        report: &mut SubmitReport,
    ) -> Result<(), PipelineError> {
        let rows = store.list_submitted_unconfirmed().await?;

        for row in rows {
            match self.ledger.confirm(&row).await? {
                ConfirmOutcome::Confirmed => {
                    store.mark_confirmed(row.id).await?;
                    report.confirmed += 1;
                }
                ConfirmOutcome::StillPending => {}
                ConfirmOutcome::Lost => {
                    return Err(PipelineError::Resign {
                        row: row.id,
                        reason: "submitted artifact lost".to_string(),
                        demote_row: true,
                    });
                }
            }
        }

        Ok(())
    }
}
