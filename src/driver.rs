//! Orchestrates a single "tick": fatal-error check, sequence init,
//! signing-limit calc, signing, submission (spec §4.5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::ledger::LedgerClient;
use crate::model::{LedgerAddress, Payment, PaymentId};
use crate::signer::Signer;
use crate::store::Store;
use crate::submitter::{SubmitReport, Submitter};

/// The Driver's `fatalError` slot (spec §4.5.1).
#[derive(Debug, Clone)]
struct FatalSlot {
    row: Option<PaymentId>,
    reason: String,
}

/// Summary of one tick, for the caller to log (mirrors the "cycle
/// complete" summary the teacher's `main.rs` loop logs after each
/// scan+collect pass).
#[derive(Debug, Default, Clone, Copy)]
pub struct TickReport {
    pub signed: usize,
    pub submitted: usize,
    pub confirmed: usize,
    pub resigned: bool,
}

pub struct Driver<S: Store, L: LedgerClient> {
    store: Arc<S>,
    ledger: Arc<L>,
    funding_address: LedgerAddress,
    signer: Signer,
    submitter: Submitter<L>,
    fatal_error: Mutex<Option<FatalSlot>>,
    /// Re-entrancy guard: the sole mutual-exclusion primitive for "at
    /// most one Driver tick executes at a time" (spec §5), the
    /// in-process generalization of the teacher's cross-process `fs2`
    /// advisory lock file (see SPEC_FULL.md §6).
    ticking: AtomicBool,
}

/// Released unconditionally when dropped, on every exit path of `tick`,
/// the same guarantee the teacher's `_lock_guard` provides for its file
/// lock.
struct TickGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl<S: Store, L: LedgerClient> Driver<S, L> {
    pub fn new(store: Arc<S>, ledger: Arc<L>, funding_address: LedgerAddress) -> Self {
        Self {
            store,
            ledger,
            funding_address,
            signer: Signer::new(),
            submitter: Submitter::new(Arc::clone(&ledger)),
            fatal_error: Mutex::new(None),
            ticking: AtomicBool::new(false),
        }
    }

    pub async fn tick(
        &self,
        max_in_flight: u32,
        artifact_fn: impl Fn(&Payment, u64) -> Vec<u8>,
    ) -> Result<TickReport, PipelineError> {
        // Step 1: re-entrancy guard. A failed compare_exchange means a
        // tick is already in progress; return immediately, no error, no
        // side effect (spec §4.5 step 1, §5).
        if self
            .ticking
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("tick already in progress; skipping");
            return Ok(TickReport::default());
        }
        let _guard = TickGuard {
            flag: &self.ticking,
        };

        // Step 2: fatal-error check (spec §4.5.1).
        if let Some(fatal) = self.fatal_error.lock().await.clone() {
            match fatal.row {
                Some(row) if self.store.is_aborted(row).await? => {
                    info!(row, "operator aborted fatally-errored row; resuming");
                    *self.fatal_error.lock().await = None;
                    self.resign_recovery(row, false).await?;
                }
                _ => {
                    warn!(reason = %fatal.reason, row = ?fatal.row, "pipeline wedged on fatal error");
                    return Err(PipelineError::Fatal {
                        row: fatal.row,
                        reason: fatal.reason,
                    });
                }
            }
        }

        let mut report = TickReport::default();

        // Step 3: ensure sequence initialized (spec §4.5.2). Routed
        // through the same classification as step 6/7: a Store or
        // LedgerClient failure here is just as capable of needing a
        // resign or a fatal wedge as a submission failure is, and must
        // not bypass `fatal_error`/retry handling via a bare `?`.
        if let Err(err) = self.ensure_sequence_initialized().await {
            report.resigned = self.classify(err).await?;
            return Ok(report);
        }

        // Step 4: quota.
        let in_flight = match self.store.list_submitted_unconfirmed().await {
            Ok(rows) => rows.len() as i64,
            Err(err) => {
                report.resigned = self.classify(err).await?;
                return Ok(report);
            }
        };
        let quota = max_in_flight as i64 - in_flight;

        // Step 5: sign.
        if quota > 0 {
            match self
                .signer
                .sign_transactions(self.store.as_ref(), quota, artifact_fn)
                .await
            {
                Ok(signed) => report.signed = signed,
                Err(err) => {
                    report.resigned = self.classify(err).await?;
                    return Ok(report);
                }
            }
        }

        // Step 6: submit + confirm.
        let outcome = self.submitter.submit_transactions(self.store.as_ref()).await;

        // Step 7: classify any raised error.
        match outcome {
            Ok(SubmitReport {
                submitted,
                confirmed,
            }) => {
                report.submitted = submitted;
                report.confirmed = confirmed;
            }
            Err(err) => {
                report.resigned = self.classify(err).await?;
            }
        }

        Ok(report)
    }

    /// Classifies an error surfaced from sequence init, signing, or
    /// submission/confirmation into the reaction spec §4.5 step 7 and
    /// §7 describe: log-and-swallow for Transient, resign recovery for
    /// Resign, fatal promotion for anything else. Shared by every
    /// fallible step in `tick` so no error class can bypass
    /// `fatal_error`/resign handling by returning early with `?`.
    /// Returns whether a resign ran, for the caller's `TickReport`.
    async fn classify(&self, err: PipelineError) -> Result<bool, PipelineError> {
        match err {
            PipelineError::Transient(reason) => {
                warn!(reason, "transient failure; will retry next tick");
                Ok(false)
            }
            PipelineError::Resign {
                row,
                reason,
                demote_row,
            } => {
                info!(row, reason, demote_row, "resign required; recovering");
                self.resign_recovery(row, demote_row).await?;
                Ok(true)
            }
            other => {
                self.promote_fatal(other).await?;
                Ok(false)
            }
        }
    }

    /// spec §4.5.2.
    async fn ensure_sequence_initialized(&self) -> Result<(), PipelineError> {
        if self.signer.get_sequence().await.is_some() {
            return Ok(());
        }

        if let Some(highest) = self.store.highest_sequence().await? {
            self.signer.set_sequence(highest + 1).await;
            return Ok(());
        }

        let info = self.ledger.get_account_info(&self.funding_address).await?;
        self.signer.set_sequence(info.next_sequence).await;
        Ok(())
    }

    /// spec §4.5.3.
    async fn resign_recovery(
        &self,
        offending_row: PaymentId,
        demote_row: bool,
    ) -> Result<(), PipelineError> {
        let from = if demote_row {
            offending_row
        } else {
            offending_row + 1
        };
        let cleared = self.store.clear_signed_from(from).await?;
        debug!(from, cleared, "resign recovery cleared rows");

        let info = self.ledger.get_account_info(&self.funding_address).await?;
        self.signer.set_sequence(info.next_sequence).await;
        Ok(())
    }

    /// spec §4.5.4: unclassified errors default to Fatal (fail-closed).
    async fn promote_fatal(&self, err: PipelineError) -> Result<(), PipelineError> {
        let row = err.row();
        let reason = err.to_string();

        if let Some(row) = row {
            self.store.mark_error(row, reason.clone(), true).await?;
        }

        error!(row = ?row, reason, "promoting unclassified error to fatal");
        *self.fatal_error.lock().await = Some(FatalSlot { row, reason });
        Ok(())
    }
}
