//! Owns the local sequence counter; transforms queued rows into signed
//! artifacts (spec §4.3).

use tokio::sync::Mutex;

use crate::error::PipelineError;
use crate::model::Payment;
use crate::store::Store;

/// Holds a single mutable field, `next_sequence`, behind a mutex so the
/// read-stamp-increment sequence inside `sign_transactions` cannot
/// interleave with a concurrent `set_sequence` call from resign
/// recovery. Authoritative only while a `Driver` tick is active (spec
/// §3 ownership note).
#[derive(Debug, Default)]
pub struct Signer {
    next_sequence: Mutex<Option<u64>>,
}

impl Signer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_sequence(&self) -> Option<u64> {
        *self.next_sequence.lock().await
    }

    pub async fn set_sequence(&self, n: u64) {
        *self.next_sequence.lock().await = Some(n);
    }

    /// Stamps up to `limit` unsigned rows with strictly increasing
    /// sequence numbers and hands each to `artifact_fn` for signing
    /// (the opaque signing operation spec §1 excludes from this core).
    ///
    /// No-op if `limit <= 0`. Stops at the first per-row failure,
    /// leaving `next_sequence` pointing at the first unassigned
    /// sequence so later calls introduce no gap (spec §4.3 invariant).
    pub async fn sign_transactions(
        &self,
        store: &dyn Store,
        limit: i64,
        artifact_fn: impl Fn(&Payment, u64) -> Vec<u8>,
    ) -> Result<usize, PipelineError> {
        if limit <= 0 {
            return Ok(0);
        }

        let unsigned = store.list_unsigned(limit).await?;
        let mut signed_count = 0usize;

        for payment in &unsigned {
            let mut guard = self.next_sequence.lock().await;
            let sequence = guard.ok_or_else(|| {
                PipelineError::Fatal {
                    row: Some(payment.id),
                    reason: "signer has no initialized sequence cursor".to_string(),
                }
            })?;

            let artifact = artifact_fn(payment, sequence);
            // Drop the lock before the (potentially slow) store round
            // trip; a concurrent caller observing a stale cursor here
            // would only race with itself, since `Signer` methods are
            // only invoked from inside a single guarded tick (spec §5).
            drop(guard);

            store.mark_signed(payment.id, sequence, artifact).await?;

            let mut guard = self.next_sequence.lock().await;
            *guard = Some(sequence + 1);
            drop(guard);

            signed_count += 1;
        }

        Ok(signed_count)
    }
}
