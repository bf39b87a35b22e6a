//! Re-entrancy: a second `tick()` overlapping an in-progress one must
//! return immediately with no side effects, never block.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use payout_pipeline::artifact::placeholder_artifact;
use payout_pipeline::driver::Driver;
use payout_pipeline::error::PipelineError;
use payout_pipeline::ledger::fake::FakeLedgerClient;
use payout_pipeline::model::{Amount, LedgerAddress, Payment, PaymentId};
use payout_pipeline::store::memory::MemoryStore;
use payout_pipeline::store::Store;

fn addr(s: &str) -> LedgerAddress {
    LedgerAddress::from_str(s).unwrap()
}

/// Delegates to a `MemoryStore`, but `list_unsigned` yields long enough
/// for a second, concurrently-issued `tick()` to observe the
/// re-entrancy guard already held.
struct SlowStore(MemoryStore);

#[async_trait]
impl Store for SlowStore {
    async fn insert_pending(
        &self,
        destination: LedgerAddress,
        amount: Amount,
        memo: Option<String>,
    ) -> Result<PaymentId, PipelineError> {
        self.0.insert_pending(destination, amount, memo).await
    }

    async fn list_unsigned(&self, limit: i64) -> Result<Vec<Payment>, PipelineError> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.0.list_unsigned(limit).await
    }

    async fn list_signed_unsubmitted(&self) -> Result<Vec<Payment>, PipelineError> {
        self.0.list_signed_unsubmitted().await
    }

    async fn list_submitted_unconfirmed(&self) -> Result<Vec<Payment>, PipelineError> {
        self.0.list_submitted_unconfirmed().await
    }

    async fn mark_signed(
        &self,
        id: PaymentId,
        sequence: u64,
        artifact: Vec<u8>,
    ) -> Result<(), PipelineError> {
        self.0.mark_signed(id, sequence, artifact).await
    }

    async fn mark_submitted(&self, id: PaymentId) -> Result<(), PipelineError> {
        self.0.mark_submitted(id).await
    }

    async fn mark_confirmed(&self, id: PaymentId) -> Result<(), PipelineError> {
        self.0.mark_confirmed(id).await
    }

    async fn mark_error(&self, id: PaymentId, kind: String, fatal: bool) -> Result<(), PipelineError> {
        self.0.mark_error(id, kind, fatal).await
    }

    async fn is_aborted(&self, id: PaymentId) -> Result<bool, PipelineError> {
        self.0.is_aborted(id).await
    }

    async fn abort(&self, id: PaymentId) -> Result<(), PipelineError> {
        self.0.abort(id).await
    }

    async fn highest_sequence(&self) -> Result<Option<u64>, PipelineError> {
        self.0.highest_sequence().await
    }

    async fn clear_signed_from(&self, id: PaymentId) -> Result<usize, PipelineError> {
        self.0.clear_signed_from(id).await
    }
}

#[tokio::test]
async fn overlapping_ticks_run_at_most_one_body() {
    let store = Arc::new(SlowStore(MemoryStore::new()));
    let ledger = Arc::new(FakeLedgerClient::new());
    let funding = addr("GFUNDING");
    ledger.set_next_sequence(&funding, 1);

    store
        .insert_pending(addr("GDEST"), Amount::Native(Decimal::new(1, 0)), None)
        .await
        .unwrap();

    let driver = Arc::new(Driver::new(store.clone(), ledger, funding));

    let d1 = driver.clone();
    let d2 = driver.clone();

    let (r1, r2) = tokio::join!(
        d1.tick(10, placeholder_artifact),
        d2.tick(10, placeholder_artifact),
    );

    let (r1, r2) = (r1.unwrap(), r2.unwrap());

    // Exactly one of the two observed the guard already held and did
    // nothing; the other ran the real body and signed the row.
    let total_signed = r1.signed + r2.signed;
    assert_eq!(total_signed, 1);
}
