//! End-to-end scenarios for the drain-sign-submit-confirm cycle, each
//! exercising one tick (or a short sequence of ticks) against the
//! in-memory Store and the scriptable fake ledger.

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;

use payout_pipeline::artifact::placeholder_artifact;
use payout_pipeline::driver::Driver;
use payout_pipeline::ledger::fake::FakeLedgerClient;
use payout_pipeline::ledger::{ConfirmOutcome, SubmitOutcome};
use payout_pipeline::model::{Amount, LedgerAddress, PaymentState};
use payout_pipeline::store::memory::MemoryStore;
use payout_pipeline::store::Store;

fn addr(s: &str) -> LedgerAddress {
    LedgerAddress::from_str(s).unwrap()
}

#[tokio::test]
async fn happy_path_cold_start() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(FakeLedgerClient::new());
    let funding = addr("GFUNDING");
    ledger.set_next_sequence(&funding, 42);

    let p1 = store
        .insert_pending(addr("GDEST"), Amount::Native(Decimal::new(10, 0)), None)
        .await
        .unwrap();
    // Ledger hasn't confirmed anything yet this tick.
    ledger.set_confirm_outcome(p1, ConfirmOutcome::StillPending);

    let driver = Driver::new(store.clone(), ledger.clone(), funding);
    let report = driver.tick(10, placeholder_artifact).await.unwrap();

    assert_eq!(report.signed, 1);
    assert_eq!(report.submitted, 1);

    let row = store
        .list_submitted_unconfirmed()
        .await
        .unwrap()
        .into_iter()
        .find(|p| p.id == p1)
        .expect("p1 should be submitted");
    assert_eq!(row.state, PaymentState::Submitted);
    assert_eq!(row.sequence, Some(42));
}

#[tokio::test]
async fn quota_gating() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(FakeLedgerClient::new());
    let funding = addr("GFUNDING");

    // Two rows already submitted and unconfirmed.
    for seq in [1u64, 2u64] {
        let id = store
            .insert_pending(addr("GDEST"), Amount::Native(Decimal::new(5, 0)), None)
            .await
            .unwrap();
        store
            .mark_signed(id, seq, vec![seq as u8])
            .await
            .unwrap();
        store.mark_submitted(id).await.unwrap();
        ledger.set_confirm_outcome(id, ConfirmOutcome::StillPending);
    }

    for _ in 0..5 {
        store
            .insert_pending(addr("GDEST"), Amount::Native(Decimal::new(5, 0)), None)
            .await
            .unwrap();
    }

    let driver = Driver::new(store.clone(), ledger.clone(), funding);
    let report = driver.tick(3, placeholder_artifact).await.unwrap();

    assert_eq!(report.signed, 1, "quota of 1 should admit exactly one row");
    assert_eq!(store.list_unsigned(100).await.unwrap().len(), 4);
}

#[tokio::test]
async fn resign_cascade() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(FakeLedgerClient::new());
    let funding = addr("GFUNDING");

    let mut ids = Vec::new();
    for seq in [100u64, 101, 102] {
        let id = store
            .insert_pending(addr("GDEST"), Amount::Native(Decimal::new(1, 0)), None)
            .await
            .unwrap();
        store
            .mark_signed(id, seq, vec![seq as u8])
            .await
            .unwrap();
        ids.push(id);
    }

    ledger.push_submit_outcome(SubmitOutcome::Resign("ledger rejected sequence".to_string()));
    ledger.set_next_sequence(&funding, 200);

    let driver = Driver::new(store.clone(), ledger.clone(), funding);
    let report = driver.tick(10, placeholder_artifact).await.unwrap();

    assert!(report.resigned);
    for id in ids {
        let row = store.list_unsigned(100).await.unwrap();
        let demoted = row.iter().find(|p| p.id == id).expect("row demoted to pending");
        assert_eq!(demoted.state, PaymentState::Pending);
        assert_eq!(demoted.sequence, None);
        assert!(demoted.signed_artifact.is_none());
    }
}

#[tokio::test]
async fn permanent_reject_non_invalidating() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(FakeLedgerClient::new());
    let funding = addr("GFUNDING");

    let mut ids = Vec::new();
    for seq in [10u64, 11, 12] {
        let id = store
            .insert_pending(addr("GDEST"), Amount::Native(Decimal::new(1, 0)), None)
            .await
            .unwrap();
        store
            .mark_signed(id, seq, vec![seq as u8])
            .await
            .unwrap();
        ids.push(id);
        ledger.set_confirm_outcome(id, ConfirmOutcome::StillPending);
    }

    // id[0] accepted, id[1] permanently (and non-invalidatingly) rejected,
    // id[2] falls through to the script's default (Accepted).
    ledger.push_submit_outcome(SubmitOutcome::Accepted);
    ledger.push_submit_outcome(SubmitOutcome::PermanentReject("destination policy".to_string()));

    let driver = Driver::new(store.clone(), ledger.clone(), funding);
    let report = driver.tick(10, placeholder_artifact).await.unwrap();

    assert!(!report.resigned);
    assert_eq!(report.submitted, 2);

    let rows = store.list_submitted_unconfirmed().await.unwrap();
    assert!(rows.iter().any(|p| p.id == ids[0]));
    assert!(rows.iter().any(|p| p.id == ids[2]));

    // id[1] is in Error(fatal=false), so it shows up in none of the
    // progress queues and isn't Aborted either.
    assert!(!rows.iter().any(|p| p.id == ids[1]));
    assert!(!store
        .list_signed_unsubmitted()
        .await
        .unwrap()
        .iter()
        .any(|p| p.id == ids[1]));
    assert_eq!(store.is_aborted(ids[1]).await.unwrap(), false);
}

#[tokio::test]
async fn fatal_then_abort() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(FakeLedgerClient::new());
    let funding = addr("GFUNDING");
    ledger.set_next_sequence(&funding, 7);

    let failing_id = store
        .insert_pending(addr("GDEST"), Amount::Native(Decimal::new(1, 0)), None)
        .await
        .unwrap();
    ledger.push_submit_error("network adapter panicked");

    let driver = Driver::new(store.clone(), ledger.clone(), funding.clone());

    // Tick 1: signs and attempts submission; the unclassified error is
    // absorbed into the fatal slot, not bubbled.
    let report = driver.tick(10, placeholder_artifact).await.unwrap();
    assert_eq!(report.signed, 1);
    assert_eq!(report.submitted, 0);

    // Tick 2: wedged.
    let err = driver.tick(10, placeholder_artifact).await.unwrap_err();
    assert!(matches!(err, payout_pipeline::error::PipelineError::Fatal { .. }));

    // Operator intervenes.
    store.abort(failing_id).await.unwrap();

    // New pending row behind the aborted one.
    let later_id = store
        .insert_pending(addr("GDEST"), Amount::Native(Decimal::new(2, 0)), None)
        .await
        .unwrap();
    ledger.set_confirm_outcome(later_id, ConfirmOutcome::StillPending);

    // Tick 3: resumes, resigns the trailing window, signs the new row.
    let report = driver.tick(10, placeholder_artifact).await.unwrap();
    assert_eq!(report.signed, 1);

    let later = store
        .list_signed_unsubmitted()
        .await
        .unwrap()
        .into_iter()
        .chain(store.list_submitted_unconfirmed().await.unwrap())
        .find(|p| p.id == later_id)
        .expect("later row should have progressed past pending");
    assert!(later.sequence.is_some());
}

#[tokio::test]
async fn sequence_init_from_db() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(FakeLedgerClient::new());
    let funding = addr("GFUNDING");
    // Deliberately do not call `set_next_sequence`; if the Driver
    // consults the ledger despite a highest-sequence row existing, the
    // new row would be stamped 0 or 1 instead of 501.
    let seeded_id = store
        .insert_pending(addr("GDEST"), Amount::Native(Decimal::new(1, 0)), None)
        .await
        .unwrap();
    store.mark_signed(seeded_id, 500, vec![1]).await.unwrap();
    store.mark_submitted(seeded_id).await.unwrap();
    ledger.set_confirm_outcome(seeded_id, ConfirmOutcome::StillPending);

    let new_id = store
        .insert_pending(addr("GDEST"), Amount::Native(Decimal::new(1, 0)), None)
        .await
        .unwrap();
    ledger.set_confirm_outcome(new_id, ConfirmOutcome::StillPending);

    let driver = Driver::new(store.clone(), ledger.clone(), funding);
    driver.tick(10, placeholder_artifact).await.unwrap();

    let rows = store.list_signed_unsubmitted().await.unwrap();
    let submitted = store.list_submitted_unconfirmed().await.unwrap();
    let new_row = rows
        .into_iter()
        .chain(submitted)
        .find(|p| p.id == new_id)
        .expect("new row should have a sequence stamped");
    assert_eq!(new_row.sequence, Some(501));
}

#[tokio::test]
async fn idempotent_when_nothing_to_do() {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(FakeLedgerClient::new());
    let funding = addr("GFUNDING");
    ledger.set_next_sequence(&funding, 9);

    let driver = Driver::new(store.clone(), ledger, funding);
    let report = driver.tick(10, placeholder_artifact).await.unwrap();

    assert_eq!(report.signed, 0);
    assert_eq!(report.submitted, 0);
    assert_eq!(report.confirmed, 0);
    assert!(!report.resigned);
    assert!(store.list_unsigned(100).await.unwrap().is_empty());
    assert!(store.list_signed_unsubmitted().await.unwrap().is_empty());
    assert!(store.list_submitted_unconfirmed().await.unwrap().is_empty());
}
