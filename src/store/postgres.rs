//! Postgres-backed `Store`. One table, `(state, id)` indexed, sequence
//! nullable until Signed. `clear_signed_from` runs as a single
//! transaction spanning every affected row, matching spec §4.1's
//! atomicity requirement; the query shape (plain `sqlx::query` + manual
//! `Row::try_get` decoding rather than the `query!` macro, since that
//! macro needs a live database at build time) follows
//! `ibank-core/storage.rs`'s `PostgresLedgerStore`.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};

use crate::error::PipelineError;
use crate::model::{Amount, LedgerAddress, Payment, PaymentId, PaymentState};
use crate::store::Store;

pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, PipelineError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| PipelineError::Store(format!("postgres connect failed: {e}")))?;
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), PipelineError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS payments (
                id BIGSERIAL PRIMARY KEY,
                destination TEXT NOT NULL,
                amount_kind TEXT NOT NULL,
                amount_value NUMERIC NOT NULL,
                amount_currency TEXT NULL,
                amount_issuer TEXT NULL,
                memo TEXT NULL,
                state TEXT NOT NULL,
                sequence BIGINT NULL,
                signed_artifact BYTEA NULL,
                submitted_at TIMESTAMPTZ NULL,
                confirmed_at TIMESTAMPTZ NULL,
                error_kind TEXT NULL,
                error_fatal BOOLEAN NOT NULL DEFAULT FALSE
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::Store(format!("schema create failed: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_payments_state_id ON payments (state, id)")
            .execute(&self.pool)
            .await
            .map_err(|e| PipelineError::Store(format!("index create failed: {e}")))?;

        Ok(())
    }

    fn row_to_payment(row: &sqlx::postgres::PgRow) -> Result<Payment, PipelineError> {
        let decode_err = |field: &str, e: sqlx::Error| {
            PipelineError::Store(format!("decode {field} failed: {e}"))
        };

        let id: i64 = row.try_get("id").map_err(|e| decode_err("id", e))?;
        let destination: String = row
            .try_get("destination")
            .map_err(|e| decode_err("destination", e))?;
        let amount_kind: String = row
            .try_get("amount_kind")
            .map_err(|e| decode_err("amount_kind", e))?;
        let amount_value: Decimal = row
            .try_get("amount_value")
            .map_err(|e| decode_err("amount_value", e))?;
        let amount_currency: Option<String> = row
            .try_get("amount_currency")
            .map_err(|e| decode_err("amount_currency", e))?;
        let amount_issuer: Option<String> = row
            .try_get("amount_issuer")
            .map_err(|e| decode_err("amount_issuer", e))?;
        let memo: Option<String> = row.try_get("memo").map_err(|e| decode_err("memo", e))?;
        let state_str: String = row.try_get("state").map_err(|e| decode_err("state", e))?;
        let sequence: Option<i64> = row
            .try_get("sequence")
            .map_err(|e| decode_err("sequence", e))?;
        let signed_artifact: Option<Vec<u8>> = row
            .try_get("signed_artifact")
            .map_err(|e| decode_err("signed_artifact", e))?;
        let submitted_at: Option<DateTime<Utc>> = row
            .try_get("submitted_at")
            .map_err(|e| decode_err("submitted_at", e))?;
        let confirmed_at: Option<DateTime<Utc>> = row
            .try_get("confirmed_at")
            .map_err(|e| decode_err("confirmed_at", e))?;
        let error_kind: Option<String> = row
            .try_get("error_kind")
            .map_err(|e| decode_err("error_kind", e))?;
        let error_fatal: bool = row
            .try_get("error_fatal")
            .map_err(|e| decode_err("error_fatal", e))?;

        let amount = match amount_kind.as_str() {
            "native" => Amount::Native(amount_value),
            "issued" => Amount::Issued {
                value: amount_value,
                currency: amount_currency.unwrap_or_default(),
                issuer: LedgerAddress::from_str(&amount_issuer.unwrap_or_default())?,
            },
            other => {
                return Err(PipelineError::Store(format!(
                    "unknown amount_kind '{other}' in storage"
                )))
            }
        };

        Ok(Payment {
            id,
            destination: LedgerAddress::from_str(&destination)?,
            amount,
            memo,
            state: parse_state(&state_str)?,
            sequence: sequence.map(|s| s as u64),
            signed_artifact,
            submitted_at,
            confirmed_at,
            error_kind,
            error_fatal,
        })
    }
}

fn parse_state(s: &str) -> Result<PaymentState, PipelineError> {
    match s {
        "pending" => Ok(PaymentState::Pending),
        "signed" => Ok(PaymentState::Signed),
        "submitted" => Ok(PaymentState::Submitted),
        "confirmed" => Ok(PaymentState::Confirmed),
        "error" => Ok(PaymentState::Error),
        "aborted" => Ok(PaymentState::Aborted),
        other => Err(PipelineError::Store(format!(
            "unknown state '{other}' in storage"
        ))),
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn insert_pending(
        &self,
        destination: LedgerAddress,
        amount: Amount,
        memo: Option<String>,
    ) -> Result<PaymentId, PipelineError> {
        amount.validate()?;
        let (kind, value, currency, issuer) = match &amount {
            Amount::Native(v) => ("native", *v, None, None),
            Amount::Issued {
                value,
                currency,
                issuer,
            } => (
                "issued",
                *value,
                Some(currency.clone()),
                Some(issuer.as_str().to_string()),
            ),
        };

        let row = sqlx::query(
            r#"
            INSERT INTO payments
                (destination, amount_kind, amount_value, amount_currency, amount_issuer, memo, state, error_fatal)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', FALSE)
            RETURNING id
            "#,
        )
        .bind(destination.as_str())
        .bind(kind)
        .bind(value)
        .bind(currency)
        .bind(issuer)
        .bind(memo)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PipelineError::Store(format!("insert_pending failed: {e}")))?;

        let id: i64 = row
            .try_get("id")
            .map_err(|e| PipelineError::Store(format!("decode inserted id failed: {e}")))?;
        Ok(id)
    }

    async fn list_unsigned(&self, limit: i64) -> Result<Vec<Payment>, PipelineError> {
        let rows = sqlx::query(
            "SELECT * FROM payments WHERE state = 'pending' ORDER BY id ASC LIMIT $1",
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PipelineError::Store(format!("list_unsigned failed: {e}")))?;
        rows.iter().map(Self::row_to_payment).collect()
    }

    async fn list_signed_unsubmitted(&self) -> Result<Vec<Payment>, PipelineError> {
        let rows = sqlx::query(
            "SELECT * FROM payments WHERE state = 'signed' AND signed_artifact IS NOT NULL ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PipelineError::Store(format!("list_signed_unsubmitted failed: {e}")))?;
        rows.iter().map(Self::row_to_payment).collect()
    }

    async fn list_submitted_unconfirmed(&self) -> Result<Vec<Payment>, PipelineError> {
        let rows = sqlx::query("SELECT * FROM payments WHERE state = 'submitted' ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PipelineError::Store(format!("list_submitted_unconfirmed failed: {e}")))?;
        rows.iter().map(Self::row_to_payment).collect()
    }

    async fn mark_signed(
        &self,
        id: PaymentId,
        sequence: u64,
        artifact: Vec<u8>,
    ) -> Result<(), PipelineError> {
        let result = sqlx::query(
            "UPDATE payments SET state = 'signed', sequence = $1, signed_artifact = $2 WHERE id = $3 AND state = 'pending'",
        )
        .bind(sequence as i64)
        .bind(artifact)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::Store(format!("mark_signed failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::Store(format!(
                "mark_signed row {id}: no matching pending row"
            )));
        }
        Ok(())
    }

    async fn mark_submitted(&self, id: PaymentId) -> Result<(), PipelineError> {
        let result = sqlx::query(
            "UPDATE payments SET state = 'submitted', submitted_at = now() WHERE id = $1 AND state = 'signed'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::Store(format!("mark_submitted failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::Store(format!(
                "mark_submitted row {id}: no matching signed row"
            )));
        }
        Ok(())
    }

    async fn mark_confirmed(&self, id: PaymentId) -> Result<(), PipelineError> {
        let result = sqlx::query(
            "UPDATE payments SET state = 'confirmed', confirmed_at = now() WHERE id = $1 AND state = 'submitted'",
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::Store(format!("mark_confirmed failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::Store(format!(
                "mark_confirmed row {id}: no matching submitted row"
            )));
        }
        Ok(())
    }

    async fn mark_error(&self, id: PaymentId, kind: String, fatal: bool) -> Result<(), PipelineError> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET state = 'error', error_kind = $1, error_fatal = $2
            WHERE id = $3
              AND state != 'confirmed'
              AND state != 'aborted'
              AND NOT (state = 'error' AND error_fatal)
            "#,
        )
        .bind(kind)
        .bind(fatal)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::Store(format!("mark_error failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::Store(format!(
                "mark_error row {id}: row is terminal or missing"
            )));
        }
        Ok(())
    }

    async fn is_aborted(&self, id: PaymentId) -> Result<bool, PipelineError> {
        let row = sqlx::query("SELECT state FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PipelineError::Store(format!("is_aborted failed: {e}")))?
            .ok_or_else(|| PipelineError::Store(format!("no payment with id {id}")))?;
        let state: String = row
            .try_get("state")
            .map_err(|e| PipelineError::Store(format!("decode state failed: {e}")))?;
        Ok(state == "aborted")
    }

    async fn abort(&self, id: PaymentId) -> Result<(), PipelineError> {
        // A fatally-errored row IS abortable: it's the sanctioned escape
        // hatch §4.5.1 relies on to unwedge the pipeline. Only Confirmed
        // and already-Aborted are closed to it.
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET state = 'aborted'
            WHERE id = $1
              AND state != 'confirmed'
              AND state != 'aborted'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| PipelineError::Store(format!("abort failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::Store(format!(
                "abort row {id}: row is terminal or missing"
            )));
        }
        Ok(())
    }

    async fn highest_sequence(&self) -> Result<Option<u64>, PipelineError> {
        let row = sqlx::query("SELECT MAX(sequence) AS highest FROM payments WHERE sequence IS NOT NULL")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| PipelineError::Store(format!("highest_sequence failed: {e}")))?;
        let highest: Option<i64> = row
            .try_get("highest")
            .map_err(|e| PipelineError::Store(format!("decode highest failed: {e}")))?;
        Ok(highest.map(|v| v as u64))
    }

    async fn clear_signed_from(&self, id: PaymentId) -> Result<usize, PipelineError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PipelineError::Store(format!("begin transaction failed: {e}")))?;

        let result = sqlx::query(
            r#"
            UPDATE payments
            SET state = 'pending', sequence = NULL, signed_artifact = NULL, submitted_at = NULL
            WHERE id >= $1 AND state IN ('signed', 'submitted')
            "#,
        )
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(|e| PipelineError::Store(format!("clear_signed_from failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| PipelineError::Store(format!("commit transaction failed: {e}")))?;

        Ok(result.rows_affected() as usize)
    }
}

