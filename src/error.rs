use crate::model::PaymentId;
use thiserror::Error;

/// Pipeline failure taxonomy (spec §7).
///
/// `Driver::tick` classifies every error it sees into one of these and
/// reacts accordingly; anything that does not fit a specific variant
/// should be constructed as `Fatal` rather than invented as a new kind,
/// per the fail-closed default in spec §7.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("transient network failure: {0}")]
    Transient(String),

    #[error("resign required for row {row}: {reason}")]
    Resign {
        row: PaymentId,
        reason: String,
        /// Whether `row` itself must be demoted back to Pending
        /// alongside every later in-flight row. False when the row's
        /// own rejection is final (a non-invalidating permanent reject
        /// that is nonetheless judged to consume no valid sequence slot
        /// downstream) and only the trailing window needs resigning.
        demote_row: bool,
    },

    #[error("fatal error{}: {reason}", .row.map(|r| format!(" on row {r}")).unwrap_or_default())]
    Fatal {
        row: Option<PaymentId>,
        reason: String,
    },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("ledger error: {0}")]
    Ledger(String),
}

impl PipelineError {
    /// The row this error is attributed to, if any. Used by the driver's
    /// fatal-promotion and resign-recovery paths.
    pub fn row(&self) -> Option<PaymentId> {
        match self {
            PipelineError::Resign { row, .. } => Some(*row),
            PipelineError::Fatal { row, .. } => *row,
            _ => None,
        }
    }
}
