//! Error kinds for the fraud scoring pipeline.
//!
//! Most of these are recovered locally by the caller (see each call site) —
//! `evaluate()` itself only ever returns `Err` for the cases where an error
//! truly blocks pipeline execution rather than degrading gracefully.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FraudError>;

#[derive(Error, Debug, Clone)]
pub enum FraudError {
    #[error("invalid email format: {0}")]
    FormatInvalid(String),

    #[error("model missing: {0}")]
    ModelMissing(String),

    #[error("model invalid: {0}")]
    ModelInvalid(String),

    #[error("checksum mismatch for artifact {artifact}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        artifact: String,
        expected: String,
        actual: String,
    },

    #[error("MX lookup timed out for domain {0}")]
    MxTimeout(String),

    #[error("MX lookup failed for domain {0}: {1}")]
    MxFailure(String, String),

    #[error("KV fetch failed for artifact {0}: {1}")]
    KvFetchFailed(String, String),

    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    #[error("calibration invalid: {0}")]
    CalibrationInvalid(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl FraudError {
    /// Stable token recorded alongside the signal that triggered this error,
    /// used for metrics and the persisted ledger row.
    pub fn kind_token(&self) -> &'static str {
        match self {
            Self::FormatInvalid(_) => "format_invalid",
            Self::ModelMissing(_) => "model_missing",
            Self::ModelInvalid(_) => "model_invalid",
            Self::ChecksumMismatch { .. } => "checksum_mismatch",
            Self::MxTimeout(_) => "mx_timeout",
            Self::MxFailure(..) => "mx_failure",
            Self::KvFetchFailed(..) => "kv_fetch_failed",
            Self::PersistenceFailed(_) => "persistence_failed",
            Self::CalibrationInvalid(_) => "calibration_invalid",
            Self::Internal(_) => "internal",
        }
    }
}
