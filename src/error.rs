//! Error types shared across the crate.
//!
//! Storage failures carry their tier-side message but are classified
//! uniformly: `StoreError::classify` decides quota-exhausted vs. everything
//! else, and the same rules apply to both store backends.

use thiserror::Error;

/// Failure raised by either store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be opened at all (unsupported environment,
    /// unreadable database file). Treated like a write failure by the save
    /// cascade.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The device-imposed capacity limit was reached.
    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("write failed: {0}")]
    Write(String),

    #[error("read failed: {0}")]
    Read(String),

    #[error("record serialization failed: {0}")]
    Serialization(String),
}

/// Outcome of quota classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Quota,
    Other,
}

impl StoreError {
    /// Classify this failure as quota-exhausted or other.
    ///
    /// Structured quota signals (SQLITE_FULL, ENOSPC) are mapped to
    /// [`StoreError::QuotaExceeded`] at the backend boundary; on top of
    /// that, any failure whose message mentions "quota" classifies as
    /// quota regardless of which backend produced it. An unrecognized
    /// quota failure classifies as `Other` and costs one doomed fallback
    /// attempt, which is then classified again.
    pub fn classify(&self) -> FailureKind {
        if matches!(self, Self::QuotaExceeded(_)) {
            return FailureKind::Quota;
        }
        if self.to_string().to_ascii_lowercase().contains("quota") {
            return FailureKind::Quota;
        }
        FailureKind::Other
    }
}

/// Configuration errors raised while resolving `ROLLBOOK_*` settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}
