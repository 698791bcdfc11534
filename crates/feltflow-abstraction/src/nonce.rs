//! Request nonces for provider signatures.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Gap between a job submission nonce and the nonce used to sign result URLs.
///
/// The provider rejects a signature whose nonce does not exceed the last one it
/// saw for the consumer, and result URLs are consumed after the submission.
pub const RESULT_URL_NONCE_OFFSET: u64 = 1000;

/// Millisecond wall-clock timestamp used as a signature nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nonce(pub u64);

impl Nonce {
    /// A fresh nonce from the current time.
    #[must_use]
    pub fn now() -> Self {
        Self(u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default())
    }

    /// A nonce that sorts after `submission`, for signing result URLs.
    #[must_use]
    pub fn after(submission: Self) -> Self {
        Self(Self::now().0.max(submission.0) + RESULT_URL_NONCE_OFFSET)
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
