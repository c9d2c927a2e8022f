//! The shared error taxonomy (`spec.md` §7). Every crate boundary's own
//! `thiserror` enum maps one or more of its variants onto a single
//! `ErrorKind` so the Control Facade can surface one taxonomic kind
//! regardless of which component raised the error.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kinds of errors the core distinguishes, independent of which
/// component raised them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Socket, DNS, TLS handshake, 5xx, body parse. Backoff + retry at call site.
    TransientNetwork,
    /// Service-specific rate-limit signal. Rate Governor backoff, progress preserved.
    RateLimit,
    /// Token rejected. Transparent token refresh.
    AuthExpired,
    /// Credentials reject outright. Fail permanently for this config, no retry.
    PermissionDenied,
    /// Browser session no longer responsive. Driver fails the job; scheduler
    /// recycles the profile.
    SessionLost,
    /// A single candidate record is unparseable. Skip it, log, continue.
    ExtractionMalformed,
    /// Caller supplied an invalid spec. Rejected before state is touched.
    ConstraintViolation,
    /// Durable store unavailable. Propagate; irrecoverable for the current run.
    StorageError,
}

impl ErrorKind {
    /// Whether an error of this kind should trigger `BackoffDelay`-based
    /// retry at the call site (`spec.md` §7).
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::TransientNetwork | ErrorKind::RateLimit)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::TransientNetwork => "transient-network",
            ErrorKind::RateLimit => "rate-limit",
            ErrorKind::AuthExpired => "auth-expired",
            ErrorKind::PermissionDenied => "permission-denied",
            ErrorKind::SessionLost => "session-lost",
            ErrorKind::ExtractionMalformed => "extraction-malformed",
            ErrorKind::ConstraintViolation => "constraint-violation",
            ErrorKind::StorageError => "storage-error",
        };
        write!(f, "{label}")
    }
}

/// Implemented by every crate-local `thiserror` error enum so a caller can
/// ask "which taxonomic kind is this?" without matching on concrete variants.
pub trait HasErrorKind {
    fn kind(&self) -> ErrorKind;
}
