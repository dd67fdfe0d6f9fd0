//! Output types: the successful result and the per-backend attempt records.

use crate::artifact::ArtifactWarning;
use crate::error::{FailureKind, RenderError};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::time::SystemTime;

/// Stable identifier of one backend in the registry, e.g. `"static-html-converter"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendId(Cow<'static, str>);

impl BackendId {
    pub const fn from_static(id: &'static str) -> Self {
        BackendId(Cow::Borrowed(id))
    }

    pub fn new(id: impl Into<String>) -> Self {
        BackendId(Cow::Owned(id.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for BackendId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for BackendId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// A successfully converted document.
///
/// Only ever built by the fallback chain after the artifact validator
/// accepted the bytes of exactly one backend attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionResult {
    /// The PDF payload.
    #[serde(skip)]
    pub bytes: Vec<u8>,
    /// Backend that produced `bytes`.
    pub backend_used: BackendId,
    /// `bytes.len()`, kept for logs and JSON output.
    pub size: usize,
    /// Non-fatal validator findings (e.g. suspiciously small output).
    pub warnings: Vec<ArtifactWarning>,
    /// Every attempt of this call in order; the last one is the success.
    pub attempts: Vec<RenderAttempt>,
    /// Wall-clock time of the whole call.
    pub duration_ms: u64,
}

impl ConversionResult {
    /// Base64 (standard alphabet) encoding of the PDF bytes.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.bytes)
    }

    /// Number of backends that failed before `backend_used` succeeded.
    pub fn fallbacks(&self) -> usize {
        self.attempts.len().saturating_sub(1)
    }
}

/// Record of one backend invocation within a conversion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderAttempt {
    pub backend_id: BackendId,
    pub started_at: SystemTime,
    pub duration_ms: u64,
    pub outcome: AttemptOutcome,
}

impl RenderAttempt {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, AttemptOutcome::Success { .. })
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self.outcome {
            AttemptOutcome::Failure { kind, .. } => Some(kind),
            AttemptOutcome::Success { .. } => None,
        }
    }
}

impl fmt::Display for RenderAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AttemptOutcome::Success { size } => write!(
                f,
                "{} [ok] {} bytes ({}ms)",
                self.backend_id, size, self.duration_ms
            ),
            AttemptOutcome::Failure { kind, detail } => write!(
                f,
                "{} [{}] {} ({}ms)",
                self.backend_id, kind, detail, self.duration_ms
            ),
        }
    }
}

/// Outcome of a [`RenderAttempt`].
///
/// The bytes of a successful attempt move into [`ConversionResult`]; the
/// record keeps only their size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success { size: usize },
    Failure { kind: FailureKind, detail: String },
}

impl AttemptOutcome {
    pub fn from_error(error: &RenderError) -> Self {
        AttemptOutcome::Failure {
            kind: error.kind(),
            detail: error.to_string(),
        }
    }
}
