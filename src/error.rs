//! Error types for the edgequake-url2pdf library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ConversionError`] — **Terminal**: the conversion call is over
//!   (malformed URL, every backend failed, the global deadline expired).
//!   Returned as `Err(ConversionError)` from the top-level `convert*` functions.
//!
//! * [`RenderError`] — **Recoverable**: a single backend attempt failed
//!   (tool missing, crashed process, timeout, garbage output). The fallback
//!   chain records it in a [`crate::output::RenderAttempt`] and moves on to
//!   the next backend; it never reaches the caller on its own.
//!
//! Every terminal error that follows at least one attempt carries the full
//! attempt history, so the `Display` output alone tells an operator which
//! renderers were tried, in what order, and why each one failed.

use crate::output::{BackendId, RenderAttempt};
use crate::process::ProcessError;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// All terminal errors returned by the edgequake-url2pdf library.
#[derive(Debug, Error)]
pub enum ConversionError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The URL is empty, malformed, or uses an unsupported scheme.
    /// No backend is invoked.
    #[error("Invalid URL '{input}': {reason}")]
    InvalidUrl { input: String, reason: String },

    // ── Chain errors ──────────────────────────────────────────────────────
    /// Every backend in the chain was tried and none produced a valid PDF.
    #[error(
        "All {} backends failed:\n{}",
        .attempts.len(),
        summarize_attempts(.attempts)
    )]
    AllBackendsFailed { attempts: Vec<RenderAttempt> },

    /// The whole conversion exceeded its wall-clock deadline. Any in-flight
    /// renderer process was terminated.
    #[error(
        "Conversion timed out after {}s{}\n{}",
        .limit.as_secs_f64(),
        .in_flight
            .as_ref()
            .map(|id| format!(" while '{id}' was rendering"))
            .unwrap_or_default(),
        summarize_attempts(.attempts)
    )]
    GlobalTimeout {
        limit: Duration,
        attempts: Vec<RenderAttempt>,
        in_flight: Option<BackendId>,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output PDF file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or registry validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConversionError {
    /// Attempt history carried by chain-level errors (empty otherwise).
    pub fn attempts(&self) -> &[RenderAttempt] {
        match self {
            ConversionError::AllBackendsFailed { attempts }
            | ConversionError::GlobalTimeout { attempts, .. } => attempts,
            _ => &[],
        }
    }
}

/// A recoverable failure of one backend attempt.
///
/// Every variant advances the fallback chain; the distinction exists for
/// diagnostics only.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum RenderError {
    /// The backend's external tool could not be resolved. Not retried.
    #[error("'{tool}' is not available: {reason}")]
    BackendUnavailable { tool: String, reason: String },

    /// The external process ran but produced unusable output
    /// (non-zero exit, missing or empty output, protocol error).
    #[error("render failed: {detail}")]
    RenderFailed { detail: String },

    /// The backend exceeded its hard wall-clock limit and was terminated.
    #[error("timed out after {}ms", .limit.as_millis())]
    Timeout { limit: Duration },

    /// The produced bytes were rejected by the artifact validator.
    #[error("invalid artifact: {reason}")]
    InvalidArtifact { reason: String },
}

impl RenderError {
    pub fn failed(detail: impl Into<String>) -> Self {
        RenderError::RenderFailed {
            detail: detail.into(),
        }
    }

    /// Classification used in attempt records.
    pub fn kind(&self) -> FailureKind {
        match self {
            RenderError::BackendUnavailable { .. } => FailureKind::BackendUnavailable,
            RenderError::RenderFailed { .. } => FailureKind::RenderFailed,
            RenderError::Timeout { .. } => FailureKind::Timeout,
            RenderError::InvalidArtifact { .. } => FailureKind::InvalidArtifact,
        }
    }
}

impl From<ProcessError> for RenderError {
    fn from(e: ProcessError) -> Self {
        match e {
            ProcessError::TimedOut { limit, .. } => RenderError::Timeout { limit },
            ProcessError::Spawn { program, source }
                if matches!(
                    source.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
                ) =>
            {
                RenderError::BackendUnavailable {
                    tool: program,
                    reason: source.to_string(),
                }
            }
            ProcessError::Unsupported => RenderError::BackendUnavailable {
                tool: "process runner".into(),
                reason: "cannot spawn long-lived processes".into(),
            },
            other => RenderError::failed(other.to_string()),
        }
    }
}

/// Serialisable classification of a [`RenderError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    BackendUnavailable,
    RenderFailed,
    Timeout,
    InvalidArtifact,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureKind::BackendUnavailable => "unavailable",
            FailureKind::RenderFailed => "render failed",
            FailureKind::Timeout => "timeout",
            FailureKind::InvalidArtifact => "invalid artifact",
        };
        f.write_str(s)
    }
}

/// One line per attempt: `  1. backend-id [kind] detail (123ms)`.
fn summarize_attempts(attempts: &[RenderAttempt]) -> String {
    let mut out = String::new();
    for (i, attempt) in attempts.iter().enumerate() {
        let _ = writeln!(out, "  {}. {}", i + 1, attempt);
    }
    out.trim_end().to_string()
}
