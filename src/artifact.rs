//! Artifact validation: decide whether renderer output is a plausible PDF.
//!
//! Renderers fail in creative ways: Chrome can exit 0 after writing a
//! zero-byte file, wkhtmltopdf can print an HTML error page to stdout, and a
//! crashed session can hand back a truncated buffer. The checks here are
//! cheap structural ones; no PDF parsing happens.
//!
//! Rejections trigger fallback exactly like a render failure. Warnings are
//! attached to the [`crate::output::ConversionResult`] for observability only.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every PDF starts with this header (`%PDF-1.x` / `%PDF-2.0`).
pub const PDF_MAGIC: &[u8] = b"%PDF-";

const EOF_MARKER: &[u8] = b"%%EOF";

/// How far from the end the `%%EOF` marker is searched for.
const EOF_SEARCH_WINDOW: usize = 1024;

/// Why a payload was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactError {
    #[error("output is empty")]
    Empty,

    #[error("missing %PDF- header (first bytes: {first_bytes:?})")]
    BadMagic { first_bytes: Vec<u8> },
}

/// Suspicious-but-accepted properties of a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "warning", rename_all = "snake_case")]
pub enum ArtifactWarning {
    /// Smaller than the configured threshold; often a blank page.
    Undersized { size: usize, threshold: usize },
    /// No `%%EOF` near the end; the file may be truncated.
    MissingEofMarker,
}

impl std::fmt::Display for ArtifactWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactWarning::Undersized { size, threshold } => {
                write!(f, "PDF is only {size} bytes (threshold {threshold})")
            }
            ArtifactWarning::MissingEofMarker => f.write_str("PDF has no %%EOF trailer"),
        }
    }
}

/// Validate `bytes`, returning the warnings for an accepted payload.
pub fn validate(bytes: &[u8], min_size: usize) -> Result<Vec<ArtifactWarning>, ArtifactError> {
    if bytes.is_empty() {
        return Err(ArtifactError::Empty);
    }
    if !bytes.starts_with(PDF_MAGIC) {
        return Err(ArtifactError::BadMagic {
            first_bytes: bytes.iter().take(8).copied().collect(),
        });
    }

    let mut warnings = Vec::new();
    if bytes.len() < min_size {
        warnings.push(ArtifactWarning::Undersized {
            size: bytes.len(),
            threshold: min_size,
        });
    }
    let tail = &bytes[bytes.len().saturating_sub(EOF_SEARCH_WINDOW)..];
    if !tail.windows(EOF_MARKER.len()).any(|w| w == EOF_MARKER) {
        warnings.push(ArtifactWarning::MissingEofMarker);
    }
    Ok(warnings)
}
