//! Conversion entry points.
//!
//! [`Converter`] is the orchestrator: it admits a request, runs the fallback
//! chain under one global deadline, and turns the outcome into either a
//! [`ConversionResult`] or a classified [`ConversionError`]. Build it once
//! and share it; the registry inside is immutable and every call owns its
//! own processes and temp files.
//!
//! The free functions ([`convert`], [`convert_to_file`], [`convert_sync`],
//! [`check_backends`]) build a throwaway `Converter` from a config for
//! one-off use.
//!
//! ## Why one global deadline?
//!
//! Per-backend limits bound each attempt, but three backends with generous
//! limits add up to minutes. Callers (usually an HTTP handler) need a single
//! upper bound for the whole call. When it fires, the chain future is
//! dropped, which kills whatever renderer process is still running.

use crate::chain::{run_chain, ChainTrace};
use crate::config::ConversionConfig;
use crate::error::ConversionError;
use crate::output::{BackendId, ConversionResult};
use crate::progress::{ConversionProgressCallback, NoopProgressCallback};
use crate::registry::BackendRegistry;
use crate::request::ConversionRequest;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Orchestrates conversions over a fixed backend registry.
#[derive(Debug, Clone)]
pub struct Converter {
    config: ConversionConfig,
    registry: Arc<BackendRegistry>,
}

impl Converter {
    /// Converter over the built-in backends listed in `config.backends`.
    pub fn new(config: ConversionConfig) -> Result<Self, ConversionError> {
        let registry = BackendRegistry::from_config(&config)?;
        Ok(Self::with_registry(config, registry))
    }

    /// Converter over a caller-assembled registry. `config.backends` is
    /// ignored; budgets, validation and progress settings still apply.
    pub fn with_registry(config: ConversionConfig, registry: BackendRegistry) -> Self {
        Self {
            config,
            registry: Arc::new(registry),
        }
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Convert `url`, waiting up to `readiness_budget` (or the configured
    /// default) for dynamic content.
    ///
    /// # Errors
    /// * [`ConversionError::InvalidUrl`] — no backend was invoked.
    /// * [`ConversionError::AllBackendsFailed`] — one attempt per backend, in order.
    /// * [`ConversionError::GlobalTimeout`] — the in-flight backend was cancelled.
    pub async fn convert_url(
        &self,
        url: &str,
        readiness_budget: Option<Duration>,
    ) -> Result<ConversionResult, ConversionError> {
        let mut request = ConversionRequest::parse(url)?;
        if let Some(budget) = readiness_budget {
            request = request.with_readiness_budget(budget);
        }
        self.convert(&request).await
    }

    /// Convert an already-validated request.
    pub async fn convert(
        &self,
        request: &ConversionRequest,
    ) -> Result<ConversionResult, ConversionError> {
        let start = Instant::now();
        let url = request.url();
        let budget = self.config.effective_budget(request.readiness_budget());
        let limit = self.config.global_timeout;

        let noop: Arc<dyn ConversionProgressCallback> = Arc::new(NoopProgressCallback);
        let progress = self.config.progress_callback.as_ref().unwrap_or(&noop);

        info!(
            "Converting {} (readiness budget {}ms, global limit {}s, {} backends)",
            url,
            budget.as_millis(),
            limit.as_secs(),
            self.registry.len()
        );
        progress.on_conversion_start(url.as_str(), self.registry.len());

        let mut trace = ChainTrace::default();
        let outcome = tokio::time::timeout(
            limit,
            run_chain(
                &self.registry,
                url,
                budget,
                self.config.min_artifact_bytes,
                progress.as_ref(),
                &mut trace,
            ),
        )
        .await;

        let accepted = match outcome {
            Ok(Some(accepted)) => accepted,
            Ok(None) => {
                warn!("All {} backends failed for {}", trace.attempts.len(), url);
                progress.on_conversion_complete(None);
                return Err(ConversionError::AllBackendsFailed {
                    attempts: trace.attempts,
                });
            }
            Err(_) => {
                warn!(
                    "Global timeout of {}s hit for {} (in flight: {:?})",
                    limit.as_secs(),
                    url,
                    trace.in_flight.as_ref().map(BackendId::as_str)
                );
                return Err(ConversionError::GlobalTimeout {
                    limit,
                    attempts: trace.attempts,
                    in_flight: trace.in_flight,
                });
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Converted {} with {} ({} bytes, {} fallbacks, {}ms)",
            url,
            accepted.backend_id,
            accepted.bytes.len(),
            trace.attempts.len().saturating_sub(1),
            duration_ms
        );
        progress.on_conversion_complete(Some(&accepted.backend_id));

        Ok(ConversionResult {
            size: accepted.bytes.len(),
            bytes: accepted.bytes,
            backend_used: accepted.backend_id,
            warnings: accepted.warnings,
            attempts: trace.attempts,
            duration_ms,
        })
    }

    /// Availability of every registered backend, in chain order.
    pub fn check_backends(&self) -> Vec<BackendStatus> {
        self.registry
            .iter()
            .map(|backend| {
                let descriptor = backend.descriptor();
                let (available, tool_path, detail) = match backend.check() {
                    Ok(path) => (true, path, None),
                    Err(e) => (false, None, Some(e.to_string())),
                };
                BackendStatus {
                    id: descriptor.id.clone(),
                    tool: descriptor.launch_profile.tool,
                    available,
                    tool_path,
                    supports_readiness_polling: descriptor.supports_readiness_polling,
                    detail,
                }
            })
            .collect()
    }
}

/// One line of a backend availability report.
#[derive(Debug, Clone, Serialize)]
pub struct BackendStatus {
    pub id: BackendId,
    pub tool: &'static str,
    pub available: bool,
    pub tool_path: Option<PathBuf>,
    pub supports_readiness_polling: bool,
    pub detail: Option<String>,
}

// ── One-shot helpers ─────────────────────────────────────────────────────

/// Convert a URL to PDF with the built-in backends.
///
/// # Example
/// ```rust,no_run
/// use edgequake_url2pdf::{convert, ConversionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let result = convert("https://example.com", &ConversionConfig::default()).await?;
/// println!("{} bytes from {}", result.size, result.backend_used);
/// # Ok(())
/// # }
/// ```
pub async fn convert(
    url: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionResult, ConversionError> {
    Converter::new(config.clone())?
        .convert_url(url.as_ref(), None)
        .await
}

/// Convert a URL and write the PDF to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn convert_to_file(
    url: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    config: &ConversionConfig,
) -> Result<ConversionResult, ConversionError> {
    let result = convert(url, config).await?;
    write_atomic(output_path.as_ref(), &result.bytes).await?;
    Ok(result)
}

/// Write `bytes` to `<path>.tmp`, then rename over `path`.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ConversionError> {
    let write_err = |source: std::io::Error| ConversionError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp_path = path.with_extension("pdf.tmp");
    tokio::fs::write(&tmp_path, bytes).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync(
    url: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionResult, ConversionError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ConversionError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(url, config))
}

/// Availability report for the backends `config` would use.
///
/// Does not launch anything; only resolves each backend's tool.
pub fn check_backends(config: &ConversionConfig) -> Result<Vec<BackendStatus>, ConversionError> {
    Ok(Converter::new(config.clone())?.check_backends())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn atomic_write_creates_parents_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/nested/invoice.pdf");
        write_atomic(&path, b"%PDF-1.7").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.7");
        assert!(!path.with_extension("pdf.tmp").exists());
    }

    #[tokio::test]
    async fn invalid_url_fails_before_anything_runs() {
        let err = convert("no scheme here", &ConversionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ConversionError::InvalidUrl { .. }), "got {err:?}");
        assert!(err.attempts().is_empty());
    }
}
