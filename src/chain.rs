//! Sequential fallback over the registry.
//!
//! Backends run strictly one at a time in registry order. The next backend
//! starts only after the previous attempt's outcome (including validation of
//! its bytes) is known. Each backend gets exactly one try per conversion.
//!
//! Progress is written into a caller-owned [`ChainTrace`] as it happens, so
//! when the orchestrator's global deadline cancels the chain mid-attempt the
//! history so far and the in-flight backend are still available.

use crate::artifact::{self, ArtifactWarning};
use crate::error::RenderError;
use crate::output::{AttemptOutcome, BackendId, RenderAttempt};
use crate::progress::ConversionProgressCallback;
use crate::registry::BackendRegistry;
use std::time::{Duration, Instant, SystemTime};
use tracing::{info, warn};
use url::Url;

/// Attempt history of one chain run.
#[derive(Debug, Default)]
pub(crate) struct ChainTrace {
    pub attempts: Vec<RenderAttempt>,
    /// Backend currently rendering, if any.
    pub in_flight: Option<BackendId>,
}

/// Bytes accepted by the validator, with their origin.
#[derive(Debug)]
pub(crate) struct Accepted {
    pub bytes: Vec<u8>,
    pub backend_id: BackendId,
    pub warnings: Vec<ArtifactWarning>,
}

/// Walk the registry until one backend yields a valid PDF.
///
/// Returns `None` when every backend failed; the reasons are in `trace`.
pub(crate) async fn run_chain(
    registry: &BackendRegistry,
    url: &Url,
    budget: Duration,
    min_artifact_bytes: usize,
    progress: &dyn ConversionProgressCallback,
    trace: &mut ChainTrace,
) -> Option<Accepted> {
    let total = registry.len();

    for (index, backend) in registry.iter().enumerate() {
        let id = backend.id().clone();
        info!("Attempt {}/{}: {}", index + 1, total, id);
        progress.on_attempt_start(&id, index + 1, total);

        trace.in_flight = Some(id.clone());
        let started_at = SystemTime::now();
        let start = Instant::now();

        let result = backend
            .render(url, budget)
            .await
            .and_then(|bytes| match artifact::validate(&bytes, min_artifact_bytes) {
                Ok(warnings) => Ok((bytes, warnings)),
                Err(e) => Err(RenderError::InvalidArtifact {
                    reason: e.to_string(),
                }),
            });

        trace.in_flight = None;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok((bytes, warnings)) => {
                for w in &warnings {
                    warn!("{}: {}", id, w);
                }
                info!("{} succeeded: {} bytes in {}ms", id, bytes.len(), duration_ms);
                trace.attempts.push(RenderAttempt {
                    backend_id: id.clone(),
                    started_at,
                    duration_ms,
                    outcome: AttemptOutcome::Success { size: bytes.len() },
                });
                progress.on_attempt_success(&id, bytes.len());
                return Some(Accepted {
                    bytes,
                    backend_id: id,
                    warnings,
                });
            }
            Err(e) => {
                warn!("{} failed after {}ms: {}", id, duration_ms, e);
                trace.attempts.push(RenderAttempt {
                    backend_id: id.clone(),
                    started_at,
                    duration_ms,
                    outcome: AttemptOutcome::from_error(&e),
                });
                progress.on_attempt_failed(&id, &e.to_string());
            }
        }
    }

    None
}
