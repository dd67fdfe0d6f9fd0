//! Readiness detection: decide when a dynamic page is worth printing.
//!
//! Single-page apps render their content after the `load` event: invoices
//! are filled from XHR responses, tables are populated by a framework, and a
//! "Loading…" placeholder sits in the DOM until then. Printing too early
//! yields a PDF of the placeholder.
//!
//! ## Two strategies, one type
//!
//! [`ReadinessStrategy::FixedDelay`] waits a fixed time and reports
//! [`ReadinessOutcome::Elapsed`]: a pure delay carries no readiness signal,
//! and the type says so instead of pretending the page is ready.
//! [`ReadinessStrategy::Poll`] evaluates [`ReadinessProbe`]s against the live
//! page and reports [`ReadinessOutcome::Ready`] only when all of them hold.
//!
//! Running out of budget is **not** an error. Callers proceed to print
//! whatever the page shows; partial content beats no PDF.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep, timeout, Instant};
use tracing::debug;

/// Shortest wait a fixed delay ever performs, whatever the configuration.
pub const FIXED_DELAY_FLOOR: Duration = Duration::from_millis(100);

/// Result of waiting for a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessOutcome {
    /// Every probe held before the budget ran out.
    Ready,
    /// The budget was spent (always the case for a fixed delay).
    Elapsed,
}

/// How a backend waits before printing.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadinessStrategy {
    /// Sleep for the budget, but never less than `minimum`.
    FixedDelay { minimum: Duration },
    /// Re-evaluate all probes every `interval` until they hold or the budget ends.
    Poll {
        probes: Vec<ReadinessProbe>,
        interval: Duration,
    },
}

impl ReadinessStrategy {
    /// The wait a fixed delay actually performs for `budget`.
    ///
    /// Also used by backends that can only pass a time budget to the browser
    /// up front. Polling strategies wait at most `budget`.
    pub fn effective_wait(&self, budget: Duration) -> Duration {
        match self {
            ReadinessStrategy::FixedDelay { minimum } => {
                budget.max(*minimum).max(FIXED_DELAY_FLOOR)
            }
            ReadinessStrategy::Poll { .. } => budget,
        }
    }
}

/// A boolean predicate over the rendered page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "probe", content = "value", rename_all = "snake_case")]
pub enum ReadinessProbe {
    /// The body text no longer contains this marker (e.g. `"Loading..."`).
    MarkerAbsent(String),
    /// An element matching this CSS selector exists.
    ElementPresent(String),
    /// More than `min` elements matching `selector` have non-blank text.
    PopulatedCells { selector: String, min: usize },
    /// A raw JavaScript expression that evaluates to a boolean.
    Script(String),
}

impl ReadinessProbe {
    /// JavaScript expression evaluating to `true` when the probe holds.
    pub fn expression(&self) -> String {
        match self {
            ReadinessProbe::MarkerAbsent(marker) => format!(
                "document.body !== null && !document.body.innerText.includes({})",
                js_string(marker)
            ),
            ReadinessProbe::ElementPresent(selector) => {
                format!("document.querySelector({}) !== null", js_string(selector))
            }
            ReadinessProbe::PopulatedCells { selector, min } => format!(
                "Array.from(document.querySelectorAll({})).filter(e => e.textContent.trim().length > 0).length > {}",
                js_string(selector),
                min
            ),
            ReadinessProbe::Script(expr) => format!("Boolean({expr})"),
        }
    }
}

impl std::fmt::Display for ReadinessProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadinessProbe::MarkerAbsent(m) => write!(f, "marker {m:?} absent"),
            ReadinessProbe::ElementPresent(s) => write!(f, "element {s:?} present"),
            ReadinessProbe::PopulatedCells { selector, min } => {
                write!(f, "more than {min} populated {selector:?}")
            }
            ReadinessProbe::Script(_) => f.write_str("custom script"),
        }
    }
}

/// A probe evaluation that could not produce a boolean.
#[derive(Debug, Clone, Error)]
#[error("probe evaluation failed: {0}")]
pub struct ProbeError(pub String);

/// A live page that can evaluate JavaScript expressions.
#[async_trait]
pub trait PageProbe: Send + Sync {
    async fn evaluate(&self, expression: &str) -> Result<bool, ProbeError>;
}

/// Wait until `page` is ready according to `strategy`, spending at most
/// `budget` (or the fixed-delay floor, whichever is larger).
pub async fn wait_for_ready(
    page: &dyn PageProbe,
    strategy: &ReadinessStrategy,
    budget: Duration,
) -> ReadinessOutcome {
    match strategy {
        ReadinessStrategy::FixedDelay { .. } => {
            let wait = strategy.effective_wait(budget);
            debug!("Fixed readiness delay of {}ms", wait.as_millis());
            sleep(wait).await;
            ReadinessOutcome::Elapsed
        }
        ReadinessStrategy::Poll { probes, interval } => {
            poll_until_ready(page, probes, *interval, budget).await
        }
    }
}

async fn poll_until_ready(
    page: &dyn PageProbe,
    probes: &[ReadinessProbe],
    interval: Duration,
    budget: Duration,
) -> ReadinessOutcome {
    let deadline = Instant::now() + budget;
    let mut rounds = 0u32;

    loop {
        rounds += 1;
        if all_hold(page, probes, deadline).await {
            debug!("Page ready after {} probe round(s)", rounds);
            return ReadinessOutcome::Ready;
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            debug!("Readiness budget spent after {} probe round(s)", rounds);
            return ReadinessOutcome::Elapsed;
        }
        sleep(interval.min(remaining)).await;
    }
}

/// `true` only if every probe evaluates to `true` before `deadline`.
/// Errors and slow evaluations count as "not yet".
async fn all_hold(page: &dyn PageProbe, probes: &[ReadinessProbe], deadline: Instant) -> bool {
    for probe in probes {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let expr = probe.expression();
        match timeout(remaining, page.evaluate(&expr)).await {
            Ok(Ok(true)) => continue,
            Ok(Ok(false)) => {
                debug!("Probe not satisfied: {}", probe);
                return false;
            }
            Ok(Err(e)) => {
                debug!("Probe '{}' errored, treating as not ready: {}", probe, e);
                return false;
            }
            Err(_) => return false,
        }
    }
    true
}

/// Encode `s` as a JavaScript string literal.
fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}
