//! Configuration types for URL-to-PDF conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. One struct holds every knob so the
//! config can be shared across concurrent requests (it is `Clone` and the
//! only non-plain field is an `Arc`), logged, and diffed between runs.
//!
//! # Time budgets
//!
//! Three nested budgets bound every conversion:
//!
//! ```text
//! global_timeout ─────────────────────────────────────────────────────┐
//! │ backend 1: readiness wait + render_grace │ backend 2: … │ …       │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The per-backend hard limit is always strictly larger than the readiness
//! wait so the print/export step has time to finish after the page is ready.

use crate::error::ConversionError;
use crate::progress::ProgressCallback;
use crate::readiness::{ReadinessProbe, ReadinessStrategy, FIXED_DELAY_FLOOR};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a URL-to-PDF conversion.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_url2pdf::{BackendKind, ConversionConfig};
/// use std::time::Duration;
///
/// let config = ConversionConfig::builder()
///     .readiness_budget(Duration::from_secs(10))
///     .global_timeout(Duration::from_secs(90))
///     .backends(vec![BackendKind::HeadlessDirect, BackendKind::StaticHtml])
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Readiness budget used when a request does not specify one. Default: 25 s.
    pub readiness_budget: Duration,

    /// Upper clamp for caller-supplied readiness budgets. Default: 120 s.
    pub max_readiness_budget: Duration,

    /// Floor for fixed-delay waits, so a zero budget still waits. Default: 500 ms.
    pub min_fixed_delay: Duration,

    /// Interval between readiness probe evaluations. Default: 250 ms.
    pub poll_interval: Duration,

    /// Page predicates that must all hold before printing. Default: none,
    /// which selects the fixed-delay strategy.
    pub readiness_probes: Vec<ReadinessProbe>,

    /// Extra time each backend gets on top of its readiness wait. Default: 30 s.
    pub render_grace: Duration,

    /// Deadline for the entire conversion across all backends. Default: 180 s.
    pub global_timeout: Duration,

    /// How long to wait for a launched browser to expose DevTools. Default: 20 s.
    pub launch_timeout: Duration,

    /// Navigation timeout for the scripted session. Default: 60 s.
    pub page_load_timeout: Duration,

    /// HTTP GET timeout for the static converter. Default: 30 s.
    pub fetch_timeout: Duration,

    /// User-Agent sent by the static converter.
    pub user_agent: String,

    /// Paper, orientation and margins.
    pub print: PrintOptions,

    /// Output below this size is accepted with a warning. Default: 1024 bytes.
    pub min_artifact_bytes: usize,

    /// Fallback chain, highest fidelity first.
    pub backends: Vec<BackendKind>,

    /// Explicit Chromium/Chrome executable; skips discovery.
    pub chrome_path: Option<PathBuf>,

    /// Explicit wkhtmltopdf executable; skips discovery.
    pub wkhtmltopdf_path: Option<PathBuf>,

    /// Progress callback for per-attempt events.
    pub progress_callback: Option<ProgressCallback>,
}

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko)";

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            readiness_budget: Duration::from_secs(25),
            max_readiness_budget: Duration::from_secs(120),
            min_fixed_delay: Duration::from_millis(500),
            poll_interval: Duration::from_millis(250),
            readiness_probes: Vec::new(),
            render_grace: Duration::from_secs(30),
            global_timeout: Duration::from_secs(180),
            launch_timeout: Duration::from_secs(20),
            page_load_timeout: Duration::from_secs(60),
            fetch_timeout: Duration::from_secs(30),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            print: PrintOptions::default(),
            min_artifact_bytes: 1024,
            backends: BackendKind::default_chain(),
            chrome_path: None,
            wkhtmltopdf_path: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("readiness_budget", &self.readiness_budget)
            .field("max_readiness_budget", &self.max_readiness_budget)
            .field("min_fixed_delay", &self.min_fixed_delay)
            .field("poll_interval", &self.poll_interval)
            .field("readiness_probes", &self.readiness_probes)
            .field("render_grace", &self.render_grace)
            .field("global_timeout", &self.global_timeout)
            .field("launch_timeout", &self.launch_timeout)
            .field("page_load_timeout", &self.page_load_timeout)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("print", &self.print)
            .field("min_artifact_bytes", &self.min_artifact_bytes)
            .field("backends", &self.backends)
            .field("chrome_path", &self.chrome_path)
            .field("wkhtmltopdf_path", &self.wkhtmltopdf_path)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ConversionProgressCallback>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Readiness strategy implied by the configured probes.
    pub fn readiness_strategy(&self) -> ReadinessStrategy {
        if self.readiness_probes.is_empty() {
            ReadinessStrategy::FixedDelay {
                minimum: self.min_fixed_delay,
            }
        } else {
            ReadinessStrategy::Poll {
                probes: self.readiness_probes.clone(),
                interval: self.poll_interval,
            }
        }
    }

    /// Clamp a caller-supplied budget, or fall back to the default.
    pub fn effective_budget(&self, requested: Option<Duration>) -> Duration {
        requested
            .unwrap_or(self.readiness_budget)
            .min(self.max_readiness_budget)
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn readiness_budget(mut self, budget: Duration) -> Self {
        self.config.readiness_budget = budget;
        self
    }

    pub fn max_readiness_budget(mut self, budget: Duration) -> Self {
        self.config.max_readiness_budget = budget;
        self
    }

    pub fn min_fixed_delay(mut self, delay: Duration) -> Self {
        self.config.min_fixed_delay = delay.max(FIXED_DELAY_FLOOR);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn readiness_probe(mut self, probe: ReadinessProbe) -> Self {
        self.config.readiness_probes.push(probe);
        self
    }

    pub fn readiness_probes(mut self, probes: Vec<ReadinessProbe>) -> Self {
        self.config.readiness_probes = probes;
        self
    }

    pub fn render_grace(mut self, grace: Duration) -> Self {
        self.config.render_grace = grace;
        self
    }

    pub fn global_timeout(mut self, timeout: Duration) -> Self {
        self.config.global_timeout = timeout;
        self
    }

    pub fn launch_timeout(mut self, timeout: Duration) -> Self {
        self.config.launch_timeout = timeout;
        self
    }

    pub fn page_load_timeout(mut self, timeout: Duration) -> Self {
        self.config.page_load_timeout = timeout;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.config.fetch_timeout = timeout;
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn print(mut self, print: PrintOptions) -> Self {
        self.config.print = print;
        self
    }

    pub fn min_artifact_bytes(mut self, bytes: usize) -> Self {
        self.config.min_artifact_bytes = bytes;
        self
    }

    pub fn backends(mut self, backends: Vec<BackendKind>) -> Self {
        self.config.backends = backends;
        self
    }

    pub fn chrome_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.chrome_path = Some(path.into());
        self
    }

    pub fn wkhtmltopdf_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.wkhtmltopdf_path = Some(path.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, ConversionError> {
        let c = &self.config;
        if c.backends.is_empty() {
            return Err(ConversionError::InvalidConfig(
                "at least one backend is required".into(),
            ));
        }
        for (i, kind) in c.backends.iter().enumerate() {
            if c.backends[..i].contains(kind) {
                return Err(ConversionError::InvalidConfig(format!(
                    "backend '{}' listed twice",
                    kind.id()
                )));
            }
        }
        if c.global_timeout.is_zero() {
            return Err(ConversionError::InvalidConfig(
                "global timeout must be > 0".into(),
            ));
        }
        if c.render_grace.is_zero() {
            return Err(ConversionError::InvalidConfig(
                "render grace must be > 0".into(),
            ));
        }
        if c.poll_interval.is_zero() {
            return Err(ConversionError::InvalidConfig(
                "poll interval must be > 0".into(),
            ));
        }
        if !(0.0..=3.0).contains(&c.print.margin_inches) {
            return Err(ConversionError::InvalidConfig(format!(
                "margin must be 0–3 inches, got {}",
                c.print.margin_inches
            )));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// The built-in renderer backends, in their default priority order.
///
/// | Kind | JavaScript | Readiness | Cost |
/// |------|------------|-----------|------|
/// | `ScriptedSession` | yes | interactive polling | one browser + CDP connection |
/// | `HeadlessDirect`  | yes | fixed virtual-time budget | one browser process |
/// | `StaticHtml`      | no  | none (initial HTML only) | one HTTP GET + wkhtmltopdf |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    ScriptedSession,
    HeadlessDirect,
    StaticHtml,
}

impl BackendKind {
    pub fn default_chain() -> Vec<BackendKind> {
        vec![
            BackendKind::ScriptedSession,
            BackendKind::HeadlessDirect,
            BackendKind::StaticHtml,
        ]
    }

    /// Registry identifier of the backend.
    pub fn id(self) -> &'static str {
        match self {
            BackendKind::ScriptedSession => "scripted-browser-session",
            BackendKind::HeadlessDirect => "headless-browser-direct",
            BackendKind::StaticHtml => "static-html-converter",
        }
    }

    /// Parse a full id or a short alias (`session`, `headless`, `static`).
    pub fn parse(s: &str) -> Option<BackendKind> {
        match s.trim().to_lowercase().as_str() {
            "session" | "scripted" | "scripted-browser-session" => {
                Some(BackendKind::ScriptedSession)
            }
            "headless" | "direct" | "headless-browser-direct" => Some(BackendKind::HeadlessDirect),
            "static" | "html" | "static-html-converter" => Some(BackendKind::StaticHtml),
            _ => None,
        }
    }
}

/// Paper size for the printed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PaperSize {
    #[default]
    A4,
    Letter,
}

impl PaperSize {
    /// (width, height) in inches, portrait.
    pub fn inches(self) -> (f64, f64) {
        match self {
            PaperSize::A4 => (8.27, 11.69),
            PaperSize::Letter => (8.5, 11.0),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PaperSize::A4 => "A4",
            PaperSize::Letter => "Letter",
        }
    }
}

/// Print layout shared by all backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintOptions {
    pub paper: PaperSize,
    pub landscape: bool,
    /// Uniform margin on all four sides. Default: 0.4 in.
    pub margin_inches: f64,
    pub print_background: bool,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            paper: PaperSize::A4,
            landscape: false,
            margin_inches: 0.4,
            print_background: true,
        }
    }
}

impl PrintOptions {
    pub fn margin_mm(&self) -> f64 {
        self.margin_inches * 25.4
    }
}
