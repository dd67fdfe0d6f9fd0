//! # edgequake-url2pdf
//!
//! Convert web pages to PDF by orchestrating external headless renderers,
//! falling back from one to the next until a valid PDF comes out.
//!
//! ## Why this crate?
//!
//! Generating the PDF is the easy part: Chromium and wkhtmltopdf both do it.
//! The hard part is running them reliably on a server. Browsers fail to
//! start in containers, hang on pages that never stop loading, print a
//! "Loading…" placeholder because the page's data arrived a second too late,
//! or exit 0 after writing nothing. This crate wraps those tools with
//! readiness detection, hard time limits, output validation, process cleanup
//! and an ordered fallback chain, and reports exactly what was tried when
//! everything fails.
//!
//! ## Pipeline Overview
//!
//! ```text
//! URL
//!  │
//!  ├─ 1. Admit     parse URL (http, https, file, absolute path)
//!  ├─ 2. Chain     for each backend, strictly in order:
//!  │     ├─ scripted-browser-session  Chromium + DevTools, readiness polling
//!  │     ├─ headless-browser-direct   chromium --print-to-pdf, virtual time
//!  │     └─ static-html-converter     HTTP GET + wkhtmltopdf (no JavaScript)
//!  ├─ 3. Validate  %PDF- header, size / trailer warnings
//!  └─ 4. Result    bytes + backend used + full attempt history
//! ```
//!
//! The whole chain runs under one global deadline; when it fires, the
//! in-flight renderer process is killed.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_url2pdf::{ConversionConfig, Converter, ReadinessProbe};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConversionConfig::builder()
//!         .readiness_probe(ReadinessProbe::MarkerAbsent("Loading...".into()))
//!         .build()?;
//!     let converter = Converter::new(config)?;
//!     let result = converter
//!         .convert_url("https://example.com/invoice/42", Some(Duration::from_secs(10)))
//!         .await?;
//!     std::fs::write("invoice.pdf", &result.bytes)?;
//!     eprintln!("{} bytes via {}", result.size, result.backend_used);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `url2pdf` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! edgequake-url2pdf = { version = "0.1", default-features = false }
//! ```
//!
//! ## External tools
//!
//! | Backend | Needs |
//! |---------|-------|
//! | `scripted-browser-session`, `headless-browser-direct` | Chromium / Chrome (`URL2PDF_CHROME_PATH` to override) |
//! | `static-html-converter` | `wkhtmltopdf` (`URL2PDF_WKHTMLTOPDF_PATH` to override) |
//!
//! A missing tool only disables its backends; see [`check_backends`].

// ── Modules ──────────────────────────────────────────────────────────────

pub mod artifact;
pub mod backend;
mod chain;
pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod process;
pub mod profiles;
pub mod progress;
pub mod readiness;
pub mod registry;
pub mod request;
pub mod tools;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use artifact::{ArtifactError, ArtifactWarning};
pub use backend::{BackendDescriptor, RendererBackend, Toolbox};
pub use config::{
    BackendKind, ConversionConfig, ConversionConfigBuilder, PaperSize, PrintOptions,
};
pub use convert::{
    check_backends, convert, convert_sync, convert_to_file, BackendStatus, Converter,
};
pub use error::{ConversionError, FailureKind, RenderError};
pub use output::{AttemptOutcome, BackendId, ConversionResult, RenderAttempt};
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use readiness::{ReadinessOutcome, ReadinessProbe, ReadinessStrategy};
pub use registry::BackendRegistry;
pub use request::ConversionRequest;
