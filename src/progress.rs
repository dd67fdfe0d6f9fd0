//! Progress-callback trait for per-attempt conversion events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to be told
//! which backend is running and how each attempt ended, while the fallback
//! chain is still working.
//!
//! # Why callbacks instead of channels?
//!
//! Callers can forward events to a broadcast channel, a job-status record, or
//! a terminal spinner without the library knowing how the host application
//! communicates. Attempts within one call are strictly sequential, but one
//! callback may be shared by concurrent conversions, so the trait is
//! `Send + Sync`.
//!
//! # Example
//!
//! ```rust
//! use edgequake_url2pdf::{BackendId, ConversionConfig, ConversionProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct FailureCounter {
//!     failures: AtomicUsize,
//! }
//!
//! impl ConversionProgressCallback for FailureCounter {
//!     fn on_attempt_failed(&self, backend: &BackendId, error: &str) {
//!         self.failures.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{backend} failed: {error}");
//!     }
//! }
//!
//! let counter = Arc::new(FailureCounter { failures: AtomicUsize::new(0) });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::output::BackendId;
use std::sync::Arc;

/// Called by the fallback chain around every backend attempt.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait ConversionProgressCallback: Send + Sync {
    /// Called once per conversion, after the URL was accepted.
    ///
    /// # Arguments
    /// * `url`           — normalised target URL
    /// * `backend_count` — number of backends in the chain
    fn on_conversion_start(&self, url: &str, backend_count: usize) {
        let _ = (url, backend_count);
    }

    /// Called just before a backend is invoked.
    ///
    /// # Arguments
    /// * `backend` — id of the backend about to run
    /// * `index`   — 1-indexed position in the chain
    /// * `total`   — chain length
    fn on_attempt_start(&self, backend: &BackendId, index: usize, total: usize) {
        let _ = (backend, index, total);
    }

    /// Called when a backend produced a PDF that passed validation.
    fn on_attempt_success(&self, backend: &BackendId, size_bytes: usize) {
        let _ = (backend, size_bytes);
    }

    /// Called when an attempt failed; the chain continues with the next backend.
    fn on_attempt_failed(&self, backend: &BackendId, error: &str) {
        let _ = (backend, error);
    }

    /// Called once when the chain finishes, with the winning backend if any.
    /// Not called when the global timeout cancels the chain.
    fn on_conversion_complete(&self, backend_used: Option<&BackendId>) {
        let _ = backend_used;
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;
