//! # tool-locate
//!
//! Find the external executables that `edgequake-url2pdf` drives
//! (Chromium/Chrome and wkhtmltopdf) and remember where they are, so that
//! callers never hardcode installation paths.
//!
//! ## How it works
//!
//! On first call to [`locate`] for a tool:
//!
//! 1. Checks the tool's environment override (e.g. `URL2PDF_CHROME_PATH`).
//! 2. Looks up each known binary name on `PATH` (`chromium`, `google-chrome`, …).
//! 3. Probes well-known absolute install locations (distro packages, nix
//!    profiles, the macOS app bundle).
//!
//! The first candidate that exists and is executable wins and is cached for
//! the lifetime of the process. Subsequent calls skip the filesystem entirely.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tool_locate::{locate, CHROME};
//!
//! let chrome = locate(CHROME).expect("chromium is installed");
//! println!("using {}", chrome.display());
//! ```
//!
//! ## Environment variable overrides
//!
//! - `URL2PDF_CHROME_PATH` — path to a Chromium/Chrome executable.
//! - `URL2PDF_WKHTMLTOPDF_PATH` — path to a wkhtmltopdf executable.
//!
//! An override that does not point to an executable file is skipped and the
//! regular search continues.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use thiserror::Error;

// ── Public constants ─────────────────────────────────────────────────────────

/// Logical name for a Chromium-family browser.
pub const CHROME: &str = "chrome";

/// Logical name for the wkhtmltopdf converter.
pub const WKHTMLTOPDF: &str = "wkhtmltopdf";

const CHROME_ENV: &str = "URL2PDF_CHROME_PATH";
const WKHTMLTOPDF_ENV: &str = "URL2PDF_WKHTMLTOPDF_PATH";

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by tool-locate operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocateError {
    /// No candidate location held an executable for the tool.
    #[error("'{tool}' not found (searched: {})", searched.join(", "))]
    NotFound { tool: String, searched: Vec<String> },
}

// ── Candidates ───────────────────────────────────────────────────────────────

/// One place where a tool may live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    /// Path taken from an environment variable.
    Env(&'static str),
    /// Bare binary name resolved through `PATH`.
    OnPath(String),
    /// Fixed absolute location.
    Absolute(PathBuf),
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Candidate::Env(var) => write!(f, "${var}"),
            Candidate::OnPath(name) => write!(f, "{name}"),
            Candidate::Absolute(path) => write!(f, "{}", path.display()),
        }
    }
}

/// Returns the ordered search list for `tool`.
///
/// Unknown tool names are searched on `PATH` only.
pub fn candidates(tool: &str) -> Vec<Candidate> {
    match tool {
        CHROME => {
            let mut list = vec![Candidate::Env(CHROME_ENV)];
            list.extend(
                ["chromium", "chromium-browser", "google-chrome", "google-chrome-stable"]
                    .iter()
                    .map(|n| Candidate::OnPath((*n).to_string())),
            );
            list.extend(
                [
                    "/usr/bin/chromium",
                    "/usr/bin/chromium-browser",
                    "/usr/bin/google-chrome",
                    "/usr/bin/google-chrome-stable",
                    "/root/.nix-profile/bin/chromium",
                    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                ]
                .iter()
                .map(|p| Candidate::Absolute(PathBuf::from(p))),
            );
            if let Some(home) = dirs::home_dir() {
                list.push(Candidate::Absolute(home.join(".nix-profile/bin/chromium")));
            }
            list
        }
        WKHTMLTOPDF => vec![
            Candidate::Env(WKHTMLTOPDF_ENV),
            Candidate::OnPath("wkhtmltopdf".to_string()),
            Candidate::Absolute(PathBuf::from("/usr/local/bin/wkhtmltopdf")),
            Candidate::Absolute(PathBuf::from("/usr/bin/wkhtmltopdf")),
        ],
        other => vec![Candidate::OnPath(other.to_string())],
    }
}

// ── Thread-safe resolution cache ─────────────────────────────────────────────

static RESOLVED: OnceLock<Mutex<HashMap<String, PathBuf>>> = OnceLock::new();

fn cache() -> &'static Mutex<HashMap<String, PathBuf>> {
    RESOLVED.get_or_init(|| Mutex::new(HashMap::new()))
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Resolves `tool` to an executable path, caching the first success.
///
/// # Thread safety
///
/// Safe to call from many threads at once. Concurrent first resolutions may
/// each search the filesystem, but only the first one to finish is stored and
/// every caller gets that stored path back.
pub fn locate(tool: &str) -> Result<PathBuf, LocateError> {
    if let Some(path) = cached_path(tool) {
        return Ok(path);
    }

    let found = locate_uncached(tool)?;

    let mut guard = cache().lock().unwrap_or_else(|e| e.into_inner());
    Ok(guard.entry(tool.to_string()).or_insert(found).clone())
}

/// Returns the cached path for `tool`, if it has been resolved before.
pub fn cached_path(tool: &str) -> Option<PathBuf> {
    cache()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .get(tool)
        .cloned()
}

/// Searches for `tool` without reading or writing the cache.
pub fn locate_uncached(tool: &str) -> Result<PathBuf, LocateError> {
    let list = candidates(tool);
    for candidate in &list {
        if let Some(path) = probe(candidate) {
            return Ok(path);
        }
    }
    Err(LocateError::NotFound {
        tool: tool.to_string(),
        searched: list.iter().map(|c| c.to_string()).collect(),
    })
}

/// Returns `true` if `path` is a regular file with an executable bit set.
pub fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────────

fn probe(candidate: &Candidate) -> Option<PathBuf> {
    match candidate {
        Candidate::Env(var) => {
            let value = std::env::var_os(var)?;
            let path = PathBuf::from(value);
            is_executable(&path).then_some(path)
        }
        Candidate::OnPath(name) => which::which(name).ok(),
        Candidate::Absolute(path) => is_executable(path).then(|| path.clone()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
