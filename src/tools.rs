//! Resolution of external renderer executables.
//!
//! Backends ask a [`BinaryResolver`] for their tool on every attempt instead
//! of caching a path at construction. A missing tool therefore surfaces as a
//! per-attempt [`crate::RenderError::BackendUnavailable`] and the chain moves
//! on, and installing the tool later makes the backend work without a restart.

use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

pub use tool_locate::{CHROME, WKHTMLTOPDF};

/// The tool could not be found or is not usable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{tool}: {reason}")]
pub struct ResolveError {
    pub tool: String,
    pub reason: String,
}

/// Finds the executable for a logical tool name ([`CHROME`], [`WKHTMLTOPDF`]).
pub trait BinaryResolver: Send + Sync {
    fn resolve(&self, tool: &str) -> Result<PathBuf, ResolveError>;
}

/// Explicit overrides first, then `tool-locate` discovery (env vars, `PATH`,
/// well-known install locations).
#[derive(Debug, Default, Clone)]
pub struct SystemResolver {
    overrides: HashMap<String, PathBuf>,
}

impl SystemResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin `tool` to `path`. The path is checked on every resolution.
    pub fn with_override(mut self, tool: &str, path: impl Into<PathBuf>) -> Self {
        self.overrides.insert(tool.to_string(), path.into());
        self
    }
}

impl BinaryResolver for SystemResolver {
    fn resolve(&self, tool: &str) -> Result<PathBuf, ResolveError> {
        if let Some(path) = self.overrides.get(tool) {
            if tool_locate::is_executable(path) {
                return Ok(path.clone());
            }
            return Err(ResolveError {
                tool: tool.to_string(),
                reason: format!("configured path {} is not an executable file", path.display()),
            });
        }
        tool_locate::locate(tool).map_err(|e| ResolveError {
            tool: tool.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Fixed tool table, mainly for tests and sandboxed deployments.
#[derive(Debug, Default, Clone)]
pub struct FixedResolver {
    tools: HashMap<String, PathBuf>,
}

impl FixedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tool: &str, path: impl Into<PathBuf>) -> Self {
        self.tools.insert(tool.to_string(), path.into());
        self
    }
}

impl BinaryResolver for FixedResolver {
    fn resolve(&self, tool: &str) -> Result<PathBuf, ResolveError> {
        self.tools.get(tool).cloned().ok_or_else(|| ResolveError {
            tool: tool.to_string(),
            reason: "not installed".to_string(),
        })
    }
}
