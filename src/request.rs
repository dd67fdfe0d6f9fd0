//! Conversion requests and URL admission.

use crate::error::ConversionError;
use std::path::Path;
use std::time::Duration;
use url::Url;

/// URL schemes a request may use.
pub const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "file"];

/// One conversion: what to render and how long to wait for it.
///
/// Requests are validated on construction, so holding one means the URL is
/// absolute and uses a supported scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    url: Url,
    readiness_budget: Option<Duration>,
}

impl ConversionRequest {
    /// Parse `input` as an absolute URL, or as an absolute local path.
    ///
    /// # Errors
    /// [`ConversionError::InvalidUrl`] for empty, relative, malformed or
    /// unsupported-scheme input.
    pub fn parse(input: &str) -> Result<Self, ConversionError> {
        let trimmed = input.trim();
        let invalid = |reason: &str| ConversionError::InvalidUrl {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        if trimmed.is_empty() {
            return Err(invalid("empty URL"));
        }

        if Path::new(trimmed).is_absolute() {
            let url = Url::from_file_path(trimmed)
                .map_err(|_| invalid("cannot convert path to a file URL"))?;
            return Ok(Self::from_url_unchecked(url));
        }

        let url = Url::parse(trimmed).map_err(|e| invalid(&e.to_string()))?;
        Self::new(url).map_err(|e| match e {
            ConversionError::InvalidUrl { reason, .. } => invalid(&reason),
            other => other,
        })
    }

    /// Wrap an already-parsed URL, checking its scheme and host.
    pub fn new(url: Url) -> Result<Self, ConversionError> {
        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(ConversionError::InvalidUrl {
                input: url.to_string(),
                reason: format!(
                    "unsupported scheme '{}' (expected one of: {})",
                    url.scheme(),
                    SUPPORTED_SCHEMES.join(", ")
                ),
            });
        }
        if url.scheme() != "file" && url.host_str().map_or(true, str::is_empty) {
            return Err(ConversionError::InvalidUrl {
                input: url.to_string(),
                reason: "missing host".into(),
            });
        }
        Ok(Self::from_url_unchecked(url))
    }

    fn from_url_unchecked(url: Url) -> Self {
        Self {
            url,
            readiness_budget: None,
        }
    }

    /// Override the configured readiness budget for this request.
    pub fn with_readiness_budget(mut self, budget: Duration) -> Self {
        self.readiness_budget = Some(budget);
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn readiness_budget(&self) -> Option<Duration> {
        self.readiness_budget
    }
}
