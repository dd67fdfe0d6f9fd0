//! Plain HTTP GET + wkhtmltopdf, with JavaScript disabled.
//!
//! The last resort: it needs no browser and survives hosts where Chromium
//! cannot start at all. It only sees the initial HTML, so anything a page
//! renders client-side is missing from the output. Readiness budgets are
//! ignored.

use super::{scratch_dir, BackendDescriptor, RendererBackend, Toolbox};
use crate::config::{ConversionConfig, PrintOptions};
use crate::error::{ConversionError, RenderError};
use crate::output::BackendId;
use crate::process::ProcessSpec;
use crate::profiles;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

pub const ID: BackendId = BackendId::from_static("static-html-converter");

#[derive(Debug)]
pub struct StaticHtmlBackend {
    descriptor: BackendDescriptor,
    tools: Toolbox,
    http: reqwest::Client,
    fetch_timeout: Duration,
    print: PrintOptions,
    grace: Duration,
}

impl StaticHtmlBackend {
    pub fn new(tools: Toolbox, config: &ConversionConfig) -> Result<Self, ConversionError> {
        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.fetch_timeout)
            .build()
            .map_err(|e| ConversionError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            descriptor: BackendDescriptor {
                id: ID,
                launch_profile: profiles::static_html(),
                supports_readiness_polling: false,
            },
            tools,
            http,
            fetch_timeout: config.fetch_timeout,
            print: config.print.clone(),
            grace: config.render_grace,
        })
    }

    async fn fetch(&self, url: &Url) -> Result<String, RenderError> {
        if url.scheme() == "file" {
            let path = url
                .to_file_path()
                .map_err(|_| RenderError::failed(format!("not a local path: {url}")))?;
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| RenderError::failed(format!("cannot read {}: {e}", path.display())))?;
            return Ok(match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(e) => {
                    warn!("{}: {} is not UTF-8, decoding lossily", ID, path.display());
                    String::from_utf8_lossy(e.as_bytes()).into_owned()
                }
            });
        }

        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| self.http_error(e))?;
        response.text().await.map_err(|e| self.http_error(e))
    }

    fn http_error(&self, e: reqwest::Error) -> RenderError {
        if e.is_timeout() {
            RenderError::Timeout {
                limit: self.fetch_timeout,
            }
        } else {
            RenderError::failed(format!("fetch failed: {e}"))
        }
    }
}

#[async_trait]
impl RendererBackend for StaticHtmlBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn check(&self) -> Result<Option<PathBuf>, RenderError> {
        self.tools.resolve(self.descriptor.launch_profile.tool).map(Some)
    }

    async fn render(&self, url: &Url, budget: Duration) -> Result<Vec<u8>, RenderError> {
        // Resolve first: no point fetching for a converter that is not there.
        let converter = self.tools.resolve(self.descriptor.launch_profile.tool)?;

        let html = self.fetch(url).await?;
        debug!("{}: fetched {} bytes of HTML", ID, html.len());
        let html = prepare_markup(&html, url, &self.print);

        let workdir = scratch_dir()?;
        let html_path = workdir.path().join("page.html");
        tokio::fs::write(&html_path, html.as_bytes())
            .await
            .map_err(|e| RenderError::failed(format!("cannot write markup: {e}")))?;

        let spec = ProcessSpec::new(converter)
            .args(&self.descriptor.launch_profile.args)
            .args(profiles::wkhtmltopdf_layout_args(&self.print))
            .arg(&html_path)
            .arg("-")
            .current_dir(workdir.path())
            .timeout(budget + self.grace);

        let output = self.tools.runner.run(&spec).await?;
        if !output.success() {
            return Err(RenderError::failed(format!(
                "wkhtmltopdf exited with {}: {}",
                output.status,
                output.stderr_tail()
            )));
        }
        if output.stdout.is_empty() {
            return Err(RenderError::failed("wkhtmltopdf produced no output"));
        }

        info!("{}: rendered {} bytes", ID, output.stdout.len());
        Ok(output.stdout)
    }
}

/// Print stylesheet, plus a `<base>` so relative assets resolve against the
/// original URL instead of the temp file.
fn prepare_markup(html: &str, url: &Url, print: &PrintOptions) -> String {
    let mut head = String::new();
    let has_base = html.to_ascii_lowercase().contains("<base ");
    if !has_base {
        head.push_str(&format!("<base href=\"{}\">\n", url.as_str().replace('"', "%22")));
    }
    head.push_str(&profiles::print_css(print));
    profiles::inject_css(html, &head)
}
