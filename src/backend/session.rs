//! Chromium driven over the DevTools protocol.
//!
//! The only backend that can ask the page whether it is ready: it navigates,
//! polls the configured [`ReadinessProbe`](crate::readiness::ReadinessProbe)s
//! through `Runtime.evaluate`, then prints with `Page.printToPDF`.
//!
//! ## Process ownership
//!
//! The browser is launched through the [`ProcessRunner`](crate::process::ProcessRunner),
//! not by chromiumoxide, so its lifetime is tied to a
//! [`SpawnedProcess`](crate::process::SpawnedProcess) guard owned by this
//! call. Every exit path (success, error, timeout, or the caller dropping
//! the future) ends with the browser's whole process group killed. The CDP
//! handler and the stderr drain run as tasks that are aborted with the
//! guard.

use super::{scratch_dir, BackendDescriptor, RendererBackend, Toolbox};
use crate::config::{ConversionConfig, PrintOptions};
use crate::error::RenderError;
use crate::output::BackendId;
use crate::process::ProcessSpec;
use crate::profiles;
use crate::readiness::{wait_for_ready, PageProbe, ProbeError, ReadinessOutcome, ReadinessStrategy};
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::PrintToPdfParams;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::ChildStderr;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use url::Url;

pub const ID: BackendId = BackendId::from_static("scripted-browser-session");

#[derive(Debug)]
pub struct ScriptedSessionBackend {
    descriptor: BackendDescriptor,
    tools: Toolbox,
    strategy: ReadinessStrategy,
    print: PrintOptions,
    launch_timeout: Duration,
    page_load_timeout: Duration,
    grace: Duration,
}

impl ScriptedSessionBackend {
    pub fn new(tools: Toolbox, config: &ConversionConfig) -> Self {
        Self {
            descriptor: BackendDescriptor {
                id: ID,
                launch_profile: profiles::scripted_session(),
                supports_readiness_polling: true,
            },
            tools,
            strategy: config.readiness_strategy(),
            print: config.print.clone(),
            launch_timeout: config.launch_timeout,
            page_load_timeout: config.page_load_timeout,
            grace: config.render_grace,
        }
    }

    /// Launch + navigation + readiness + grace for the print itself.
    fn hard_limit(&self, budget: Duration) -> Duration {
        self.launch_timeout
            + self.page_load_timeout
            + self.strategy.effective_wait(budget)
            + self.grace
    }

    fn print_params(&self) -> PrintToPdfParams {
        let (width, height) = self.print.paper.inches();
        let margin = self.print.margin_inches;
        PrintToPdfParams {
            landscape: Some(self.print.landscape),
            display_header_footer: Some(false),
            print_background: Some(self.print.print_background),
            prefer_css_page_size: Some(true),
            paper_width: Some(width),
            paper_height: Some(height),
            margin_top: Some(margin),
            margin_bottom: Some(margin),
            margin_left: Some(margin),
            margin_right: Some(margin),
            ..Default::default()
        }
    }

    /// Everything that happens while the browser process is alive.
    async fn drive(
        &self,
        stderr: ChildStderr,
        url: &Url,
        budget: Duration,
    ) -> Result<Vec<u8>, RenderError> {
        let (ws_url, rest) = timeout(self.launch_timeout, devtools_url(stderr))
            .await
            .map_err(|_| {
                RenderError::failed(format!(
                    "browser did not expose DevTools within {}ms",
                    self.launch_timeout.as_millis()
                ))
            })??;
        debug!("{}: DevTools at {}", ID, ws_url);

        // Chrome blocks once its stderr pipe fills up; keep reading it.
        let _drain = TaskGuard(tokio::spawn(drain(rest)));

        let (mut browser, mut handler) = Browser::connect(ws_url)
            .await
            .map_err(|e| RenderError::failed(format!("cannot connect to DevTools: {e}")))?;
        let _handler = TaskGuard(tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        }));

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::failed(format!("cannot open tab: {e}")))?;

        let result = self.print_page(&page, url, budget).await;

        if let Err(e) = page.close().await {
            debug!("{}: closing tab failed: {}", ID, e);
        }
        if let Err(e) = browser.close().await {
            debug!("{}: closing browser failed: {}", ID, e);
        }
        result
    }

    async fn print_page(
        &self,
        page: &Page,
        url: &Url,
        budget: Duration,
    ) -> Result<Vec<u8>, RenderError> {
        match timeout(self.page_load_timeout, page.goto(url.as_str())).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(RenderError::failed(format!("navigation failed: {e}"))),
            Err(_) => {
                return Err(RenderError::Timeout {
                    limit: self.page_load_timeout,
                })
            }
        }

        let outcome = wait_for_ready(&CdpPage(page), &self.strategy, budget).await;
        match outcome {
            ReadinessOutcome::Ready => info!("{}: page reported ready", ID),
            ReadinessOutcome::Elapsed => {
                info!("{}: readiness budget elapsed, printing current state", ID)
            }
        }

        page.pdf(self.print_params())
            .await
            .map_err(|e| RenderError::failed(format!("Page.printToPDF failed: {e}")))
    }
}

#[async_trait]
impl RendererBackend for ScriptedSessionBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn check(&self) -> Result<Option<PathBuf>, RenderError> {
        self.tools.resolve(self.descriptor.launch_profile.tool).map(Some)
    }

    async fn render(&self, url: &Url, budget: Duration) -> Result<Vec<u8>, RenderError> {
        let chrome = self.tools.resolve(self.descriptor.launch_profile.tool)?;
        let limit = self.hard_limit(budget);

        let workdir = scratch_dir()?;
        let spec = ProcessSpec::new(chrome)
            .args(&self.descriptor.launch_profile.args)
            .arg(format!(
                "--user-data-dir={}",
                workdir.path().join("profile").display()
            ))
            .arg("about:blank")
            .env("XDG_RUNTIME_DIR", workdir.path())
            .current_dir(workdir.path())
            .timeout(limit);

        let mut process = self.tools.runner.spawn(&spec).await?;
        let stderr = process
            .take_stderr()
            .ok_or_else(|| RenderError::failed("browser stderr was not captured"))?;

        let result = match timeout(limit, self.drive(stderr, url, budget)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{}: exceeded {}ms, killing browser", ID, limit.as_millis());
                Err(RenderError::Timeout { limit })
            }
        };
        process.terminate().await;

        if let Ok(bytes) = &result {
            info!("{}: rendered {} bytes", ID, bytes.len());
        }
        result
    }
}

/// [`PageProbe`] over a live chromiumoxide tab.
struct CdpPage<'a>(&'a Page);

#[async_trait]
impl PageProbe for CdpPage<'_> {
    async fn evaluate(&self, expression: &str) -> Result<bool, ProbeError> {
        self.0
            .evaluate_expression(expression)
            .await
            .map_err(|e| ProbeError(e.to_string()))?
            .into_value::<bool>()
            .map_err(|e| ProbeError(e.to_string()))
    }
}

/// Aborts the task when dropped.
struct TaskGuard(JoinHandle<()>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

type StderrLines = Lines<BufReader<ChildStderr>>;

/// Read stderr until Chrome announces its DevTools endpoint.
async fn devtools_url(stderr: ChildStderr) -> Result<(String, StderrLines), RenderError> {
    let mut lines = BufReader::new(stderr).lines();
    let mut captured = Vec::new();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| RenderError::failed(format!("reading browser stderr: {e}")))?
    {
        if let Some(ws) = parse_devtools_line(&line) {
            return Ok((ws, lines));
        }
        if captured.len() < 8 {
            captured.push(line);
        }
    }
    Err(RenderError::failed(format!(
        "browser exited before exposing DevTools. stderr preview: {}",
        captured.join(" | ")
    )))
}

/// `DevTools listening on ws://127.0.0.1:PORT/devtools/browser/ID` → the URL.
fn parse_devtools_line(line: &str) -> Option<String> {
    let (_, ws) = line.rsplit_once("listening on ")?;
    let ws = ws.trim();
    (ws.starts_with("ws") && ws.contains("devtools/browser")).then(|| ws.to_string())
}

async fn drain(mut lines: StderrLines) {
    while let Ok(Some(line)) = lines.next_line().await {
        if line.contains("ERROR") || line.contains("FATAL") {
            debug!("{}: chrome: {}", ID, line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PaperSize;
    use crate::error::FailureKind;
    use crate::readiness::ReadinessProbe;
    use crate::tools::FixedResolver;
    use std::sync::Arc;

    fn backend(config: &ConversionConfig) -> ScriptedSessionBackend {
        ScriptedSessionBackend::new(
            Toolbox::new(
                Arc::new(FixedResolver::new()),
                Arc::new(crate::process::TokioProcessRunner),
            ),
            config,
        )
    }

    #[test]
    fn parses_devtools_announcement() {
        assert_eq!(
            parse_devtools_line(
                "DevTools listening on ws://127.0.0.1:40123/devtools/browser/8f1c-22"
            )
            .as_deref(),
            Some("ws://127.0.0.1:40123/devtools/browser/8f1c-22")
        );
        assert_eq!(parse_devtools_line("[0101/000000.1:ERROR:bus.cc] D-Bus"), None);
        assert_eq!(parse_devtools_line("listening on http://localhost"), None);
    }

    #[test]
    fn hard_limit_exceeds_readiness_wait() {
        let config = ConversionConfig::default();
        let b = backend(&config);
        let budget = Duration::from_secs(25);
        assert!(b.hard_limit(budget) > budget);
        assert!(b.hard_limit(Duration::ZERO) > config.min_fixed_delay);
    }

    #[test]
    fn polls_when_probes_are_configured() {
        let config = ConversionConfig::builder()
            .readiness_probe(ReadinessProbe::MarkerAbsent("Loading".into()))
            .build()
            .unwrap();
        let b = backend(&config);
        assert!(b.descriptor().supports_readiness_polling);
        assert!(matches!(b.strategy, ReadinessStrategy::Poll { .. }));
    }

    #[test]
    fn print_params_follow_print_options() {
        let config = ConversionConfig::builder()
            .print(PrintOptions {
                paper: PaperSize::Letter,
                landscape: true,
                margin_inches: 0.25,
                print_background: true,
            })
            .build()
            .unwrap();
        let params = backend(&config).print_params();
        assert_eq!(params.paper_width, Some(8.5));
        assert_eq!(params.margin_left, Some(0.25));
        assert_eq!(params.landscape, Some(true));
        assert_eq!(params.display_header_footer, Some(false));
    }

    #[tokio::test]
    async fn missing_browser_is_unavailable() {
        let b = backend(&ConversionConfig::default());
        let url = Url::parse("https://example.com").unwrap();
        let err = b.render(&url, Duration::ZERO).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::BackendUnavailable);
        assert!(b.check().is_err());
    }
}
