//! One-shot `chromium --print-to-pdf` per request.
//!
//! Chrome's virtual-time budget lets the page run timers and network for a
//! fixed (virtual) duration before printing. It is the simplest backend and
//! the most portable one, but readiness is fire-and-forget: whatever the
//! page shows when the budget runs out is what gets printed.

use super::{scratch_dir, BackendDescriptor, RendererBackend, Toolbox};
use crate::config::ConversionConfig;
use crate::error::RenderError;
use crate::output::BackendId;
use crate::process::ProcessSpec;
use crate::profiles;
use crate::readiness::ReadinessStrategy;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

pub const ID: BackendId = BackendId::from_static("headless-browser-direct");

#[derive(Debug)]
pub struct HeadlessDirectBackend {
    descriptor: BackendDescriptor,
    tools: Toolbox,
    delay: ReadinessStrategy,
    grace: Duration,
}

impl HeadlessDirectBackend {
    pub fn new(tools: Toolbox, config: &ConversionConfig) -> Self {
        Self {
            descriptor: BackendDescriptor {
                id: ID,
                launch_profile: profiles::headless_direct(),
                supports_readiness_polling: false,
            },
            tools,
            // Probes cannot run here; only the time budget is honoured.
            delay: ReadinessStrategy::FixedDelay {
                minimum: config.min_fixed_delay,
            },
            grace: config.render_grace,
        }
    }
}

#[async_trait]
impl RendererBackend for HeadlessDirectBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn check(&self) -> Result<Option<PathBuf>, RenderError> {
        self.tools.resolve(self.descriptor.launch_profile.tool).map(Some)
    }

    async fn render(&self, url: &Url, budget: Duration) -> Result<Vec<u8>, RenderError> {
        let chrome = self.tools.resolve(self.descriptor.launch_profile.tool)?;
        let wait = self.delay.effective_wait(budget);
        let limit = wait + self.grace;

        let workdir = scratch_dir()?;
        let pdf_path = workdir.path().join("output.pdf");
        let profile_dir = workdir.path().join("profile");

        let spec = ProcessSpec::new(&chrome)
            .args(&self.descriptor.launch_profile.args)
            .arg(format!("--user-data-dir={}", profile_dir.display()))
            .arg(format!("--virtual-time-budget={}", wait.as_millis()))
            .arg(format!("--print-to-pdf={}", pdf_path.display()))
            .arg(url.as_str())
            .env("XDG_RUNTIME_DIR", workdir.path())
            .current_dir(workdir.path())
            .timeout(limit);

        debug!(
            "{}: virtual time {}ms, hard limit {}ms",
            ID,
            wait.as_millis(),
            limit.as_millis()
        );
        let start = Instant::now();
        let output = self.tools.runner.run(&spec).await?;
        debug!(
            "{}: chrome exited with {} after {}ms",
            ID,
            output.status,
            start.elapsed().as_millis()
        );

        if !output.success() {
            return Err(RenderError::failed(format!(
                "chrome exited with {}: {}",
                output.status,
                output.stderr_tail()
            )));
        }

        let bytes = match tokio::fs::read(&pdf_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("{}: chrome exited cleanly but wrote no PDF", ID);
                return Err(RenderError::failed(format!(
                    "chrome did not create the output file ({})",
                    output.stderr_tail()
                )));
            }
            Err(e) => return Err(RenderError::failed(format!("cannot read output: {e}"))),
        };
        if bytes.is_empty() {
            return Err(RenderError::failed("chrome wrote an empty PDF"));
        }

        info!("{}: rendered {} bytes", ID, bytes.len());
        Ok(bytes)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::backend::testing::{exited, flag_value, RecordingRunner};
    use crate::error::FailureKind;
    use crate::process::ProcessError;
    use crate::tools::{FixedResolver, CHROME};
    use std::sync::Arc;

    fn backend(runner: Arc<RecordingRunner>, resolver: FixedResolver) -> HeadlessDirectBackend {
        let config = ConversionConfig::builder()
            .min_fixed_delay(Duration::from_millis(500))
            .render_grace(Duration::from_secs(10))
            .build()
            .unwrap();
        HeadlessDirectBackend::new(Toolbox::new(Arc::new(resolver), runner), &config)
    }

    fn chrome() -> FixedResolver {
        FixedResolver::new().with(CHROME, "/opt/chromium/chrome")
    }

    /// Writes `pdf` to the `--print-to-pdf` target, then exits 0.
    fn printing_runner(pdf: &'static [u8]) -> Arc<RecordingRunner> {
        Arc::new(RecordingRunner::new(move |spec| {
            let target = flag_value(spec, "--print-to-pdf").unwrap();
            std::fs::write(target, pdf).unwrap();
            Ok(exited(0, b"", b""))
        }))
    }

    fn url() -> Url {
        Url::parse("https://example.com/invoice/42").unwrap()
    }

    #[tokio::test]
    async fn renders_from_output_file() {
        let runner = printing_runner(b"%PDF-1.4 test %%EOF");
        let b = backend(runner.clone(), chrome());
        let bytes = b.render(&url(), Duration::from_secs(2)).await.unwrap();
        assert_eq!(bytes, b"%PDF-1.4 test %%EOF");

        let spec = runner.last();
        assert_eq!(spec.program, PathBuf::from("/opt/chromium/chrome"));
        assert_eq!(flag_value(&spec, "--virtual-time-budget").unwrap(), "2000");
        assert_eq!(spec.timeout, Duration::from_secs(12));
        assert_eq!(
            spec.args.last().unwrap().to_str(),
            Some("https://example.com/invoice/42")
        );

        // Scratch directory is gone once render returns.
        let pdf = flag_value(&spec, "--print-to-pdf").unwrap();
        assert!(!std::path::Path::new(&pdf).exists());
    }

    #[tokio::test]
    async fn zero_budget_uses_minimum_delay() {
        let runner = printing_runner(b"%PDF-1.4");
        let b = backend(runner.clone(), chrome());
        b.render(&url(), Duration::ZERO).await.unwrap();
        let spec = runner.last();
        assert_eq!(flag_value(&spec, "--virtual-time-budget").unwrap(), "500");
        assert!(spec.timeout > Duration::from_millis(500));
    }

    #[tokio::test]
    async fn missing_chrome_is_unavailable_without_spawning() {
        let runner = printing_runner(b"%PDF-1.4");
        let b = backend(runner.clone(), FixedResolver::new());
        let err = b.render(&url(), Duration::ZERO).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::BackendUnavailable);
        assert!(runner.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_zero_exit_is_render_failure() {
        let runner = Arc::new(RecordingRunner::new(|_| {
            Ok(exited(133, b"", b"FATAL: zygote could not fork"))
        }));
        let err = backend(runner, chrome())
            .render(&url(), Duration::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::RenderFailed);
        assert!(err.to_string().contains("zygote"), "got {err}");
    }

    #[tokio::test]
    async fn clean_exit_without_file_is_render_failure() {
        let runner = Arc::new(RecordingRunner::new(|_| Ok(exited(0, b"", b""))));
        let err = backend(runner, chrome())
            .render(&url(), Duration::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::RenderFailed);
    }

    #[tokio::test]
    async fn runner_timeout_is_reported_as_timeout() {
        let runner = Arc::new(RecordingRunner::new(|spec| {
            Err(ProcessError::TimedOut {
                program: spec.display_name(),
                limit: spec.timeout,
            })
        }));
        let err = backend(runner, chrome())
            .render(&url(), Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            RenderError::Timeout { limit } => assert_eq!(limit, Duration::from_secs(11)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
