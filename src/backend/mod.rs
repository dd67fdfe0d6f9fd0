//! Renderer backends: one type per strategy for turning a URL into PDF bytes.
//!
//! Every backend follows the same shape:
//!
//! 1. resolve its external tool (missing → [`RenderError::BackendUnavailable`]);
//! 2. launch it with its [`LaunchProfile`] plus per-request arguments;
//! 3. apply readiness (fixed budget handed to the browser, or interactive
//!    polling through DevTools);
//! 4. enforce a hard limit strictly larger than the readiness wait;
//! 5. hand back the produced bytes, or a typed failure.
//!
//! Backends never validate their own output; the fallback chain runs the
//! artifact validator on whatever they return.
//!
//! | Backend | Tool | Readiness | Output |
//! |---------|------|-----------|--------|
//! | [`ScriptedSessionBackend`] | Chromium via DevTools | probe polling | `Page.printToPDF` |
//! | [`HeadlessDirectBackend`] | Chromium `--print-to-pdf` | `--virtual-time-budget` | file in temp dir |
//! | [`StaticHtmlBackend`] | HTTP GET + wkhtmltopdf | none | stdout |

mod headless;
mod session;
mod static_html;

pub use headless::HeadlessDirectBackend;
pub use session::ScriptedSessionBackend;
pub use static_html::StaticHtmlBackend;

use crate::error::RenderError;
use crate::output::BackendId;
use crate::process::{ProcessRunner, TokioProcessRunner};
use crate::profiles::LaunchProfile;
use crate::tools::{BinaryResolver, SystemResolver};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Static description of a registered backend.
#[derive(Debug, Clone)]
pub struct BackendDescriptor {
    pub id: BackendId,
    pub launch_profile: LaunchProfile,
    /// `true` if the backend can evaluate readiness probes against the live
    /// page; `false` means it can only spend a time budget.
    pub supports_readiness_polling: bool,
}

/// One rendering strategy.
///
/// Implementations are shared by every concurrent conversion, so all
/// per-request state (processes, temp dirs, sessions) lives inside
/// [`render`](RendererBackend::render).
#[async_trait]
pub trait RendererBackend: Send + Sync {
    fn descriptor(&self) -> &BackendDescriptor;

    fn id(&self) -> &BackendId {
        &self.descriptor().id
    }

    /// Render `url` to PDF bytes, waiting at most `budget` for dynamic content.
    async fn render(&self, url: &Url, budget: Duration) -> Result<Vec<u8>, RenderError>;

    /// Whether the backend could run right now. Returns the resolved tool
    /// path when there is one.
    fn check(&self) -> Result<Option<PathBuf>, RenderError> {
        Ok(None)
    }
}

/// External capabilities shared by the built-in backends.
#[derive(Clone)]
pub struct Toolbox {
    pub resolver: Arc<dyn BinaryResolver>,
    pub runner: Arc<dyn ProcessRunner>,
}

impl Toolbox {
    pub fn new(resolver: Arc<dyn BinaryResolver>, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { resolver, runner }
    }

    /// [`SystemResolver`] (with `overrides`) and [`TokioProcessRunner`].
    pub fn system(resolver: SystemResolver) -> Self {
        Self::new(Arc::new(resolver), Arc::new(TokioProcessRunner))
    }

    pub fn resolve(&self, tool: &str) -> Result<PathBuf, RenderError> {
        self.resolver
            .resolve(tool)
            .map_err(|e| RenderError::BackendUnavailable {
                tool: e.tool,
                reason: e.reason,
            })
    }
}

impl std::fmt::Debug for Toolbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Toolbox { .. }")
    }
}

/// Per-request scratch directory; removed when dropped on every exit path.
fn scratch_dir() -> Result<tempfile::TempDir, RenderError> {
    tempfile::Builder::new()
        .prefix("url2pdf-")
        .tempdir()
        .map_err(|e| RenderError::failed(format!("cannot create temp dir: {e}")))
}

#[cfg(all(test, unix))]
pub(crate) mod testing {
    //! Scripted process runner for backend unit tests.

    use crate::process::{ProcessError, ProcessOutput, ProcessRunner, ProcessSpec};
    use async_trait::async_trait;
    use std::os::unix::process::ExitStatusExt;
    use std::process::ExitStatus;
    use std::sync::Mutex;

    type Script = Box<dyn Fn(&ProcessSpec) -> Result<ProcessOutput, ProcessError> + Send + Sync>;

    /// Records every spec it is given and answers with `script`.
    pub struct RecordingRunner {
        pub calls: Mutex<Vec<ProcessSpec>>,
        script: Script,
    }

    impl RecordingRunner {
        pub fn new(
            script: impl Fn(&ProcessSpec) -> Result<ProcessOutput, ProcessError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                script: Box::new(script),
            }
        }

        pub fn last(&self) -> ProcessSpec {
            self.calls.lock().unwrap().last().cloned().unwrap()
        }
    }

    #[async_trait]
    impl ProcessRunner for RecordingRunner {
        async fn run(&self, spec: &ProcessSpec) -> Result<ProcessOutput, ProcessError> {
            self.calls.lock().unwrap().push(spec.clone());
            (self.script)(spec)
        }
    }

    pub fn exited(code: i32, stdout: &[u8], stderr: &[u8]) -> ProcessOutput {
        ProcessOutput {
            status: ExitStatus::from_raw(code << 8),
            stdout: stdout.to_vec(),
            stderr: stderr.to_vec(),
        }
    }

    /// Value of `--name=value` in `spec`, if present.
    pub fn flag_value(spec: &ProcessSpec, name: &str) -> Option<String> {
        let prefix = format!("{name}=");
        spec.args.iter().find_map(|a| {
            a.to_str()
                .and_then(|s| s.strip_prefix(&prefix))
                .map(str::to_string)
        })
    }
}
