//! Fallback-chain integration tests.
//!
//! The first half drives [`Converter`] over in-process fake backends; the
//! second half (unix only) runs the real headless and static backends
//! against shell scripts standing in for Chromium and wkhtmltopdf.

use async_trait::async_trait;
use edgequake_url2pdf::profiles::LaunchProfile;
use edgequake_url2pdf::{
    BackendDescriptor, BackendId, BackendRegistry, ConversionConfig, ConversionError,
    ConversionProgressCallback, Converter, FailureKind, RenderError, RendererBackend,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

// ── Fake backends ────────────────────────────────────────────────────────────

const PDF: &[u8] = b"%PDF-1.7\n1 0 obj\n<< /Type /Catalog >>\nendobj\ntrailer\n<< >>\n%%EOF\n";

#[derive(Clone)]
enum Behaviour {
    Unavailable,
    Crash,
    Bytes(Vec<u8>),
    Hang,
}

type EventLog = Arc<Mutex<Vec<String>>>;

struct FakeBackend {
    descriptor: BackendDescriptor,
    behaviour: Behaviour,
    log: EventLog,
    budgets: Mutex<Vec<Duration>>,
}

impl FakeBackend {
    fn new(id: &str, behaviour: Behaviour, log: &EventLog) -> Arc<Self> {
        Arc::new(Self {
            descriptor: BackendDescriptor {
                id: BackendId::new(id),
                launch_profile: LaunchProfile::new("fake", &[]),
                supports_readiness_polling: false,
            },
            behaviour,
            log: log.clone(),
            budgets: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl RendererBackend for FakeBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    async fn render(&self, _url: &Url, budget: Duration) -> Result<Vec<u8>, RenderError> {
        let id = self.descriptor.id.to_string();
        self.budgets.lock().unwrap().push(budget);
        self.log.lock().unwrap().push(format!("start {id}"));
        // Yield so an overlapping attempt would show up in the log.
        tokio::time::sleep(Duration::from_millis(5)).await;

        let result = match &self.behaviour {
            Behaviour::Unavailable => Err(RenderError::BackendUnavailable {
                tool: "fake".into(),
                reason: "not installed".into(),
            }),
            Behaviour::Crash => Err(RenderError::failed("exit code 1")),
            Behaviour::Bytes(bytes) => Ok(bytes.clone()),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(RenderError::failed("unreachable"))
            }
        };
        self.log.lock().unwrap().push(format!("end {id}"));
        result
    }
}

fn converter(config: ConversionConfig, backends: &[Arc<FakeBackend>]) -> Converter {
    let registry = backends
        .iter()
        .fold(BackendRegistry::builder(), |b, backend| {
            b.push(backend.clone() as Arc<dyn RendererBackend>)
        })
        .build()
        .unwrap();
    Converter::with_registry(config, registry)
}

fn log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

// ── Chain behaviour ──────────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_url_invokes_no_backend() {
    let events = log();
    let only = FakeBackend::new("only", Behaviour::Bytes(PDF.to_vec()), &events);
    let c = converter(ConversionConfig::default(), &[only]);

    for bad in ["", "   ", "relative/path.html", "ftp://example.com/a", "mailto:x@y.z"] {
        let err = c.convert_url(bad, None).await.unwrap_err();
        assert!(matches!(err, ConversionError::InvalidUrl { .. }), "{bad:?}: {err:?}");
        assert!(err.attempts().is_empty());
    }
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn falls_back_to_static_converter() {
    let events = log();
    let session = FakeBackend::new("scripted-browser-session", Behaviour::Unavailable, &events);
    let headless = FakeBackend::new("headless-browser-direct", Behaviour::Crash, &events);
    let static_html =
        FakeBackend::new("static-html-converter", Behaviour::Bytes(PDF.to_vec()), &events);
    let c = converter(
        ConversionConfig::default(),
        &[session.clone(), headless.clone(), static_html.clone()],
    );

    let result = c
        .convert_url("https://example.com/invoice/42", Some(Duration::from_secs(2)))
        .await
        .unwrap();

    assert_eq!(result.backend_used, "static-html-converter");
    assert_eq!(result.bytes, PDF);
    assert_eq!(result.size, PDF.len());
    assert_eq!(result.fallbacks(), 2);
    assert_eq!(result.attempts.len(), 3);
    assert_eq!(
        result.attempts[0].failure_kind(),
        Some(FailureKind::BackendUnavailable)
    );
    assert_eq!(result.attempts[1].failure_kind(), Some(FailureKind::RenderFailed));
    assert!(result.attempts[2].succeeded());
    for backend in [&session, &headless, &static_html] {
        assert_eq!(*backend.budgets.lock().unwrap(), vec![Duration::from_secs(2)]);
    }
}

#[tokio::test]
async fn attempts_never_overlap() {
    let events = log();
    let a = FakeBackend::new("a", Behaviour::Crash, &events);
    let b = FakeBackend::new("b", Behaviour::Crash, &events);
    let third = FakeBackend::new("c", Behaviour::Bytes(PDF.to_vec()), &events);
    let c = converter(ConversionConfig::default(), &[a, b, third]);

    c.convert_url("https://example.com", None).await.unwrap();

    assert_eq!(
        *events.lock().unwrap(),
        vec!["start a", "end a", "start b", "end b", "start c", "end c"]
    );
}

#[tokio::test]
async fn stops_at_first_success() {
    let events = log();
    let first = FakeBackend::new("first", Behaviour::Bytes(PDF.to_vec()), &events);
    let second = FakeBackend::new("second", Behaviour::Bytes(PDF.to_vec()), &events);
    let c = converter(ConversionConfig::default(), &[first, second.clone()]);

    let result = c.convert_url("https://example.com", None).await.unwrap();
    assert_eq!(result.backend_used, "first");
    assert_eq!(result.attempts.len(), 1);
    assert!(second.budgets.lock().unwrap().is_empty());
}

#[tokio::test]
async fn all_failed_reports_every_attempt_in_order() {
    let events = log();
    let c = converter(
        ConversionConfig::default(),
        &[
            FakeBackend::new("one", Behaviour::Unavailable, &events),
            FakeBackend::new("two", Behaviour::Crash, &events),
            FakeBackend::new("three", Behaviour::Bytes(b"<html>oops</html>".to_vec()), &events),
        ],
    );

    let err = c.convert_url("https://example.com", None).await.unwrap_err();
    let ConversionError::AllBackendsFailed { attempts } = &err else {
        panic!("expected AllBackendsFailed, got {err:?}");
    };
    let ids: Vec<&str> = attempts.iter().map(|a| a.backend_id.as_str()).collect();
    assert_eq!(ids, ["one", "two", "three"]);
    assert_eq!(attempts[2].failure_kind(), Some(FailureKind::InvalidArtifact));

    let message = err.to_string();
    assert!(message.contains("1. one"), "{message}");
    assert!(message.contains("3. three"), "{message}");
}

#[tokio::test]
async fn invalid_artifact_triggers_fallback() {
    let events = log();
    let c = converter(
        ConversionConfig::default(),
        &[
            FakeBackend::new("empty", Behaviour::Bytes(Vec::new()), &events),
            FakeBackend::new("html", Behaviour::Bytes(b"<!DOCTYPE html>".to_vec()), &events),
            FakeBackend::new("good", Behaviour::Bytes(PDF.to_vec()), &events),
        ],
    );

    let result = c.convert_url("https://example.com", None).await.unwrap();
    assert_eq!(result.backend_used, "good");
    assert!(result.attempts[..2]
        .iter()
        .all(|a| a.failure_kind() == Some(FailureKind::InvalidArtifact)));
}

#[tokio::test]
async fn small_pdf_is_accepted_with_warning() {
    let events = log();
    let c = converter(
        ConversionConfig::default(),
        &[FakeBackend::new("tiny", Behaviour::Bytes(PDF.to_vec()), &events)],
    );
    let result = c.convert_url("https://example.com", None).await.unwrap();
    assert!(!result.warnings.is_empty());
}

#[tokio::test]
async fn budget_is_clamped_to_configured_maximum() {
    let events = log();
    let only = FakeBackend::new("only", Behaviour::Bytes(PDF.to_vec()), &events);
    let config = ConversionConfig::builder()
        .max_readiness_budget(Duration::from_secs(5))
        .build()
        .unwrap();
    let c = converter(config, &[only.clone()]);

    c.convert_url("https://example.com", Some(Duration::from_secs(600)))
        .await
        .unwrap();
    c.convert_url("https://example.com", None).await.unwrap();

    assert_eq!(
        *only.budgets.lock().unwrap(),
        vec![Duration::from_secs(5), Duration::from_secs(5)]
    );
}

#[tokio::test]
async fn global_timeout_cancels_in_flight_backend() {
    let events = log();
    let config = ConversionConfig::builder()
        .global_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let c = converter(
        config,
        &[
            FakeBackend::new("quick-fail", Behaviour::Crash, &events),
            FakeBackend::new("stuck", Behaviour::Hang, &events),
            FakeBackend::new("never", Behaviour::Bytes(PDF.to_vec()), &events),
        ],
    );

    let err = c.convert_url("https://example.com", None).await.unwrap_err();
    match err {
        ConversionError::GlobalTimeout {
            limit,
            attempts,
            in_flight,
        } => {
            assert_eq!(limit, Duration::from_millis(200));
            assert_eq!(attempts.len(), 1);
            assert_eq!(attempts[0].backend_id, "quick-fail");
            assert_eq!(in_flight.as_ref().map(BackendId::as_str), Some("stuck"));
        }
        other => panic!("expected GlobalTimeout, got {other:?}"),
    }
    assert!(!events.lock().unwrap().iter().any(|e| e.ends_with("never")));
}

// ── Progress events ──────────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl ConversionProgressCallback for Recorder {
    fn on_conversion_start(&self, url: &str, backend_count: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("begin {url} {backend_count}"));
    }

    fn on_attempt_start(&self, backend: &BackendId, index: usize, total: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("try {backend} {index}/{total}"));
    }

    fn on_attempt_success(&self, backend: &BackendId, size_bytes: usize) {
        self.events
            .lock()
            .unwrap()
            .push(format!("ok {backend} {size_bytes}"));
    }

    fn on_attempt_failed(&self, backend: &BackendId, _error: &str) {
        self.events.lock().unwrap().push(format!("fail {backend}"));
    }

    fn on_conversion_complete(&self, backend_used: Option<&BackendId>) {
        self.events.lock().unwrap().push(format!(
            "done {}",
            backend_used.map(BackendId::as_str).unwrap_or("-")
        ));
    }
}

#[tokio::test]
async fn progress_callback_sees_each_attempt() {
    let recorder = Arc::new(Recorder::default());
    let config = ConversionConfig::builder()
        .progress_callback(recorder.clone() as Arc<dyn ConversionProgressCallback>)
        .build()
        .unwrap();
    let events = log();
    let c = converter(
        config,
        &[
            FakeBackend::new("a", Behaviour::Crash, &events),
            FakeBackend::new("b", Behaviour::Bytes(PDF.to_vec()), &events),
        ],
    );

    c.convert_url("https://example.com/x", None).await.unwrap();

    assert_eq!(
        *recorder.events.lock().unwrap(),
        vec![
            "begin https://example.com/x 2".to_string(),
            "try a 1/2".to_string(),
            "fail a".to_string(),
            "try b 2/2".to_string(),
            format!("ok b {}", PDF.len()),
            "done b".to_string(),
        ]
    );
}

// ── Real backends over stand-in tools ────────────────────────────────────────

#[cfg(unix)]
mod stand_in_tools {
    use super::*;
    use edgequake_url2pdf::process::TokioProcessRunner;
    use edgequake_url2pdf::readiness::FIXED_DELAY_FLOOR;
    use edgequake_url2pdf::tools::{FixedResolver, CHROME, WKHTMLTOPDF};
    use edgequake_url2pdf::{BackendKind, Toolbox};
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};

    // Tests in this module write executables and spawn them; running them
    // one at a time avoids ETXTBSY when a fork races a script write.
    static SERIAL: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    /// Chromium stand-in: logs its arguments, then writes a PDF to the
    /// `--print-to-pdf=` target.
    fn fake_chrome(dir: &Path, exit_code: i32) -> PathBuf {
        let log = dir.join("chrome-args.txt");
        script(
            dir,
            "chrome",
            &format!(
                r#"out=""
for a in "$@"; do
  echo "$a" >> "{log}"
  case "$a" in --print-to-pdf=*) out="${{a#--print-to-pdf=}}";; esac
done
[ {exit_code} -ne 0 ] && exit {exit_code}
printf '%%PDF-1.4\n%% chrome\n%%%%EOF\n' > "$out""#,
                log = log.display(),
            ),
        )
    }

    fn fake_wkhtmltopdf(dir: &Path) -> PathBuf {
        script(dir, "wkhtmltopdf", r#"printf '%%PDF-1.4\n%% wkhtmltopdf\n%%%%EOF\n'"#)
    }

    fn converter(config: &ConversionConfig, resolver: FixedResolver) -> Converter {
        let tools = Toolbox::new(Arc::new(resolver), Arc::new(TokioProcessRunner));
        let registry = BackendRegistry::with_toolbox(config, tools).unwrap();
        Converter::with_registry(config.clone(), registry)
    }

    fn page(dir: &Path) -> String {
        let path = dir.join("page.html");
        std::fs::write(&path, "<html><head></head><body><h1>Invoice</h1></body></html>").unwrap();
        Url::from_file_path(&path).unwrap().to_string()
    }

    #[tokio::test]
    async fn zero_budget_still_waits_minimum_delay() {
        let _guard = SERIAL.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let config = ConversionConfig::builder()
            .backends(vec![BackendKind::HeadlessDirect])
            .min_fixed_delay(Duration::from_millis(500))
            .build()
            .unwrap();
        let c = converter(
            &config,
            FixedResolver::new().with(CHROME, fake_chrome(dir.path(), 0)),
        );

        let result = c
            .convert_url(&page(dir.path()), Some(Duration::ZERO))
            .await
            .unwrap();
        assert_eq!(result.backend_used, "headless-browser-direct");
        assert!(result.bytes.starts_with(b"%PDF-"));

        let args = std::fs::read_to_string(dir.path().join("chrome-args.txt")).unwrap();
        assert!(
            args.lines().any(|l| l == "--virtual-time-budget=500"),
            "{args}"
        );
        assert!(args.lines().any(|l| l == "--headless"), "{args}");
    }

    #[tokio::test]
    async fn crashing_browser_falls_back_to_wkhtmltopdf() {
        let _guard = SERIAL.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let config = ConversionConfig::builder()
            .backends(vec![BackendKind::HeadlessDirect, BackendKind::StaticHtml])
            .build()
            .unwrap();
        let c = converter(
            &config,
            FixedResolver::new()
                .with(CHROME, fake_chrome(dir.path(), 133))
                .with(WKHTMLTOPDF, fake_wkhtmltopdf(dir.path())),
        );

        let result = c.convert_url(&page(dir.path()), None).await.unwrap();
        assert_eq!(result.backend_used, "static-html-converter");
        assert_eq!(result.attempts.len(), 2);
        assert_eq!(
            result.attempts[0].failure_kind(),
            Some(FailureKind::RenderFailed)
        );
        assert!(String::from_utf8_lossy(&result.bytes).contains("wkhtmltopdf"));
    }

    #[tokio::test]
    async fn missing_tools_are_reported_as_unavailable() {
        let _guard = SERIAL.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let c = converter(&ConversionConfig::default(), FixedResolver::new());

        let err = c.convert_url(&page(dir.path()), None).await.unwrap_err();
        let attempts = err.attempts();
        assert_eq!(attempts.len(), 3);
        assert!(attempts
            .iter()
            .all(|a| a.failure_kind() == Some(FailureKind::BackendUnavailable)));

        let statuses = c.check_backends();
        assert_eq!(statuses.len(), 3);
        assert!(statuses.iter().all(|s| !s.available && s.detail.is_some()));
    }

    /// Every live process whose command line contains `needle`.
    #[cfg(target_os = "linux")]
    fn processes_matching(needle: &str) -> Vec<u32> {
        std::fs::read_dir("/proc")
            .unwrap()
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str()?.parse::<u32>().ok())
            .filter(|pid| {
                std::fs::read(format!("/proc/{pid}/cmdline"))
                    .map(|c| String::from_utf8_lossy(&c).contains(needle))
                    .unwrap_or(false)
            })
            .collect()
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn global_timeout_kills_renderer_process() {
        let _guard = SERIAL.lock().await;
        let dir = tempfile::tempdir().unwrap();
        // No `exec`: the sleeper is a grandchild, reachable only through
        // the process group.
        let hung = script(dir.path(), "chrome", "sleep 37.123\ntrue");
        let config = ConversionConfig::builder()
            .backends(vec![BackendKind::HeadlessDirect])
            .render_grace(Duration::from_secs(120))
            .global_timeout(Duration::from_millis(500))
            .build()
            .unwrap();
        let c = converter(&config, FixedResolver::new().with(CHROME, hung));

        let err = c.convert_url(&page(dir.path()), None).await.unwrap_err();
        match &err {
            ConversionError::GlobalTimeout { in_flight, .. } => {
                assert_eq!(
                    in_flight.as_ref().map(BackendId::as_str),
                    Some("headless-browser-direct")
                );
            }
            other => panic!("expected GlobalTimeout, got {other:?}"),
        }

        assert_no_survivors("37.123").await;
    }

    /// SIGKILL delivery and reaping are asynchronous, so poll for a while.
    #[cfg(target_os = "linux")]
    async fn assert_no_survivors(needle: &str) {
        let mut left = processes_matching(needle);
        for _ in 0..40 {
            if left.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
            left = processes_matching(needle);
        }
        assert!(left.is_empty(), "orphaned renderer processes: {left:?}");
    }

    #[tokio::test]
    async fn struct_literal_config_still_waits_a_floor() {
        let _guard = SERIAL.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let config = ConversionConfig {
            backends: vec![BackendKind::HeadlessDirect],
            min_fixed_delay: Duration::ZERO,
            readiness_budget: Duration::ZERO,
            ..ConversionConfig::default()
        };
        let c = converter(
            &config,
            FixedResolver::new().with(CHROME, fake_chrome(dir.path(), 0)),
        );

        c.convert_url(&page(dir.path()), Some(Duration::ZERO))
            .await
            .unwrap();

        let args = std::fs::read_to_string(dir.path().join("chrome-args.txt")).unwrap();
        let expected = format!("--virtual-time-budget={}", FIXED_DELAY_FLOOR.as_millis());
        assert!(args.lines().any(|l| l == expected), "{args}");
        assert!(!args.lines().any(|l| l == "--virtual-time-budget=0"), "{args}");
    }

    // ── Scripted session over stand-in browsers ──────────────────────────

    fn session_only() -> ConversionConfig {
        ConversionConfig::builder()
            .backends(vec![BackendKind::ScriptedSession])
            .launch_timeout(Duration::from_millis(400))
            .global_timeout(Duration::from_secs(30))
            .build()
            .unwrap()
    }

    async fn session_failure(chrome_body: &str) -> (ConversionError, String) {
        let dir = tempfile::tempdir().unwrap();
        let chrome = script(dir.path(), "chrome", chrome_body);
        let c = converter(&session_only(), FixedResolver::new().with(CHROME, chrome));
        let err = c.convert_url(&page(dir.path()), None).await.unwrap_err();
        assert!(
            matches!(err, ConversionError::AllBackendsFailed { .. }),
            "expected AllBackendsFailed, got {err:?}"
        );
        let attempts = err.attempts();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].backend_id, "scripted-browser-session");
        let detail = attempts[0].to_string();
        (err, detail)
    }

    #[tokio::test]
    async fn session_browser_exiting_before_devtools_fails_attempt() {
        let _guard = SERIAL.lock().await;
        let (err, detail) =
            session_failure("echo '[0101/000000.1:ERROR:ozone] no display' >&2\nexit 1").await;
        assert_eq!(
            err.attempts()[0].failure_kind(),
            Some(FailureKind::RenderFailed)
        );
        assert!(detail.contains("before exposing DevTools"), "{detail}");
        assert!(detail.contains("no display"), "{detail}");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn silent_session_browser_is_killed_after_launch_timeout() {
        let _guard = SERIAL.lock().await;
        let start = std::time::Instant::now();
        let (err, detail) =
            session_failure("echo 'starting up' >&2\nsleep 52.341\ntrue").await;
        assert!(
            matches!(
                err.attempts()[0].failure_kind(),
                Some(FailureKind::RenderFailed | FailureKind::Timeout)
            ),
            "{detail}"
        );
        assert!(detail.contains("DevTools"), "{detail}");
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_no_survivors("52.341").await;
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn unreachable_devtools_endpoint_fails_and_kills_browser() {
        let _guard = SERIAL.lock().await;
        let (err, detail) = session_failure(
            "echo 'DevTools listening on ws://127.0.0.1:1/devtools/browser/x' >&2\nsleep 63.517\ntrue",
        )
        .await;
        assert_eq!(
            err.attempts()[0].failure_kind(),
            Some(FailureKind::RenderFailed)
        );
        assert!(detail.contains("cannot connect to DevTools"), "{detail}");
        assert_no_survivors("63.517").await;
    }
}
