//! CLI binary for edgequake-url2pdf.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_url2pdf::convert::write_atomic;
use edgequake_url2pdf::{
    BackendId, BackendKind, BackendStatus, ConversionConfig, ConversionError,
    ConversionProgressCallback, ConversionResult, Converter, PaperSize, PrintOptions,
    ProgressCallback, ReadinessProbe, RenderAttempt,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a spinner naming the running backend plus one
/// log line per finished attempt.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Wall-clock start per backend, for elapsed reporting.
    start_times: Mutex<HashMap<BackendId, Instant>>,
    /// Attempts that failed so far.
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, backend: &BackendId) -> f64 {
        self.start_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(backend)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, url: &str, backend_count: usize) {
        self.bar.println(format!(
            "{} {}  {}",
            cyan("◆"),
            bold(url),
            dim(&format!("({backend_count} backends)"))
        ));
    }

    fn on_attempt_start(&self, backend: &BackendId, index: usize, total: usize) {
        self.start_times
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(backend.clone(), Instant::now());
        self.bar.set_prefix(format!("Rendering {index}/{total}"));
        self.bar.set_message(backend.to_string());
    }

    fn on_attempt_success(&self, backend: &BackendId, size_bytes: usize) {
        let secs = self.elapsed_secs(backend);
        self.bar.println(format!(
            "  {} {:<26}  {:<12}  {}",
            green("✓"),
            backend,
            dim(&format!("{size_bytes:>8} B")),
            dim(&format!("{secs:.1}s")),
        ));
    }

    fn on_attempt_failed(&self, backend: &BackendId, error: &str) {
        let secs = self.elapsed_secs(backend);
        self.errors.fetch_add(1, Ordering::SeqCst);

        // Truncate very long error messages to keep output tidy.
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:<26}  {}  {}",
            red("✗"),
            backend,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
    }

    fn on_conversion_complete(&self, backend_used: Option<&BackendId>) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);

        match backend_used {
            Some(id) if failed == 0 => eprintln!("{} rendered by {}", green("✔"), bold(id.as_str())),
            Some(id) => eprintln!(
                "{} rendered by {}  ({} fallback{})",
                cyan("⚠"),
                bold(id.as_str()),
                failed,
                if failed == 1 { "" } else { "s" }
            ),
            None => eprintln!("{} every backend failed", red("✘")),
        }
    }
}

const AFTER_HELP: &str = r##"EXAMPLES:
  # Render a page to a file
  url2pdf https://example.com/invoice/42 -o invoice.pdf

  # Wait up to 15s for a "Loading..." placeholder to disappear
  url2pdf --budget 15 --wait-for-absent "Loading..." https://example.com/report -o report.pdf

  # Wait until more than 5 table cells have text
  url2pdf --wait-for-cells "#items td" --min-cells 5 https://example.com/order/7 -o order.pdf

  # Only use the static converter (no browser)
  url2pdf --backends static https://example.com -o page.pdf

  # JSON response with base64 payload (for scripting / HTTP bridges)
  url2pdf --json https://example.com > result.json

  # Local HTML file
  url2pdf /srv/templates/receipt.html -o receipt.pdf

  # Which backends can run on this machine?
  url2pdf --check

  # Render a built-in page through the whole chain
  url2pdf --self-test

BACKENDS (default order):
  Id                          Needs         JavaScript  Readiness
  ────────────────────────    ───────────   ──────────  ─────────────────────
  scripted-browser-session    chromium      yes         polls page probes
  headless-browser-direct     chromium      yes         fixed virtual time
  static-html-converter       wkhtmltopdf   no          initial HTML only

ENVIRONMENT VARIABLES:
  URL2PDF_CHROME_PATH          Chromium / Chrome executable
  URL2PDF_WKHTMLTOPDF_PATH     wkhtmltopdf executable
  RUST_LOG                     Override log filter (e.g. edgequake_url2pdf=debug)
"##;

const SELF_TEST_HTML: &str = r##"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>url2pdf self-test</title></head>
<body>
  <h1>url2pdf self-test</h1>
  <p id="status">Loading...</p>
  <table id="items">
    <thead><tr><th>Item</th><th>Qty</th><th>Price</th></tr></thead>
    <tbody>
      <tr><td>Widget</td><td>2</td><td>4.50</td></tr>
      <tr><td>Gadget</td><td>1</td><td>12.00</td></tr>
    </tbody>
  </table>
  <script>
    setTimeout(function () {
      document.getElementById("status").textContent = "Ready";
    }, 300);
  </script>
</body>
</html>
"##;

/// Convert web pages to PDF with headless renderers and automatic fallback.
#[derive(Parser, Debug)]
#[command(
    name = "url2pdf",
    version,
    about = "Convert web pages to PDF with headless renderers and automatic fallback",
    long_about = "Convert a web page (http, https, file URL or absolute path) to PDF. \
Renderers are tried in order (DevTools-driven Chromium session, direct headless Chromium, \
wkhtmltopdf) until one produces a valid PDF. Dynamic pages can be awaited with readiness probes.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// URL (http, https, file) or absolute path of a local HTML file.
    #[arg(required_unless_present_any = ["check", "self_test"])]
    url: Option<String>,

    /// Write the PDF to this file instead of stdout.
    #[arg(short, long, env = "URL2PDF_OUTPUT")]
    output: Option<PathBuf>,

    /// Print a JSON response (success, backend, size, base64 payload, attempts).
    #[arg(long, env = "URL2PDF_JSON")]
    json: bool,

    /// Report which backends can run here, then exit.
    #[arg(long)]
    check: bool,

    /// Convert a built-in HTML page through the chain, then exit.
    #[arg(long)]
    self_test: bool,

    /// Seconds to wait for dynamic content before printing.
    #[arg(short, long, env = "URL2PDF_BUDGET")]
    budget: Option<f64>,

    /// Upper bound in seconds for the whole conversion.
    #[arg(long, env = "URL2PDF_GLOBAL_TIMEOUT", default_value_t = 180)]
    global_timeout: u64,

    /// Comma-separated backend order: session, headless, static (or full ids).
    #[arg(long, env = "URL2PDF_BACKENDS", value_delimiter = ',')]
    backends: Vec<String>,

    /// Ready once this text no longer appears in the page body (repeatable).
    #[arg(long = "wait-for-absent", value_name = "TEXT")]
    wait_for_absent: Vec<String>,

    /// Ready once an element matches this CSS selector (repeatable).
    #[arg(long = "wait-for-selector", value_name = "CSS")]
    wait_for_selector: Vec<String>,

    /// Ready once cells matching this CSS selector have text.
    #[arg(long = "wait-for-cells", value_name = "CSS")]
    wait_for_cells: Option<String>,

    /// --wait-for-cells holds once more than this many cells have text.
    #[arg(long, default_value_t = 0)]
    min_cells: usize,

    /// Path to the Chromium / Chrome executable.
    #[arg(long, env = "URL2PDF_CHROME_PATH")]
    chrome_path: Option<PathBuf>,

    /// Path to the wkhtmltopdf executable.
    #[arg(long, env = "URL2PDF_WKHTMLTOPDF_PATH")]
    wkhtmltopdf_path: Option<PathBuf>,

    /// Paper size.
    #[arg(long, env = "URL2PDF_PAPER", value_enum, default_value = "a4")]
    paper: PaperArg,

    /// Landscape orientation.
    #[arg(long, env = "URL2PDF_LANDSCAPE")]
    landscape: bool,

    /// Page margin in inches (0–3).
    #[arg(long, env = "URL2PDF_MARGIN", default_value_t = 0.4)]
    margin: f64,

    /// Disable progress spinner.
    #[arg(long, env = "URL2PDF_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "URL2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "URL2PDF_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PaperArg {
    A4,
    Letter,
}

impl From<PaperArg> for PaperSize {
    fn from(v: PaperArg) -> Self {
        match v {
            PaperArg::A4 => PaperSize::A4,
            PaperArg::Letter => PaperSize::Letter,
        }
    }
}

/// JSON response shape, one per invocation.
#[derive(Serialize)]
struct JsonResponse<'a> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    backend_used: Option<&'a BackendId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size_bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pdf_base64: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    attempts: &'a [RenderAttempt],
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner covers the per-attempt feedback, so library logs stay at
    // error level unless asked for.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.check;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;
    let converter = Converter::new(config).context("Failed to set up backends")?;

    // ── Check mode ───────────────────────────────────────────────────────
    if cli.check {
        let statuses = converter.check_backends();
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&statuses).context("Failed to serialise report")?
            );
        } else {
            print_check_report(&statuses);
        }
        if !statuses.iter().any(|s| s.available) {
            anyhow::bail!("No backend can run on this machine");
        }
        return Ok(());
    }

    // ── Self-test mode ───────────────────────────────────────────────────
    // Kept alive until the conversion is done.
    let mut _self_test_dir = None;
    let target = if cli.self_test {
        let dir = tempfile::Builder::new()
            .prefix("url2pdf-self-test-")
            .tempdir()
            .context("Failed to create self-test directory")?;
        let page = dir.path().join("self-test.html");
        tokio::fs::write(&page, SELF_TEST_HTML)
            .await
            .context("Failed to write self-test page")?;
        _self_test_dir = Some(dir);
        page.display().to_string()
    } else {
        cli.url.clone().context("A URL is required")?
    };

    let budget = cli
        .budget
        .map(|secs| Duration::try_from_secs_f64(secs).context("Invalid --budget"))
        .transpose()?;

    // ── Run conversion ───────────────────────────────────────────────────
    // Dropping the conversion on Ctrl-C kills the renderer's process group;
    // the renderers do not share our terminal's foreground group.
    let outcome = tokio::select! {
        outcome = converter.convert_url(&target, budget) => outcome,
        _ = tokio::signal::ctrl_c() => anyhow::bail!("Interrupted"),
    };

    if cli.json {
        return print_json(&cli, outcome).await;
    }

    let result = match outcome {
        Ok(result) => result,
        Err(err) => {
            if !cli.quiet {
                print_failure(&err);
            }
            return Err(err).context("Conversion failed");
        }
    };

    if let Some(ref output_path) = cli.output {
        write_atomic(output_path, &result.bytes)
            .await
            .context("Failed to write PDF")?;
    } else if !cli.self_test {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(&result.bytes)
            .context("Failed to write to stdout")?;
        handle.flush().ok();
    }

    if !cli.quiet {
        print_summary(&result, cli.output.as_deref(), show_progress);
    }

    Ok(())
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .global_timeout(Duration::from_secs(cli.global_timeout))
        .print(PrintOptions {
            paper: cli.paper.into(),
            landscape: cli.landscape,
            margin_inches: cli.margin,
            ..PrintOptions::default()
        })
        .readiness_probes(readiness_probes(cli));

    if !cli.backends.is_empty() {
        builder = builder.backends(parse_backends(&cli.backends)?);
    }
    if let Some(ref path) = cli.chrome_path {
        builder = builder.chrome_path(path);
    }
    if let Some(ref path) = cli.wkhtmltopdf_path {
        builder = builder.wkhtmltopdf_path(path);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn readiness_probes(cli: &Cli) -> Vec<ReadinessProbe> {
    let mut probes: Vec<ReadinessProbe> = cli
        .wait_for_absent
        .iter()
        .cloned()
        .map(ReadinessProbe::MarkerAbsent)
        .collect();
    probes.extend(
        cli.wait_for_selector
            .iter()
            .cloned()
            .map(ReadinessProbe::ElementPresent),
    );
    if let Some(ref selector) = cli.wait_for_cells {
        probes.push(ReadinessProbe::PopulatedCells {
            selector: selector.clone(),
            min: cli.min_cells,
        });
    }
    if cli.self_test && probes.is_empty() {
        probes.push(ReadinessProbe::MarkerAbsent("Loading...".into()));
    }
    probes
}

/// Parse `--backends` names into `BackendKind`s, keeping their order.
fn parse_backends(names: &[String]) -> Result<Vec<BackendKind>> {
    names
        .iter()
        .filter(|n| !n.trim().is_empty())
        .map(|n| {
            BackendKind::parse(n).with_context(|| {
                format!("Unknown backend '{n}' (expected session, headless or static)")
            })
        })
        .collect()
}

/// `<stem>_<unix seconds>.pdf`, used when the caller gave no output path.
fn generated_filename() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("document_{secs}.pdf")
}

async fn print_json(cli: &Cli, outcome: Result<ConversionResult, ConversionError>) -> Result<()> {
    let response_json = match &outcome {
        Ok(result) => {
            let filename = match cli.output {
                Some(ref path) => {
                    write_atomic(path, &result.bytes)
                        .await
                        .context("Failed to write PDF")?;
                    path.display().to_string()
                }
                None => generated_filename(),
            };
            serde_json::to_string_pretty(&JsonResponse {
                success: true,
                backend_used: Some(&result.backend_used),
                size_bytes: Some(result.size),
                filename: Some(filename),
                pdf_base64: cli.output.is_none().then(|| result.to_base64()),
                warnings: Some(result.warnings.iter().map(ToString::to_string).collect()),
                error: None,
                attempts: &result.attempts,
            })
        }
        Err(err) => serde_json::to_string_pretty(&JsonResponse {
            success: false,
            backend_used: None,
            size_bytes: None,
            filename: None,
            pdf_base64: None,
            warnings: None,
            error: Some(err.to_string()),
            attempts: err.attempts(),
        }),
    }
    .context("Failed to serialise output")?;

    println!("{response_json}");

    match outcome {
        Ok(_) => Ok(()),
        Err(err) => Err(err).context("Conversion failed"),
    }
}

fn print_summary(result: &ConversionResult, output: Option<&Path>, progress_shown: bool) {
    for w in &result.warnings {
        eprintln!("   {} {}", cyan("⚠"), w);
    }
    let target = output
        .map(|p| bold(&p.display().to_string()))
        .unwrap_or_else(|| dim("stdout"));
    if progress_shown {
        eprintln!(
            "   {} bytes  {}ms  →  {}",
            result.size, result.duration_ms, target
        );
    } else {
        eprintln!(
            "Rendered {} bytes with {} in {}ms ({} fallbacks) → {}",
            result.size,
            result.backend_used,
            result.duration_ms,
            result.fallbacks(),
            target
        );
    }
}

fn print_failure(err: &ConversionError) {
    eprintln!("{} {}", red("✘"), bold(&failure_headline(err)));
    for (i, attempt) in err.attempts().iter().enumerate() {
        eprintln!("   {}", dim(&format!("{}. {}", i + 1, attempt)));
    }
}

/// First line of the error; the attempt list is printed separately.
fn failure_headline(err: &ConversionError) -> String {
    let message = err.to_string();
    let first = message.lines().next().unwrap_or_default();
    first.trim_end_matches(':').to_string()
}

fn print_check_report(statuses: &[BackendStatus]) {
    println!("{}", bold("Backends (chain order):"));
    for s in statuses {
        let mark = if s.available { green("✓") } else { red("✗") };
        let where_ = match (&s.tool_path, &s.detail) {
            (Some(path), _) => path.display().to_string(),
            (None, Some(detail)) => detail.clone(),
            (None, None) => String::from("-"),
        };
        println!(
            "  {} {:<26} {:<12} {}",
            mark,
            s.id,
            dim(s.tool),
            where_
        );
    }

    println!();
    println!("{}", bold("Search order:"));
    for tool in [tool_locate::CHROME, tool_locate::WKHTMLTOPDF] {
        let list = tool_locate::candidates(tool)
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        println!("  {:<12} {}", tool, dim(&list));
    }
}
