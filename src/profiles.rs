//! Launch profiles: the fixed argument sets each backend invokes its tool with.
//!
//! Keeping every flag list here gives one place to tune for a new container
//! image, and lets tests inspect the exact command lines without launching
//! anything.
//!
//! The flags target a containerised, single-process environment: no GPU, a
//! tiny `/dev/shm`, no D-Bus, no sandbox-capable kernel. They are the flag
//! set that survived production on such hosts; most of them are harmless on
//! a workstation.

use crate::config::PrintOptions;
use once_cell::sync::Lazy;
use regex::Regex;

/// Tool name plus the static part of its command line.
///
/// Per-request arguments (output path, time budget, target URL) are appended
/// by the backend at render time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchProfile {
    /// Logical tool name passed to the [`crate::tools::BinaryResolver`].
    pub tool: &'static str,
    pub args: Vec<String>,
}

impl LaunchProfile {
    pub fn new(tool: &'static str, args: &[&str]) -> Self {
        Self {
            tool,
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }
    }
}

/// Flags shared by every Chromium launch.
pub const CONTAINER_CHROME_FLAGS: &[&str] = &[
    "--headless",
    "--no-sandbox",
    "--disable-gpu",
    "--disable-dev-shm-usage",
    "--disable-extensions",
    "--disable-plugins",
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-renderer-backgrounding",
    "--disable-ipc-flooding-protection",
    "--disable-software-rasterizer",
    "--disable-dbus",
    "--disable-features=TranslateUI,VizDisplayCompositor,AudioServiceOutOfProcess,DialMediaRouteProvider",
    "--hide-scrollbars",
    "--font-render-hinting=none",
    "--disable-font-subpixel-positioning",
    "--force-color-profile=srgb",
    "--disable-lcd-text",
    "--no-first-run",
    "--no-default-browser-check",
];

/// Extra flags for a one-shot `--print-to-pdf` run.
///
/// `--single-process` and `--no-zygote` keep the process tree to one PID,
/// which is what makes killing it on timeout reliable.
pub const PRINT_TO_PDF_FLAGS: &[&str] = &[
    "--single-process",
    "--no-zygote",
    "--disable-logging",
    "--run-all-compositor-stages-before-draw",
    "--print-to-pdf-no-header",
];

/// Extra flags for a DevTools-controlled session.
pub const SESSION_FLAGS: &[&str] = &[
    "--remote-debugging-port=0",
    "--remote-allow-origins=*",
    "--mute-audio",
    "--password-store=basic",
    "--use-mock-keychain",
];

pub fn headless_direct() -> LaunchProfile {
    let mut profile = LaunchProfile::new(crate::tools::CHROME, CONTAINER_CHROME_FLAGS);
    profile
        .args
        .extend(PRINT_TO_PDF_FLAGS.iter().map(|a| (*a).to_string()));
    profile
}

pub fn scripted_session() -> LaunchProfile {
    let mut profile = LaunchProfile::new(crate::tools::CHROME, CONTAINER_CHROME_FLAGS);
    profile
        .args
        .extend(SESSION_FLAGS.iter().map(|a| (*a).to_string()));
    profile
}

/// wkhtmltopdf flags independent of the print options.
pub fn static_html() -> LaunchProfile {
    LaunchProfile::new(
        crate::tools::WKHTMLTOPDF,
        &[
            "--quiet",
            "--disable-javascript",
            "--encoding",
            "utf-8",
            "--enable-local-file-access",
            "--load-error-handling",
            "ignore",
        ],
    )
}

/// wkhtmltopdf page-layout flags for `print`.
pub fn wkhtmltopdf_layout_args(print: &PrintOptions) -> Vec<String> {
    let margin = format!("{:.1}mm", print.margin_mm());
    let mut args = vec!["--page-size".to_string(), print.paper.name().to_string()];
    for side in ["--margin-top", "--margin-bottom", "--margin-left", "--margin-right"] {
        args.push(side.to_string());
        args.push(margin.clone());
    }
    args.push(
        if print.landscape {
            "--orientation=Landscape"
        } else {
            "--orientation=Portrait"
        }
        .to_string(),
    );
    if !print.print_background {
        args.push("--no-background".to_string());
    }
    args
}

// ── Print stylesheet ─────────────────────────────────────────────────────

/// Stylesheet injected into fetched markup before static conversion.
///
/// Blanks the page-margin boxes (no URL/date headers) and lets common
/// content wrappers use the full printable width.
pub fn print_css(print: &PrintOptions) -> String {
    format!(
        r#"<style>
@media print {{
  @page {{
    margin: {margin}in;
    size: {paper} {orientation};
    @top-left {{ content: ""; }}
    @top-center {{ content: ""; }}
    @top-right {{ content: ""; }}
    @bottom-left {{ content: ""; }}
    @bottom-center {{ content: ""; }}
    @bottom-right {{ content: ""; }}
  }}
  body {{ margin: 0; padding: 20px; font-family: Arial, sans-serif; }}
  .container, .invoice-container, .main-content {{
    width: 100% !important;
    max-width: none !important;
    margin: 0 !important;
  }}
}}
</style>"#,
        margin = print.margin_inches,
        paper = print.paper.name(),
        orientation = if print.landscape { "landscape" } else { "portrait" },
    )
}

static HEAD_CLOSE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?i)</head\s*>").ok());
static HEAD_OPEN: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?i)<head(\s[^>]*)?>").ok());

/// Insert `css` before `</head>`, else right after `<head>`, else at the top.
pub fn inject_css(html: &str, css: &str) -> String {
    if let Some(m) = HEAD_CLOSE.as_ref().and_then(|re| re.find(html)) {
        return splice(html, m.start(), css);
    }
    if let Some(m) = HEAD_OPEN.as_ref().and_then(|re| re.find(html)) {
        return splice(html, m.end(), css);
    }
    format!("{css}\n{html}")
}

fn splice(html: &str, at: usize, css: &str) -> String {
    let mut out = String::with_capacity(html.len() + css.len() + 2);
    out.push_str(&html[..at]);
    out.push('\n');
    out.push_str(css);
    out.push('\n');
    out.push_str(&html[at..]);
    out
}
