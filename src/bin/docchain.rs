//! CLI binary for docchain.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ChainConfig` and prints the extracted documents as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use docchain::{
    process_batch, process_to_file, ChainConfig, ChainOutput, ChainProgressCallback,
    ParseFailurePolicy, ProgressCallback, PromptStage,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar step per stage per image; one log line per finished image.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<String, Instant>>,
    failed: AtomicUsize,
}

impl CliProgressCallback {
    fn new(images: usize, stages: usize) -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} stages  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        let bar = ProgressBar::new((images * stages) as u64);
        bar.set_style(style);
        bar.set_prefix("Extracting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            failed: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, label: &str) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(label))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn finish(&self, images: usize) {
        self.bar.finish_and_clear();
        let failed = self.failed.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!("{} {} images processed", green("✔"), bold(&images.to_string()));
        } else {
            eprintln!(
                "{} {}/{} images processed  ({} failed)",
                red("✘"),
                images - failed,
                images,
                red(&failed.to_string())
            );
        }
    }
}

impl ChainProgressCallback for CliProgressCallback {
    fn on_chain_start(&self, label: &str, _total_stages: usize) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert(label.to_string(), Instant::now());
        }
    }

    fn on_stage_start(&self, label: &str, stage: usize, total_stages: usize) {
        self.bar
            .set_message(format!("{label} stage {stage}/{total_stages}"));
    }

    fn on_stage_complete(&self, _label: &str, _stage: usize, _total: usize, _items: usize) {
        self.bar.inc(1);
    }

    fn on_stage_skipped(&self, _label: &str, _stage: usize, _total: usize) {
        self.bar.inc(1);
    }

    fn on_parse_failure(&self, label: &str, stage: usize, reason: &str) {
        self.bar.println(format!(
            "  {} {}  stage {} unparsable: {}",
            yellow("⚠"),
            label,
            stage,
            dim(reason)
        ));
        self.bar.inc(1);
    }

    fn on_chain_complete(&self, label: &str, documents: usize) {
        let secs = self.elapsed_secs(label);
        self.bar.println(format!(
            "  {} {}  {}  {}",
            green("✓"),
            label,
            dim(&format!("{documents} documents")),
            dim(&format!("{secs:.1}s")),
        ));
    }

    fn on_chain_error(&self, label: &str, error: &str) {
        let secs = self.elapsed_secs(label);
        self.failed.fetch_add(1, Ordering::SeqCst);

        let msg = match error.char_indices().nth(79) {
            Some((idx, _)) => format!("{}\u{2026}", &error[..idx]),
            None => error.to_string(),
        };
        self.bar.println(format!(
            "  {} {}  {}  {}",
            red("✗"),
            label,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract documents from a scan (JSON array on stdout)
  docchain scan.png

  # Write the documents to a file
  docchain scan.png -o documents.json

  # Several images, three at a time, full per-stage reports
  docchain --concurrency 3 --json front.jpg back.jpg > reports.json

  # Image from a URL, with MIME type detected from the bytes
  docchain --detect-mime https://example.com/bill.jpg

  # Fail instead of returning [] when the model answers with prose
  docchain --strict scan.png

  # Custom chain: one template file per stage, run in order
  docchain --prompt classify.txt --prompt extract.txt scan.png

OUTPUT:
  One input:       a JSON array of document objects
  Several inputs:  a JSON object mapping each input to its array
  --json:          the full result (documents, stage reports, token stats)

  The process exits with an error when any image fails to process.
  An image with no documents is not an error; it yields [].

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY          Google Gemini API key
  DOCCHAIN_MODEL          Override model ID
  DOCCHAIN_ENDPOINT       Override API base URL
  RUST_LOG                Override log filter (e.g. docchain=debug)
"#;

/// Classify and extract documents from images with a Gemini prompt chain.
#[derive(Parser, Debug)]
#[command(
    name = "docchain",
    version,
    about = "Classify and extract documents from images with a Gemini vision prompt chain",
    long_about = "Send each image through a two-stage prompt chain: the first stage lists the \
documents it contains, the second extracts the fields of each one. Prints the documents \
as JSON.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local image paths or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// Write the documents JSON to this file instead of stdout (single input only).
    #[arg(short, long, env = "DOCCHAIN_OUTPUT")]
    output: Option<PathBuf>,

    /// Gemini model ID.
    #[arg(long, env = "DOCCHAIN_MODEL", default_value = docchain::pipeline::llm::DEFAULT_MODEL)]
    model: String,

    /// Gemini API key (falls back to GEMINI_API_KEY).
    #[arg(long, env = "DOCCHAIN_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// API base URL.
    #[arg(long, env = "DOCCHAIN_ENDPOINT", default_value = docchain::pipeline::llm::DEFAULT_ENDPOINT)]
    endpoint: String,

    /// MIME type sent with the image.
    #[arg(long, env = "DOCCHAIN_MIME_TYPE", default_value = docchain::pipeline::encode::DEFAULT_MIME_TYPE)]
    mime_type: String,

    /// Detect the MIME type from the image bytes; --mime-type is the fallback.
    #[arg(long, env = "DOCCHAIN_DETECT_MIME")]
    detect_mime: bool,

    /// Fail the image when a stage's output cannot be parsed, instead of continuing with [].
    #[arg(long, env = "DOCCHAIN_STRICT")]
    strict: bool,

    /// Call the model for {documents} stages even when the previous stage found nothing.
    #[arg(long, env = "DOCCHAIN_NO_SKIP_EMPTY")]
    no_skip_empty: bool,

    /// Prompt template file for one stage; repeat in chain order. Replaces the built-in chain.
    #[arg(long = "prompt", value_name = "FILE")]
    prompts: Vec<PathBuf>,

    /// Number of images processed at once.
    #[arg(short, long, env = "DOCCHAIN_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Per-call model timeout in seconds.
    #[arg(long, env = "DOCCHAIN_API_TIMEOUT", default_value_t = 60,
          value_parser = clap::value_parser!(u64).range(1..))]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "DOCCHAIN_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Output the full result (stage reports, token stats) instead of the documents only.
    #[arg(long, env = "DOCCHAIN_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "DOCCHAIN_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCCHAIN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "DOCCHAIN_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs unless --verbose is given.
    let show_progress = !cli.quiet && !cli.no_progress;
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
        .with_writer(std::io::stderr)
        .init();

    if cli.output.is_some() && cli.inputs.len() > 1 {
        anyhow::bail!("--output accepts a single input ({} given)", cli.inputs.len());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let stages = load_stages(&cli.prompts).await?;
    let stage_count = stages
        .as_ref()
        .map_or_else(|| docchain::default_stages().len(), Vec::len);

    let progress = show_progress.then(|| CliProgressCallback::new(cli.inputs.len(), stage_count));
    let config = build_config(
        &cli,
        stages,
        progress.clone().map(|cb| cb as ProgressCallback),
    )?;

    // ── Run ──────────────────────────────────────────────────────────────
    if let Some(ref output_path) = cli.output {
        let result = process_to_file(&cli.inputs[0], output_path, &config).await;
        if let Some(ref cb) = progress {
            cb.finish(1);
        }
        let output = result.context("Processing failed")?;

        if !cli.quiet {
            print_summary(&output);
            eprintln!("   →  {}", bold(&output_path.display().to_string()));
        }
        return Ok(());
    }

    let results = process_batch(cli.inputs.clone(), &config)
        .await
        .context("Processing failed")?;
    if let Some(ref cb) = progress {
        cb.finish(results.len());
    }

    let mut outputs = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(output) => outputs.push(output),
            Err(e) => failures.push(e),
        }
    }

    // A failed single image prints nothing so `[]` always means "no documents".
    let single = cli.inputs.len() == 1;
    if !(single && outputs.is_empty()) {
        println!("{}", render_outputs(&outputs, single, cli.json)?);
    }

    if !cli.quiet && !show_progress {
        for output in &outputs {
            print_summary(output);
        }
    }

    if !failures.is_empty() {
        for e in &failures {
            eprintln!("{} {e}", red("error:"));
        }
        anyhow::bail!(
            "{} of {} images failed to process",
            failures.len(),
            cli.inputs.len()
        );
    }

    Ok(())
}

/// Map CLI args to `ChainConfig`.
fn build_config(
    cli: &Cli,
    stages: Option<Vec<PromptStage>>,
    progress: Option<ProgressCallback>,
) -> Result<ChainConfig> {
    let policy = if cli.strict {
        ParseFailurePolicy::Abort
    } else {
        ParseFailurePolicy::ContinueEmpty
    };

    let mut builder = ChainConfig::builder()
        .model(cli.model.as_str())
        .endpoint(cli.endpoint.as_str())
        .mime_type(cli.mime_type.as_str())
        .detect_mime_type(cli.detect_mime)
        .parse_failure_policy(policy)
        .skip_empty_stages(!cli.no_skip_empty)
        .concurrency(cli.concurrency)
        .api_timeout_secs(cli.api_timeout)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key.as_str());
    }
    if let Some(stages) = stages {
        builder = builder.stages(stages);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

/// Read `--prompt` files into stages named after their file stems.
async fn load_stages(paths: &[PathBuf]) -> Result<Option<Vec<PromptStage>>> {
    if paths.is_empty() {
        return Ok(None);
    }

    let mut stages = Vec::with_capacity(paths.len());
    for path in paths {
        let template = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        stages.push(PromptStage::new(stage_name(path), template));
    }
    Ok(Some(stages))
}

fn stage_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Documents only by default; the full `ChainOutput` with `--json`.
/// Several inputs are keyed by label.
fn render_outputs(outputs: &[ChainOutput], single: bool, full: bool) -> Result<String> {
    let to_value = |output: &ChainOutput| -> Result<Value> {
        let value = if full {
            serde_json::to_value(output)
        } else {
            serde_json::to_value(&output.documents)
        };
        value.context("Failed to serialise output")
    };

    let value = match outputs {
        [output] if single => to_value(output)?,
        _ => {
            let mut map = Map::new();
            for output in outputs {
                let key = unique_key(&map, &output.label);
                map.insert(key, to_value(output)?);
            }
            Value::Object(map)
        }
    };

    serde_json::to_string_pretty(&value).context("Failed to serialise output")
}

/// `label`, or `label#2`, `label#3`, ... when the same input was given again.
fn unique_key(map: &Map<String, Value>, label: &str) -> String {
    if !map.contains_key(label) {
        return label.to_string();
    }
    (2..)
        .map(|n| format!("{label}#{n}"))
        .find(|key| !map.contains_key(key))
        .unwrap_or_else(|| label.to_string())
}

fn print_summary(output: &ChainOutput) {
    let stats = &output.stats;
    let mark = if output.is_degraded() {
        yellow("⚠")
    } else {
        green("✔")
    };
    eprintln!(
        "{}  {}  {} documents  {}/{} stages  {}ms",
        mark,
        output.label,
        stats.documents,
        stats.stages_run,
        stats.stages_run + stats.stages_skipped,
        stats.total_duration_ms,
    );
    eprintln!(
        "   {} tokens in  /  {} tokens out",
        dim(&stats.total_input_tokens.to_string()),
        dim(&stats.total_output_tokens.to_string()),
    );
}
