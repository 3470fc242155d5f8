//! CLI binary for edgequake-pdf2records.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, runs a file or a directory, and writes one JSON result
//! per input.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf2records::convert::document_records;
use edgequake_pdf2records::{
    write_result, BatchProgressCallback, BatchRunner, ConversionResult, MetricsCollector,
    Outcome, Pipeline, PipelineConfig, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress: one bar plus a log line per finished document.
/// Documents in a group finish out of order, so start times are keyed by index.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.set_message("Scanning input…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&index)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_files: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_files as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Converting");
        self.bar.reset_eta();
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Converting {total_files} document(s)…"))
        ));
    }

    fn on_document_start(&self, index: usize, _total: usize, path: &Path) {
        self.start_times
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(index, Instant::now());
        self.bar.set_message(path.display().to_string());
    }

    fn on_document_complete(&self, index: usize, total: usize, result: &ConversionResult) {
        let secs = self.elapsed_secs(index);
        let name = result.source_file().unwrap_or("?").to_string();
        let line = match (result.outcome(), result.document()) {
            (Outcome::Success, Some(doc)) => format!(
                "  {} {:>3}/{:<3}  {}  {}  {}",
                green("✓"),
                index + 1,
                total,
                name,
                dim(&format!("{} records", document_records(doc))),
                dim(&format!("{secs:.1}s")),
            ),
            (Outcome::Partial, _) => format!(
                "  {} {:>3}/{:<3}  {}  {}  {}",
                yellow("~"),
                index + 1,
                total,
                name,
                yellow("partial"),
                dim(&format!("{secs:.1}s")),
            ),
            _ => {
                let msg = result
                    .error()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "Unknown error".to_string());
                let msg = match msg.char_indices().nth(80) {
                    Some((cut, _)) => format!("{}\u{2026}", &msg[..cut]),
                    None => msg,
                };
                format!(
                    "  {} {:>3}/{:<3}  {}  {}  {}",
                    red("✗"),
                    index + 1,
                    total,
                    name,
                    red(&msg),
                    dim(&format!("{secs:.1}s")),
                )
            }
        };
        self.bar.println(line);
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total_files: usize, success_count: usize) {
        let failed = total_files.saturating_sub(success_count);
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {} document(s) converted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} documents converted  ({} failed)",
                if failed == total_files { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total_files,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert every PDF in ./input to ./output/<name>.json (local Ollama)
  pdf2records

  # One file, print the result instead of writing it
  pdf2records fixtures.pdf --stdout

  # A directory, 8 at a time, with the extracted text alongside
  pdf2records ./sheets -o ./records --concurrency 8 --text-sidecar

  # Hosted provider
  pdf2records ./sheets --provider openai --model gpt-4.1-mini

  # Is the inference service up?
  pdf2records --check

ENVIRONMENT VARIABLES:
  PDF2RECORDS_*           Every flag, e.g. PDF2RECORDS_CONCURRENCY=8
  OPENAI_API_KEY          OpenAI API key (--provider openai / auto)
  ANTHROPIC_API_KEY       Anthropic API key (--provider anthropic / auto)
  GEMINI_API_KEY          Google Gemini API key (--provider gemini / auto)
  PDFIUM_LIB_PATH         Path to libpdfium; defaults to the system library
  RUST_LOG                Overrides the log filter

EXIT STATUS:
  0  every document converted (partial results count as converted)
  1  invalid configuration, unreachable service with --check, or any failed document
"#;

/// Extract structured match records from PDF documents with an LLM.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2records",
    version,
    about = "Extract structured match records from PDF documents with an LLM",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// PDF file or directory of PDFs. Default: the source directory.
    input: Option<PathBuf>,

    /// Directory scanned when no input is given.
    #[arg(long, env = "PDF2RECORDS_SOURCE_DIR", default_value = "./input")]
    source_dir: PathBuf,

    /// Directory JSON results are written to.
    #[arg(short, long, env = "PDF2RECORDS_OUTPUT_DIR", default_value = "./output")]
    output_dir: PathBuf,

    /// Inference provider: ollama, auto, openai, anthropic, gemini, azure, …
    #[arg(long, env = "PDF2RECORDS_PROVIDER", default_value = "ollama")]
    provider: String,

    /// Ollama base URL.
    #[arg(long, env = "PDF2RECORDS_HOST", default_value = "http://localhost:11434")]
    host: String,

    /// Model identifier.
    #[arg(short, long, env = "PDF2RECORDS_MODEL", default_value = "llama3.1")]
    model: String,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "PDF2RECORDS_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Max tokens generated per document.
    #[arg(long, env = "PDF2RECORDS_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// Per-attempt inference timeout in milliseconds (1000–300000).
    #[arg(long, env = "PDF2RECORDS_TIMEOUT_MS", default_value_t = 30_000)]
    timeout_ms: u64,

    /// Inference attempts per document (0–10).
    #[arg(long, env = "PDF2RECORDS_RETRY_ATTEMPTS", default_value_t = 3)]
    retry_attempts: u32,

    /// Delay between attempts in milliseconds.
    #[arg(long, env = "PDF2RECORDS_RETRY_DELAY_MS", default_value_t = 1000)]
    retry_delay_ms: u64,

    /// How long a connectivity check is reused, in milliseconds.
    #[arg(long, env = "PDF2RECORDS_HEALTH_CHECK_TTL_MS", default_value_t = 60_000)]
    health_check_ttl_ms: u64,

    /// Extracted text beyond this many characters is truncated.
    #[arg(long, env = "PDF2RECORDS_MAX_TEXT_LENGTH", default_value_t = 100_000)]
    max_text_length: usize,

    /// Characters of text sent to the model per document.
    #[arg(long, env = "PDF2RECORDS_CHUNK_SIZE", default_value_t = 4000)]
    chunk_size: usize,

    /// Largest accepted input file in bytes.
    #[arg(long, env = "PDF2RECORDS_MAX_FILE_SIZE", default_value_t = 50 * 1024 * 1024)]
    max_file_size: u64,

    /// Documents converted concurrently (1–50).
    #[arg(short, long, env = "PDF2RECORDS_CONCURRENCY", default_value_t = 5)]
    concurrency: usize,

    /// Also write the extracted text as <name>.txt.
    #[arg(long, env = "PDF2RECORDS_TEXT_SIDECAR")]
    text_sidecar: bool,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PDF2RECORDS_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Log level: error, warn, info, debug, trace.
    #[arg(long, env = "PDF2RECORDS_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Print results as JSON on stdout instead of writing files.
    #[arg(long)]
    stdout: bool,

    /// Only test connectivity to the inference service.
    #[arg(long)]
    check: bool,

    /// Print a metrics summary when done.
    #[arg(long, env = "PDF2RECORDS_METRICS")]
    metrics: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF2RECORDS_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2RECORDS_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2RECORDS_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level logs unless verbose is on.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.stdout && !cli.check;
    let filter = if cli.verbose {
        "debug".to_string()
    } else if cli.quiet || show_progress {
        "error".to_string()
    } else {
        cli.log_level.to_lowercase()
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config and pipeline ────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb).await?;

    let metrics = Arc::new(MetricsCollector::new());
    let pipeline = Arc::new(
        Pipeline::from_config(&config, Arc::clone(&metrics))
            .context("Failed to initialise pipeline")?,
    );

    // ── Connectivity check only ──────────────────────────────────────────
    if cli.check {
        let name = pipeline.inference().backend_name().to_string();
        return Ok(if pipeline.test_connection().await {
            println!("{} {} is reachable", green("✔"), name);
            ExitCode::SUCCESS
        } else {
            println!("{} {} is not reachable", red("✘"), name);
            ExitCode::FAILURE
        });
    }

    let sampler = cli
        .metrics
        .then(|| metrics.spawn_sampler(Duration::from_secs(5)));

    // ── Run ──────────────────────────────────────────────────────────────
    let input = cli.input.clone().unwrap_or_else(|| config.source_dir.clone());
    let runner = BatchRunner::from_config(Arc::clone(&pipeline), &config);
    let started = Instant::now();
    let results = if input.is_file() {
        runner.process_files(vec![input.clone()]).await
    } else {
        runner.process_batch(&input).await
    };

    // ── Emit results ─────────────────────────────────────────────────────
    if cli.stdout {
        let json = if input.is_file() && results.len() == 1 {
            serde_json::to_string_pretty(&results[0])
        } else {
            serde_json::to_string_pretty(&results)
        }
        .context("Failed to serialise results")?;
        println!("{json}");
    } else {
        for result in &results {
            let path = write_result(result, &config.output_dir, config.write_text_sidecar)
                .await
                .with_context(|| {
                    format!("Failed to write results to {}", config.output_dir.display())
                })?;
            if !cli.quiet && !show_progress {
                eprintln!("  → {}", path.display());
            }
        }
    }

    let failed = results.iter().filter(|r| !r.is_success()).count();
    if !cli.quiet && !show_progress {
        eprintln!(
            "Converted {}/{} document(s) in {}ms",
            results.len() - failed,
            results.len(),
            started.elapsed().as_millis()
        );
    }

    if cli.metrics {
        metrics.snapshot();
        if let Some(handle) = sampler {
            handle.abort();
        }
        eprintln!("\n{}", metrics.summary());
        if let Some(recent) = metrics.recent_stats(Duration::from_secs(15 * 60)) {
            eprintln!(
                "Last {}s: {} conversions, {:.1}% success",
                recent.window_ms / 1000,
                recent.conversions,
                recent.success_rate * 100.0
            );
        }
    }

    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .provider_name(&cli.provider)
        .host(&cli.host)
        .model(&cli.model)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .timeout_ms(cli.timeout_ms)
        .retry_attempts(cli.retry_attempts)
        .retry_delay_ms(cli.retry_delay_ms)
        .health_check_ttl_ms(cli.health_check_ttl_ms)
        .max_text_length(cli.max_text_length)
        .chunk_size(cli.chunk_size)
        .max_file_size_bytes(cli.max_file_size)
        .concurrency(cli.concurrency)
        .source_dir(&cli.source_dir)
        .output_dir(&cli.output_dir)
        .write_text_sidecar(cli.text_sidecar)
        .log_level(&cli.log_level);

    if let Some(ref path) = cli.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
