// vidscribe CLI shell.
//
// Argument parsing, logging setup, signal wiring and the final summary
// live here; everything else is the library's job.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use vidscribe::config::BatchConfig;
use vidscribe::engine::{WhisperCli, WHISPER_MODELS};
use vidscribe::ledger::{Ledger, LEDGER_FILE_NAME};
use vidscribe::media::FfmpegExtractor;
use vidscribe::pipeline::TaskContext;
use vidscribe::{discovery, files, scheduler};

#[derive(Debug, Parser)]
#[command(
    name = "vidscribe",
    version,
    about = "Convert video files to text using ffmpeg and whisper.cpp"
)]
struct Cli {
    /// Input directory containing video files
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output directory for transcript files
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Whisper model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Directory holding ggml model files
    #[arg(long)]
    model_dir: Option<PathBuf>,

    /// Audio language hint (auto for detection)
    #[arg(short, long)]
    language: Option<String>,

    /// Number of parallel workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Skip files that were already processed successfully
    #[arg(short, long)]
    skip_existing: bool,

    /// Output format: txt, srt, vtt or json
    #[arg(long)]
    format: Option<String>,

    /// Interleave [start --> end] markers in txt output
    #[arg(long)]
    timestamps: bool,

    /// Keep extracted wav files instead of deleting them
    #[arg(long)]
    no_cleanup: bool,

    /// Do not descend into subdirectories
    #[arg(long)]
    no_recursive: bool,

    /// Move successfully processed source files to this directory
    #[arg(long, value_name = "DIR")]
    move_done: Option<PathBuf>,

    /// Configuration file (JSON); command-line flags win
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List available whisper models and exit
    #[arg(long)]
    list_models: bool,

    /// Minimal output
    #[arg(short, long)]
    quiet: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Config file first, then flags on top.
    fn into_config(self) -> Result<BatchConfig> {
        let mut config = match &self.config {
            Some(path) => BatchConfig::load(path)?,
            None => BatchConfig::default(),
        };

        if let Some(input) = self.input {
            config.input_dir = input;
        }
        if let Some(output) = self.output {
            config.output_dir = output;
        }
        if let Some(model) = self.model {
            config.model = model;
        }
        if let Some(model_dir) = self.model_dir {
            config.model_dir = Some(model_dir);
        }
        if let Some(language) = self.language {
            config.language = language;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if self.skip_existing {
            config.skip_existing = true;
        }
        if let Some(format) = self.format {
            config.format = format;
        }
        if self.timestamps {
            config.timestamps = true;
        }
        if self.no_cleanup {
            config.keep_temp = true;
        }
        if self.no_recursive {
            config.recursive = false;
        }
        if let Some(done) = self.move_done {
            config.done_dir = Some(done);
        }
        Ok(config)
    }
}

fn init_logging(quiet: bool, verbose: bool) {
    // RUST_LOG still wins when set; the flags only pick the default.
    let default = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp_secs()
        .init();
}

/// Build the shared task context, failing fast on anything that would make
/// every task fail anyway (missing engines, unwritable directories).
fn setup(config: BatchConfig, cancel: CancellationToken) -> Result<TaskContext> {
    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!(
            "cannot create output directory {}",
            config.output_dir.display()
        )
    })?;
    std::fs::create_dir_all(config.temp_audio_dir()).with_context(|| {
        format!(
            "cannot create temp directory {}",
            config.temp_audio_dir().display()
        )
    })?;

    let extractor = FfmpegExtractor::discover(config.audio.clone(), config.stall_timeout())?;
    let transcriber = WhisperCli::discover(
        config.model_path(),
        config.model.clone(),
        config.stall_timeout(),
    )?;

    let ledger = Ledger::load_or_default(config.output_dir.join(LEDGER_FILE_NAME));

    Ok(TaskContext {
        config,
        extractor: Arc::new(extractor),
        transcriber: Arc::new(transcriber),
        ledger: Arc::new(ledger),
        cancel,
    })
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    if cli.list_models {
        println!("Available whisper models:");
        for model in WHISPER_MODELS {
            println!("  - {}", model);
        }
        return Ok(ExitCode::SUCCESS);
    }

    init_logging(cli.quiet, cli.verbose);

    let config = cli.into_config()?;
    let issues = config.validate();
    if !issues.is_empty() {
        for issue in &issues {
            eprintln!("configuration error: {}", issue);
        }
        return Err(anyhow!("invalid configuration"));
    }

    let items = discovery::scan(&config.input_dir, config.recursive)?;
    if items.is_empty() {
        info!("no video files found in {}", config.input_dir.display());
        return Ok(ExitCode::SUCCESS);
    }
    info!("found {} video files", items.len());

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("shutdown requested; finishing in-flight tasks");
            signal_token.cancel();
        }
    });

    let keep_temp = config.keep_temp;
    let temp_audio_dir = config.temp_audio_dir();
    let ctx = Arc::new(setup(config, cancel.clone())?);

    let stats = scheduler::run_batch(ctx, items).await;

    if !keep_temp {
        files::cleanup_temp_files(&temp_audio_dir, 0);
    }

    print!("{}", stats.render());

    if stats.interrupted {
        // Conventional exit code for SIGINT.
        Ok(ExitCode::from(130))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
