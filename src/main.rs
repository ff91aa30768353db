//! Litter box agent CLI
//!
//! Watches the camera folder and reports who used the litter box.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use litterbox_agent::{
    config::{Config, DirectionMode, SinkKind},
    core::{classify_record, Ingestor},
    pipeline::{Pipeline, PipelineSettings},
    sink::{HttpSink, JsonlSink, Reporter, ResultSink, RetryingSink},
    stats::{create_shared_log_with_persistence, ActivityLog},
    vision::{BlockingVisionClient, Classifier, VisionEndpoint},
    watcher::DirectoryWatcher,
    VERSION,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "litterbox")]
#[command(version = VERSION)]
#[command(about = "Decides, per burst of camera photos, who used the litter box", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the camera folder and decide every burst
    Watch {
        /// Folder the camera drops photos into
        #[arg(long)]
        folder: Option<PathBuf>,

        /// Number of photos that completes a burst
        #[arg(long)]
        batch_size: Option<usize>,

        /// Seconds a burst may stay open before it is decided anyway
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Classify a single photo and print the result
    Classify {
        /// Photo to classify
        file: PathBuf,
    },

    /// Show persisted activity statistics
    Status,

    /// Show configuration
    Config,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let result = match cli.command {
        Commands::Watch {
            folder,
            batch_size,
            timeout,
        } => cmd_watch(cli.config.as_deref(), folder, batch_size, timeout),
        Commands::Classify { file } => cmd_classify(cli.config.as_deref(), &file),
        Commands::Status => cmd_status(cli.config.as_deref()),
        Commands::Config => cmd_config(cli.config.as_deref()),
    };

    if let Err(e) = result {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Load the configuration file and apply environment overrides.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(Config::config_path);
    let mut config = Config::load_from(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    config.apply_env();
    Ok(config)
}

fn cmd_watch(
    config_path: Option<&Path>,
    folder: Option<PathBuf>,
    batch_size: Option<usize>,
    timeout: Option<u64>,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(folder) = folder {
        config.watch_folder = folder;
    }
    if let Some(batch_size) = batch_size {
        config.batch_size = batch_size;
    }
    if let Some(secs) = timeout {
        config.window_timeout = Duration::from_secs(secs);
    }
    config.validate().context("invalid configuration")?;
    if let Err(e) = config.ensure_directories() {
        warn!("Could not create data directories: {e}");
    }

    println!("Litter Box Agent v{VERSION}");
    println!();
    println!("  Watching: {}", config.watch_folder.display());
    println!(
        "  Burst: {} photos or {}s",
        config.batch_size,
        config.window_timeout.as_secs()
    );
    println!(
        "  Direction: {}",
        match config.direction_mode {
            DirectionMode::Combined => "combined with identity",
            DirectionMode::Separate => "separate model",
        }
    );
    println!("  Sink: {}", describe_sink(&config));
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let stats = create_shared_log_with_persistence(config.activity_path());
    let ingestor = build_ingestor(&config)?;
    let reporter = Reporter::new(build_sink(&config)?, Some(JsonlSink::new(config.spool_path())));
    let pipeline = Pipeline::new(
        PipelineSettings::from_config(&config),
        ingestor,
        reporter,
        stats.clone(),
    );

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(running.clone())?;

    let mut watcher = DirectoryWatcher::new(&config.watch_folder);
    watcher
        .start()
        .with_context(|| format!("failed to watch {}", config.watch_folder.display()))?;
    info!(folder = %watcher.folder().display(), "watching for photos");

    let outcome = pipeline.run(watcher.receiver().clone(), running);
    watcher.stop();

    println!();
    println!("Stopping...");
    if let Err(e) = stats.save() {
        warn!("Could not save activity stats: {e}");
    }
    println!();
    println!("{}", stats.summary());

    outcome.context("pipeline stopped")
}

fn cmd_classify(config_path: Option<&Path>, file: &Path) -> Result<()> {
    let config = load_config(config_path)?;
    let ingestor = build_ingestor(&config)?;

    let mut record = ingestor
        .ingest(file)
        .with_context(|| format!("failed to classify {}", file.display()))?;

    if config.direction_mode == DirectionMode::Separate && !record.is_negative() {
        if let Some(model) = config.vision.direction_model() {
            let tags = ingestor.predict(file, &model)?;
            let direction = classify_record(&tags, file);
            record = record.with_direction(direction.direction, direction.direction_probability);
        }
    }

    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

fn cmd_status(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;

    println!("Litter Box Agent Status");
    println!("=======================");
    println!();
    println!("Configuration:");
    println!("  Watch folder: {}", config.watch_folder.display());
    println!("  Batch size: {}", config.batch_size);
    println!("  Window timeout: {}s", config.window_timeout.as_secs());
    println!("  Sink: {}", describe_sink(&config));
    println!();

    let path = config.activity_path();
    if path.exists() {
        let stats = ActivityLog::read_persisted(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        println!("{}", stats.summary());
    } else {
        println!("No activity recorded yet.");
    }

    let spool = config.spool_path();
    if spool.exists() {
        let pending = JsonlSink::read_all(&spool)?.len();
        println!();
        println!("Undelivered reports: {pending} ({})", spool.display());
    }
    Ok(())
}

fn cmd_config(config_path: Option<&Path>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if !config.vision.prediction_key.is_empty() {
        config.vision.prediction_key = "<redacted>".to_string();
    }
    if config.sink.token.is_some() {
        config.sink.token = Some("<redacted>".to_string());
    }

    println!("Configuration");
    println!("=============");
    println!();
    println!(
        "Config file: {}",
        config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(Config::config_path)
            .display()
    );
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

fn build_ingestor(config: &Config) -> Result<Ingestor> {
    let endpoint = VisionEndpoint::new(&config.vision.endpoint, &config.vision.prediction_key)
        .with_timeout(config.vision.timeout);
    let client = BlockingVisionClient::new(endpoint).context("failed to create vision client")?;
    let classifier: Arc<dyn Classifier> = Arc::new(client);
    Ok(Ingestor::new(
        classifier,
        config.vision.subject_model(),
        config.read_delay,
    ))
}

fn build_sink(config: &Config) -> Result<Box<dyn ResultSink>> {
    let sink = &config.sink;
    let sink: Box<dyn ResultSink> = match sink.kind {
        SinkKind::Jsonl => Box::new(RetryingSink::new(
            JsonlSink::new(&sink.path),
            sink.max_attempts,
            sink.initial_backoff,
        )),
        SinkKind::Http => {
            let url = sink.url.clone().context("http sink requires sink.url")?;
            let http = HttpSink::new(url, sink.token.clone()).context("failed to create http sink")?;
            Box::new(RetryingSink::new(
                http,
                sink.max_attempts,
                sink.initial_backoff,
            ))
        }
    };
    Ok(sink)
}

fn describe_sink(config: &Config) -> String {
    match config.sink.kind {
        SinkKind::Jsonl => format!("jsonl ({})", config.sink.path.display()),
        SinkKind::Http => format!("http ({})", config.sink.url.as_deref().unwrap_or("unset")),
    }
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("error setting Ctrl+C handler")
}
