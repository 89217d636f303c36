//! Re-Museum CLI
//!
//! Analyzes photos of discarded objects through the vision service, optionally
//! turns them into stickers, or runs the local background removal on its own.

use super::config::CliConfigBuilder;
use crate::{
    config::{OutputFormat, PipelineConfig, RemovalConfig},
    pipeline::{BatchItem, BatchPipeline, ImageInput, ItemStatus},
    removal::remove_background_from_bytes,
    services::{create_cli_progress_reporter, ImageIOService, OutputFormatHandler},
    tracing_config::{init_cli_tracing, spans},
    vision::{GeminiClient, MockVisionService, VisionService},
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

/// Name of the JSON report written into the output directory
const SUMMARY_FILE_NAME: &str = "remuse-summary.json";

/// Re-Museum: archive discarded objects and turn them into stickers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "remuse")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Input image files or directories
    #[arg(value_name = "INPUT", required = true)]
    pub input: Vec<String>,

    /// Output directory for stickers and the JSON summary (summary goes to stdout when unset)
    #[arg(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Only run local background removal on the inputs, no remote calls
    #[arg(long)]
    pub remove_background_only: bool,

    /// Generate a sticker for every successfully analyzed item
    #[arg(long)]
    pub stickers: bool,

    /// Use the offline scripted service instead of the remote model
    #[arg(long)]
    pub offline: bool,

    /// Output format for processed images
    #[arg(short, long, value_enum, default_value_t = CliOutputFormat::Png)]
    pub format: CliOutputFormat,

    /// Brightness at or below which the background becomes fully transparent [default: 60]
    #[arg(long)]
    pub threshold: Option<f32>,

    /// Brightness range over which alpha ramps up to opaque [default: 30]
    #[arg(long)]
    pub feather: Option<f32>,

    /// Items analyzed at once
    #[arg(short, long, default_value_t = 1)]
    pub concurrency: usize,

    /// Timeout for each remote call, in seconds
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    /// Base URL of the credential-injecting proxy (overrides GEMINI_PROXY_URL)
    #[arg(long, value_name = "URL")]
    pub proxy_url: Option<String>,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Process directory recursively
    #[arg(short, long)]
    pub recursive: bool,

    /// Pattern for batch processing (e.g., "*.jpg")
    #[arg(long)]
    pub pattern: Option<String>,

    /// Show detailed per-stage progress instead of a progress bar
    #[arg(long)]
    pub progress: bool,

    /// Write logs to this file instead of stderr (needs the tracing-files feature)
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum CliOutputFormat {
    Png,
    Webp,
    Rgba8,
}

/// Report printed or written at the end of an analysis run
#[derive(Debug, Serialize)]
struct RunSummary {
    session_id: String,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    succeeded: usize,
    failed: usize,
    cancelled: bool,
    items: Vec<SummaryItem>,
}

#[derive(Debug, Serialize)]
struct SummaryItem {
    #[serde(flatten)]
    item: BatchItem,
    /// Where the sticker image was written, if one was made
    #[serde(skip_serializing_if = "Option::is_none")]
    sticker_path: Option<PathBuf>,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let _tracing = init_cli_tracing(cli.verbose, cli.log_file.as_deref())
        .context("Failed to initialize tracing")?;

    CliConfigBuilder::validate_cli(&cli).context("Invalid CLI arguments")?;

    let files = collect_input_files(&cli)?;
    if files.is_empty() {
        warn!("No supported image files found in the provided inputs");
        return Ok(());
    }
    info!("Found {} image file(s) to process", files.len());

    if let Some(dir) = &cli.output {
        prepare_output_dir(dir)?;
    }

    let start_time = Instant::now();
    let processed = if cli.remove_background_only {
        let config = CliConfigBuilder::removal_from_cli(&cli)?;
        remove_backgrounds(&cli, &files, &config).await?
    } else {
        let config = CliConfigBuilder::pipeline_from_cli(&cli)?;
        analyze_files(&cli, &files, config).await?
    };

    info!(
        "Processed {} of {} image(s) in {:.2}s",
        processed,
        files.len(),
        start_time.elapsed().as_secs_f64()
    );

    Ok(())
}

/// Expand the inputs into a sorted list of image files
fn collect_input_files(cli: &Cli) -> Result<Vec<PathBuf>> {
    let mut all_files = Vec::new();

    for input in &cli.input {
        let path = PathBuf::from(input);

        if path.is_file() {
            if ImageIOService::is_supported_format(&path) {
                all_files.push(path);
            } else {
                warn!("Skipping unsupported file: {}", path.display());
            }
        } else if path.is_dir() {
            all_files.extend(find_image_files(&path, cli.recursive, cli.pattern.as_deref())?);
        } else {
            anyhow::bail!(
                "Input path does not exist or is not accessible: {}",
                path.display()
            );
        }
    }

    // Stable processing order
    all_files.sort();
    all_files.dedup();
    Ok(all_files)
}

/// Find image files in a directory
fn find_image_files(dir: &Path, recursive: bool, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();

    for entry in walkdir::WalkDir::new(dir).max_depth(max_depth) {
        let entry = entry.with_context(|| format!("Failed to read {}", dir.display()))?;
        let path = entry.path();
        if entry.file_type().is_file()
            && ImageIOService::is_supported_format(path)
            && matches_pattern(path, pattern)
        {
            files.push(path.to_path_buf());
        }
    }

    Ok(files)
}

/// Check if the file name matches the given pattern
fn matches_pattern(path: &Path, pattern: Option<&str>) -> bool {
    match pattern {
        Some(pat) => path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|filename| {
                glob::Pattern::new(pat)
                    .map(|p| p.matches(filename))
                    .unwrap_or(false)
            }),
        None => true,
    }
}

fn prepare_output_dir(dir: &Path) -> Result<()> {
    if dir.is_file() {
        anyhow::bail!(
            "Output path exists and is a file, not a directory: {}",
            dir.display()
        );
    }
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory: {}", dir.display()))
}

/// Output path `<dir>/<stem>_<suffix>.<ext>`; `dir` defaults to the input's directory
fn output_path(input: &Path, output_dir: Option<&Path>, suffix: &str, format: OutputFormat) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let dir = output_dir
        .or_else(|| input.parent())
        .unwrap_or_else(|| Path::new("."));
    dir.join(format!(
        "{}_{}.{}",
        stem,
        suffix,
        OutputFormatHandler::get_extension(format)
    ))
}

fn progress_bar(len: usize, enabled: bool) -> Option<ProgressBar> {
    if !enabled || len < 2 {
        return None;
    }
    let pb = ProgressBar::new(len as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .map(|style| style.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    Some(pb)
}

/// Run the local chroma key over every file
async fn remove_backgrounds(cli: &Cli, files: &[PathBuf], config: &RemovalConfig) -> Result<usize> {
    let indicatif_progress = progress_bar(files.len(), !cli.progress);
    let mut processed_count = 0;
    let mut failed_count = 0;

    for path in files {
        if let Some(pb) = &indicatif_progress {
            pb.set_message(format!("Processing {}", path.display()));
        }

        let target = output_path(path, cli.output.as_deref(), "sticker", config.output_format);
        match remove_background_file(path, &target, config)
            .instrument(spans::file_processing(path, "remove-background"))
            .await
        {
            Ok(()) => {
                processed_count += 1;
                info!("✅ {} -> {}", path.display(), target.display());
            },
            Err(e) => {
                failed_count += 1;
                error!("❌ Failed to process {}: {:#}", path.display(), e);
            },
        }

        if let Some(pb) = &indicatif_progress {
            pb.inc(1);
        }
    }

    if let Some(pb) = indicatif_progress {
        pb.finish_with_message(format!(
            "Completed! Processed: {processed_count}, Failed: {failed_count}"
        ));
    }
    if failed_count > 0 {
        warn!("Some files failed to process. Processed: {processed_count}, Failed: {failed_count}");
    }

    Ok(processed_count)
}

async fn remove_background_file(input: &Path, target: &Path, config: &RemovalConfig) -> Result<()> {
    let bytes = tokio::fs::read(input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let config = config.clone();
    let encoded = tokio::task::spawn_blocking(move || {
        let keyed = remove_background_from_bytes(&bytes, &config)?;
        OutputFormatHandler::encode(&keyed, config.output_format)
    })
    .await
    .context("Background removal task failed")??;

    ImageIOService::write_bytes(target, &encoded)
        .await
        .with_context(|| format!("Failed to write {}", target.display()))
}

fn service_model(cli: &Cli) -> String {
    if cli.offline {
        return "none".to_string();
    }
    CliConfigBuilder::service_from_cli(cli)
        .map(|config| config.text_model)
        .unwrap_or_default()
}

fn create_service(cli: &Cli) -> Result<Arc<dyn VisionService>> {
    if cli.offline {
        info!("Using the offline scripted service");
        return Ok(Arc::new(MockVisionService::new()));
    }
    let config = CliConfigBuilder::service_from_cli(cli)?;
    info!("Vision service: {} (model {})", config.base_url, config.text_model);
    let client = GeminiClient::new(config).context("Failed to create vision service client")?;
    Ok(Arc::new(client))
}

/// Analyze every file, optionally sticker them, and emit the summary
async fn analyze_files(cli: &Cli, files: &[PathBuf], config: PipelineConfig) -> Result<usize> {
    let session_id = uuid::Uuid::new_v4().to_string();
    let started_at = Utc::now();
    let service = create_service(cli)?;
    let session = spans::session(&session_id, service.name(), &service_model(cli));

    let mut inputs = Vec::with_capacity(files.len());
    let mut sources = Vec::with_capacity(files.len());
    for path in files {
        match ImageIOService::load_input(path).await {
            Ok(input) => {
                inputs.push(input);
                sources.push(path.clone());
            },
            Err(e) => error!("❌ Failed to load {}: {}", path.display(), e),
        }
    }

    let reporter = create_cli_progress_reporter(cli.progress, cli.verbose > 0, inputs.len());
    let pipeline = BatchPipeline::new(service, config).with_reporter(Arc::from(reporter));

    let cancel = pipeline.cancel_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight requests");
            cancel.cancel();
        }
    });

    let indicatif_progress = progress_bar(inputs.len(), !cli.progress);
    let watcher = indicatif_progress.clone().map(|pb| {
        let mut updates = pipeline.subscribe();
        tokio::spawn(async move {
            while updates.changed().await.is_ok() {
                let done = updates
                    .borrow_and_update()
                    .iter()
                    .filter(|item| item.status.is_terminal())
                    .count();
                pb.set_position(done as u64);
            }
        })
    });

    let batch_span = session.in_scope(|| spans::batch_processing(inputs.len()));
    let items = run_batch(&pipeline, inputs).instrument(batch_span).await;

    if let Some(pb) = &indicatif_progress {
        pb.finish_with_message("Analysis complete");
    }
    if let Some(watcher) = watcher {
        watcher.abort();
    }

    let mut summary_items = Vec::with_capacity(items.len());
    for (item, source) in items.into_iter().zip(sources) {
        let (item, sticker_path) = if cli.stickers && !interrupt.is_finished() {
            sticker_item(cli, &pipeline, item, &source)
                .instrument(session.clone())
                .await
        } else {
            (item, None)
        };
        summary_items.push(SummaryItem { item, sticker_path });
    }
    interrupt.abort();

    let succeeded = summary_items
        .iter()
        .filter(|entry| matches!(entry.item.status, ItemStatus::Success(_)))
        .count();
    let failed = summary_items
        .iter()
        .filter(|entry| matches!(entry.item.status, ItemStatus::Error(_)))
        .count();
    let cancelled = summary_items.iter().any(|entry| !entry.item.status.is_terminal());
    if failed > 0 {
        warn!("Some items failed analysis. Succeeded: {succeeded}, Failed: {failed}");
    }

    let summary = RunSummary {
        session_id,
        started_at,
        finished_at: Utc::now(),
        succeeded,
        failed,
        cancelled,
        items: summary_items,
    };
    write_summary(&summary, cli.output.as_deref()).await?;

    Ok(succeeded)
}

async fn run_batch(pipeline: &BatchPipeline, inputs: Vec<ImageInput>) -> Vec<BatchItem> {
    if inputs.len() == 1 {
        if let Some(input) = inputs.into_iter().next() {
            return match pipeline.process_one(input).await {
                Ok(item) => vec![item],
                Err(e) => {
                    warn!("Analysis did not finish: {}", e);
                    pipeline.items()
                },
            };
        }
        return Vec::new();
    }
    pipeline.process_batch(inputs).await
}

/// Generate and save the sticker for one analyzed item
async fn sticker_item(
    cli: &Cli,
    pipeline: &BatchPipeline,
    item: BatchItem,
    source: &Path,
) -> (BatchItem, Option<PathBuf>) {
    if !matches!(item.status, ItemStatus::Success(_)) {
        return (item, None);
    }

    let item = match pipeline.generate_sticker(item.id).await {
        Ok(updated) => updated,
        Err(e) => {
            error!("❌ Sticker failed for {}: {}", item.name(), e);
            return (item, None);
        },
    };
    let Some(sticker) = &item.sticker.sticker else {
        return (item, None);
    };
    if !sticker.background_removed {
        warn!("Background removal failed for {}, kept the raw frame", item.name());
    }

    let format = pipeline.config().removal.output_format;
    let target = output_path(source, cli.output.as_deref(), "sticker", format);
    let written = match format {
        OutputFormat::Png => ImageIOService::write_bytes(&target, &sticker.image_png).await,
        _ => match ImageIOService::load_from_bytes(&sticker.image_png)
            .and_then(|frame| OutputFormatHandler::encode(&frame.to_rgba8(), format))
        {
            Ok(bytes) => ImageIOService::write_bytes(&target, &bytes).await,
            Err(e) => Err(e),
        },
    };

    match written {
        Ok(()) => {
            info!("🎨 {} -> {} \"{}\"", item.name(), target.display(), sticker.caption);
            (item, Some(target))
        },
        Err(e) => {
            error!("❌ Failed to save sticker for {}: {}", item.name(), e);
            (item, None)
        },
    }
}

async fn write_summary(summary: &RunSummary, output_dir: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(summary).context("Failed to serialize summary")?;
    match output_dir {
        Some(dir) => {
            let path = dir.join(SUMMARY_FILE_NAME);
            ImageIOService::write_bytes(&path, json.as_bytes())
                .await
                .with_context(|| format!("Failed to write summary to {}", path.display()))?;
            info!("📊 Summary written to {}", path.display());
        },
        None => println!("{json}"),
    }
    Ok(())
}
