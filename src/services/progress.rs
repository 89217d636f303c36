//! Progress reporting service
//!
//! This module separates progress reporting concerns from the pipeline,
//! allowing different frontends to implement their own progress handling.

use crate::{
    classify::ClassifiedError,
    pipeline::{BatchItem, ItemId, ItemStatus},
};
use instant::Instant;

/// Stages an item passes through in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Waiting for its turn in the batch
    Queued,
    /// Encoding the photo for transmission
    Encoding,
    /// Waiting for the model to identify the item
    Classifying,
    /// Waiting for upcycling ideas
    GeneratingIdeas,
    /// Waiting for the sticker frame and caption
    GeneratingSticker,
    /// Chroma-keying the sticker frame
    RemovingBackground,
    /// Result committed
    Completed,
}

impl PipelineStage {
    /// Get a human-readable description of the stage
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            PipelineStage::Queued => "Waiting in queue",
            PipelineStage::Encoding => "Encoding photo",
            PipelineStage::Classifying => "Identifying item",
            PipelineStage::GeneratingIdeas => "Generating upcycling ideas",
            PipelineStage::GeneratingSticker => "Generating sticker",
            PipelineStage::RemovingBackground => "Removing sticker background",
            PipelineStage::Completed => "Completed",
        }
    }

    /// Get the typical progress percentage for this stage
    #[must_use]
    pub fn progress_percentage(&self) -> u8 {
        match self {
            PipelineStage::Queued => 0,
            PipelineStage::Encoding => 5,
            PipelineStage::Classifying => 30,
            PipelineStage::GeneratingIdeas => 70,
            PipelineStage::GeneratingSticker => 50,
            PipelineStage::RemovingBackground => 90,
            PipelineStage::Completed => 100,
        }
    }
}

/// Progress update for a single item
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub item_id: ItemId,
    pub item_name: String,
    pub stage: PipelineStage,
    /// Progress percentage (0-100)
    pub progress: u8,
    pub description: String,
    /// Elapsed time since the operation started (milliseconds)
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    #[must_use]
    pub fn new(item_id: ItemId, item_name: &str, stage: PipelineStage, start_time: Instant) -> Self {
        Self {
            item_id,
            item_name: item_name.to_string(),
            progress: stage.progress_percentage(),
            description: stage.description().to_string(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            stage,
        }
    }
}

/// Running totals for a batch
#[derive(Debug, Clone, PartialEq)]
pub struct BatchProgress {
    /// Items that reached a terminal state
    pub items_completed: usize,
    pub items_failed: usize,
    pub items_total: usize,
    /// Name of the item that just finished
    pub current_item_name: String,
    /// Items per second
    pub processing_rate: f64,
    pub eta_seconds: Option<u64>,
    pub elapsed_ms: u64,
}

impl BatchProgress {
    /// Build totals from counts and the batch start time
    #[must_use]
    pub fn new(
        items_completed: usize,
        items_failed: usize,
        items_total: usize,
        current_item_name: &str,
        start_time: Instant,
    ) -> Self {
        let elapsed = start_time.elapsed();
        let secs = elapsed.as_secs_f64();
        let processing_rate = if secs > 0.0 {
            items_completed as f64 / secs
        } else {
            0.0
        };
        let remaining = items_total.saturating_sub(items_completed);
        let eta_seconds =
            (processing_rate > 0.0).then(|| (remaining as f64 / processing_rate).ceil() as u64);

        Self {
            items_completed,
            items_failed,
            items_total,
            current_item_name: current_item_name.to_string(),
            processing_rate,
            eta_seconds,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    /// Overall completion in percent
    #[must_use]
    pub fn percentage(&self) -> u8 {
        if self.items_total == 0 {
            return 100;
        }
        ((self.items_completed * 100) / self.items_total).min(100) as u8
    }
}

/// Trait for reporting progress during pipeline operations
pub trait ProgressReporter: Send + Sync {
    /// Report that an item entered a stage
    fn report_stage(&self, update: ProgressUpdate);

    /// Report an item whose status just became terminal
    fn report_item(&self, item: &BatchItem);

    /// Report a classified failure
    fn report_error(&self, item: ItemId, stage: PipelineStage, error: &ClassifiedError);

    /// Report batch totals after each item finishes
    fn report_batch_progress(&self, progress: BatchProgress) {
        // Default implementation does nothing - only enhanced reporter implements this
        drop(progress);
    }
}

/// No-op progress reporter that discards all progress updates
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_stage(&self, _update: ProgressUpdate) {}

    fn report_item(&self, _item: &BatchItem) {}

    fn report_error(&self, _item: ItemId, _stage: PipelineStage, _error: &ClassifiedError) {}
}

fn log_item_outcome(item: &BatchItem, verbose: bool) {
    match &item.status {
        ItemStatus::Success(analysis) => {
            log::info!(
                "✅ {} → {} ({}, {} ideas)",
                item.name(),
                analysis.name,
                analysis.category,
                analysis.ideas.len()
            );
            if verbose {
                log::info!("    • Material: {}", analysis.material);
                log::info!("    • Story: {}", analysis.story);
            }
        },
        ItemStatus::Error(error) => {
            log::warn!("❌ {}: {} - {}", item.name(), error.title, error.message);
            if verbose {
                log::warn!("    💡 {}", error.suggestion);
            }
        },
        ItemStatus::Pending | ItemStatus::Analyzing => {
            log::info!("⏸️  {} ({})", item.name(), item.status.label());
        },
    }
}

/// Console progress reporter that logs progress through the `log` facade
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    /// Create a new console progress reporter
    ///
    /// # Arguments
    /// * `verbose` - Whether to show detailed progress information
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_stage(&self, update: ProgressUpdate) {
        if self.verbose {
            log::info!(
                "[{}%] {}: {} ({}ms elapsed)",
                update.progress,
                update.item_name,
                update.description,
                update.elapsed_ms
            );
        } else {
            log::debug!(
                "[{}%] {}: {}",
                update.progress,
                update.item_name,
                update.description
            );
        }
    }

    fn report_item(&self, item: &BatchItem) {
        log_item_outcome(item, self.verbose);
    }

    fn report_error(&self, item: ItemId, stage: PipelineStage, error: &ClassifiedError) {
        log::error!(
            "❌ Error during {} for {}: {}",
            stage.description(),
            item,
            error
        );
    }
}

/// Progress reporter with batch-level bars
pub struct EnhancedProgressReporter {
    enable_batch_progress: bool,
    verbose: bool,
}

impl EnhancedProgressReporter {
    /// Create a new enhanced progress reporter
    ///
    /// # Arguments
    /// * `enable_batch_progress` - Whether to show totals after each item
    /// * `verbose` - Whether to show detailed timing information
    #[must_use]
    pub fn new(enable_batch_progress: bool, verbose: bool) -> Self {
        Self {
            enable_batch_progress,
            verbose,
        }
    }

    /// Format a simple progress bar
    fn progress_bar(percentage: u8) -> String {
        let filled = (percentage.min(100) as usize * 20) / 100;
        let empty = 20 - filled;
        format!("{}{}", "█".repeat(filled), "░".repeat(empty))
    }

    /// Format duration in milliseconds to human-readable string
    fn format_duration(ms: u64) -> String {
        let seconds = ms / 1000;
        if seconds < 60 {
            format!("{}s", seconds)
        } else {
            let minutes = seconds / 60;
            let remaining_seconds = seconds % 60;
            format!("{}m {}s", minutes, remaining_seconds)
        }
    }

    /// Format ETA in seconds to human-readable string
    fn format_eta(eta_seconds: Option<u64>) -> String {
        match eta_seconds {
            Some(seconds) => Self::format_duration(seconds * 1000),
            None => "calculating...".to_string(),
        }
    }
}

impl ProgressReporter for EnhancedProgressReporter {
    fn report_stage(&self, update: ProgressUpdate) {
        log::info!(
            "[{}] {}% {}: {}",
            Self::progress_bar(update.progress),
            update.progress,
            update.item_name,
            update.description
        );
        if self.verbose {
            log::info!("└─ Elapsed: {}ms", update.elapsed_ms);
        }
    }

    fn report_item(&self, item: &BatchItem) {
        log_item_outcome(item, self.verbose);
    }

    fn report_error(&self, item: ItemId, stage: PipelineStage, error: &ClassifiedError) {
        log::error!(
            "❌ Error during {} for {}: {}",
            stage.description(),
            item,
            error
        );
        log::error!("   💡 {}", error.suggestion);
    }

    fn report_batch_progress(&self, progress: BatchProgress) {
        if self.enable_batch_progress {
            log::info!(
                "📁 Batch: {}/{} items ({} failed, {:.2} items/sec) - ETA: {}",
                progress.items_completed,
                progress.items_total,
                progress.items_failed,
                progress.processing_rate,
                Self::format_eta(progress.eta_seconds)
            );
            log::info!(
                "[{}] {}% Overall Progress",
                Self::progress_bar(progress.percentage()),
                progress.percentage()
            );
            if self.verbose {
                log::info!(
                    "⏱️  Timing: {} elapsed, last item: {}",
                    Self::format_duration(progress.elapsed_ms),
                    progress.current_item_name
                );
            }
        }
    }
}

/// Create appropriate progress reporter based on CLI flags
///
/// # Arguments
/// * `enable_progress` - Whether the --progress flag was set
/// * `verbose` - Whether verbose logging is enabled
/// * `batch_size` - Number of items in batch (for determining if batch totals are needed)
pub fn create_cli_progress_reporter(
    enable_progress: bool,
    verbose: bool,
    batch_size: usize,
) -> Box<dyn ProgressReporter> {
    match (enable_progress, batch_size) {
        (false, _) => Box::new(ConsoleProgressReporter::new(verbose)),
        (true, 1) => Box::new(EnhancedProgressReporter::new(false, verbose)),
        (true, _) => Box::new(EnhancedProgressReporter::new(true, verbose)),
    }
}
