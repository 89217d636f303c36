#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # Re-Museum
//!
//! Core of a "digital museum" for discarded objects. Photos are sent to a
//! hosted vision/generation model that identifies each object, writes an
//! archive entry and proposes upcycling ideas. Analyzed items can be turned
//! into stickers, whose near-black background is keyed out locally.
//!
//! ## Features
//!
//! - **Background Removal**: border-seeded flood fill with feathered alpha,
//!   dark details inside the subject are preserved
//! - **Batch Pipeline**: per-item state machine with failure isolation,
//!   cancellation, retry and a single-item fast path
//! - **Error Classification**: every remote failure becomes a categorized,
//!   user-presentable record
//! - **Gemini Client**: `generateContent` over HTTP, normally through a
//!   credential-injecting proxy
//! - **CLI Integration**: optional command-line interface (enable with `cli` feature)
//!
//! ## Quick Start
//!
//! ### Background removal
//!
//! ```rust,no_run
//! use remuse::{remove_background_from_bytes, services::ImageIOService, RemovalConfig};
//!
//! # fn example() -> remuse::Result<()> {
//! let frame = std::fs::read("sticker_frame.png")?;
//! let config = RemovalConfig::builder().threshold_low(50.0).build()?;
//! let sticker = remove_background_from_bytes(&frame, &config)?;
//! ImageIOService::save_png(&sticker, "sticker.png")?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Batch analysis
//!
//! ```rust,no_run
//! use remuse::{
//!     services::ImageIOService, BatchPipeline, GeminiClient, ImageInput, PipelineConfig,
//!     ServiceConfig,
//! };
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = GeminiClient::new(ServiceConfig::from_env()?)?;
//! let pipeline = BatchPipeline::new(Arc::new(client), PipelineConfig::default());
//!
//! let inputs = vec![
//!     ImageInput::new("a.jpg", std::fs::read("a.jpg")?),
//!     ImageIOService::load_input("b.jpg").await?,
//! ];
//! for item in pipeline.process_batch(inputs).await {
//!     println!("{}: {}", item.name(), item.status.label());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `cli` (default): Command-line interface and progress reporting
//! - `webp-support` (default): WebP output
//! - `tracing-json`: JSON log output
//! - `tracing-files`: log to a file
//!
//! ### Library-Only Usage
//!
//! ```toml
//! [dependencies]
//! remuse = { version = "0.3", default-features = false }
//! ```

pub mod classify;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod removal;
pub mod services;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod vision;

// Public API exports
pub use classify::{ClassifiedError, ErrorCategory};
pub use config::{OutputFormat, PipelineConfig, RemovalConfig, RemovalConfigBuilder, ServiceConfig};
pub use error::{RemuseError, Result};
pub use pipeline::{
    BatchItem, BatchPipeline, CancelHandle, ImageInput, ItemAnalysis, ItemId, ItemStatus,
    PipelineError, Sticker, StickerState,
};
pub use removal::{
    brightness, detect_background, feathered_alpha, remove_background,
    remove_background_from_bytes,
};
pub use services::{
    BatchProgress, ConsoleProgressReporter, EnhancedProgressReporter, ImageIOService,
    NoOpProgressReporter, OutputFormatHandler, PipelineStage, ProgressReporter, ProgressUpdate,
};
pub use types::BackgroundMask;
pub use vision::{
    Classification, Difficulty, EncodedImage, GeminiClient, GeneratedSticker, ItemCategory,
    MockOutcome, MockVisionService, RemuseIdea, ServiceError, VisionService,
    DEFAULT_STICKER_CAPTION,
};

#[cfg(feature = "cli")]
pub use tracing_config::{init_cli_tracing, spans, TracingConfig, TracingFormat, TracingOutput};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_surface() {
        let config = RemovalConfig::default();
        let frame = image::RgbaImage::from_pixel(3, 3, image::Rgba([0, 0, 0, 255]));
        let keyed = remove_background(&frame, &config).unwrap();
        assert!(keyed.pixels().all(|p| p[3] == 0));

        let error = ClassifiedError::classify("too many requests");
        assert_eq!(error.category, ErrorCategory::RateLimit);
    }
}
