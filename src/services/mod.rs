//! Frontend-facing services: progress reporting, image I/O and output encoding

pub mod format;
pub mod io;
pub mod progress;

pub use format::OutputFormatHandler;
pub use io::ImageIOService;
pub use progress::{
    create_cli_progress_reporter, BatchProgress, ConsoleProgressReporter,
    EnhancedProgressReporter, NoOpProgressReporter, PipelineStage, ProgressReporter,
    ProgressUpdate,
};
