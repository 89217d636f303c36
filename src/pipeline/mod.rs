//! Batch analysis pipeline
//!
//! Photos are enqueued as [`BatchItem`]s and driven through
//! encode → classify → ideas, with an optional sticker stage for analyzed
//! items. Each item fails on its own; a failure is classified and recorded on
//! that item only.

mod item;
mod orchestrator;

pub use item::{
    BatchItem, ImageInput, ItemAnalysis, ItemId, ItemStatus, Sticker, StickerState,
};
pub use orchestrator::{BatchPipeline, CancelHandle};

use crate::{classify::ClassifiedError, error::RemuseError};
use thiserror::Error;

/// Errors returned by pipeline operations
///
/// Analysis failures are not errors here: they are recorded on the item as
/// `ItemStatus::Error`.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("No item with id {0}")]
    NotFound(ItemId),

    #[error("Item {0} already has an operation in flight")]
    AlreadyInFlight(ItemId),

    #[error("Item {0} is not in a retryable state")]
    NotRetryable(ItemId),

    #[error("Item {0} has not been analyzed successfully")]
    NotReady(ItemId),

    #[error("Item {0} already has a sticker")]
    StickerExists(ItemId),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Remote(ClassifiedError),

    #[error("Sticker processing failed: {0}")]
    Removal(#[from] RemuseError),
}

impl PipelineError {
    /// Whether the error came from cancellation rather than a failure
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
