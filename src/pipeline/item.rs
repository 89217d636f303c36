//! Items tracked by the batch pipeline and their lifecycle states

use crate::{
    classify::ClassifiedError,
    vision::{sniff_mime_type, Classification, RemuseIdea},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{fmt, sync::Arc};
use uuid::Uuid;

/// Session-stable identifier of a batch item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A photo submitted for analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageInput {
    /// Display or file name
    pub name: String,
    /// Raw encoded image bytes, shared between snapshots
    #[serde(skip)]
    pub bytes: Arc<[u8]>,
    /// MIME type sent with the inline payload
    pub mime_type: String,
    /// Locally displayable handle (file path, object URL)
    pub preview: Option<String>,
    /// Exhibition hall chosen by the user, overrides the model's category
    pub hall: Option<String>,
}

impl ImageInput {
    /// Wrap raw bytes, sniffing the MIME type from their content
    pub fn new<S: Into<String>, B: Into<Vec<u8>>>(name: S, bytes: B) -> Self {
        let bytes: Vec<u8> = bytes.into();
        Self {
            name: name.into(),
            mime_type: sniff_mime_type(&bytes),
            bytes: bytes.into(),
            preview: None,
            hall: None,
        }
    }

    #[must_use]
    pub fn with_preview<S: Into<String>>(mut self, preview: S) -> Self {
        self.preview = Some(preview.into());
        self
    }

    #[must_use]
    pub fn with_hall<S: Into<String>>(mut self, hall: S) -> Self {
        self.hall = Some(hall.into());
        self
    }

    #[must_use]
    pub fn with_mime_type<S: Into<String>>(mut self, mime_type: S) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Archive record produced by a successful analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemAnalysis {
    pub name: String,
    /// Hall override when one was chosen, otherwise the normalized category label
    pub category: String,
    pub material: String,
    pub story: String,
    pub tags: Vec<String>,
    pub ideas: Vec<RemuseIdea>,
    pub collected_at: DateTime<Utc>,
}

impl ItemAnalysis {
    #[must_use]
    pub fn new(classification: Classification, ideas: Vec<RemuseIdea>, hall: Option<&str>) -> Self {
        let category = hall
            .filter(|h| !h.trim().is_empty())
            .map_or_else(|| classification.category.label().to_string(), str::to_string);
        Self {
            name: classification.name,
            category,
            material: classification.material,
            story: classification.story,
            tags: classification.tags,
            ideas,
            collected_at: Utc::now(),
        }
    }
}

/// Lifecycle of a batch item
///
/// `Pending → Analyzing → Success | Error`, with an explicit retry taking
/// `Error` back to `Analyzing`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    Analyzing,
    Success(ItemAnalysis),
    Error(ClassifiedError),
}

impl ItemStatus {
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Analyzing => "analyzing",
            Self::Success(_) => "success",
            Self::Error(_) => "error",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success(_) | Self::Error(_))
    }

    #[must_use]
    pub fn analysis(&self) -> Option<&ItemAnalysis> {
        match self {
            Self::Success(analysis) => Some(analysis),
            _ => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&ClassifiedError> {
        match self {
            Self::Error(error) => Some(error),
            _ => None,
        }
    }
}

/// A finished sticker derived from an analyzed item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sticker {
    pub id: Uuid,
    pub original_item_id: ItemId,
    /// Final PNG, transparent where the background was removed
    #[serde(skip)]
    pub image_png: Vec<u8>,
    pub caption: String,
    pub category: String,
    /// False when removal failed and the raw frame was kept
    pub background_removed: bool,
    pub created_at: DateTime<Utc>,
}

/// Sticker sub-state of an item
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StickerState {
    pub generating: bool,
    pub sticker: Option<Sticker>,
}

/// One photo tracked by the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchItem {
    pub id: ItemId,
    pub input: ImageInput,
    pub status: ItemStatus,
    pub sticker: StickerState,
    /// Analysis attempts started so far
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl BatchItem {
    #[must_use]
    pub fn new(input: ImageInput) -> Self {
        Self {
            id: ItemId::new(),
            input,
            status: ItemStatus::Pending,
            sticker: StickerState::default(),
            attempts: 0,
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.input.name
    }
}
