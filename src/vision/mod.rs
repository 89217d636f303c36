//! Boundary to the hosted vision/generation model
//!
//! The pipeline only talks to the model through [`VisionService`]. The
//! production implementation is [`GeminiClient`]; [`MockVisionService`] is a
//! scripted stand-in for tests and offline runs.

pub mod gemini;
pub mod mock;

pub use gemini::GeminiClient;
pub use mock::{MockOutcome, MockVisionService};

use crate::{classify::ClassifiedError, pipeline::ImageInput};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};
use thiserror::Error;

/// Caption used when the caption request yields no text
pub const DEFAULT_STICKER_CAPTION: &str = "我是一件物品，我有话要说。";

/// MIME type assumed when the content cannot be sniffed
pub const DEFAULT_MIME_TYPE: &str = "image/jpeg";

/// Failures raised by a vision service call
///
/// The display text of each variant is what gets classified, so each one is
/// worded to land in the intended [`ErrorCategory`](crate::ErrorCategory).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Transport failure (DNS, refused connection, TLS, reset)
    #[error("Network error: {0}")]
    Network(String),

    /// The call did not resolve within the configured deadline
    #[error("Request timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Non-success HTTP status from the model endpoint
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    /// The request or its candidate was rejected by the content filter
    #[error("Request blocked by safety filter: {0}")]
    Blocked(String),

    /// The model answered without any usable text
    #[error("No response from AI")]
    EmptyResponse,

    /// The model answered with text that is not the expected JSON
    #[error("Failed to parse AI response as JSON: {0}")]
    Parse(String),

    /// The submitted image had no bytes
    #[error("Image data is empty")]
    EmptyImage,

    /// Generated image payload could not be decoded
    #[error("Could not decode generated image: {0}")]
    Decode(String),
}

impl From<&ServiceError> for ClassifiedError {
    fn from(error: &ServiceError) -> Self {
        ClassifiedError::classify(&error.to_string())
    }
}

impl From<ServiceError> for ClassifiedError {
    fn from(error: ServiceError) -> Self {
        ClassifiedError::from(&error)
    }
}

/// Image payload ready for inline transmission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedImage {
    pub mime_type: String,
    pub data_base64: String,
}

impl EncodedImage {
    /// Base64-encode an input image
    ///
    /// # Errors
    /// - `ServiceError::EmptyImage` when the input carries no bytes
    pub fn encode(input: &ImageInput) -> Result<Self, ServiceError> {
        if input.bytes.is_empty() {
            return Err(ServiceError::EmptyImage);
        }
        Ok(Self {
            mime_type: input.mime_type.clone(),
            data_base64: general_purpose::STANDARD.encode(&input.bytes),
        })
    }

    /// Decode back into raw bytes
    ///
    /// # Errors
    /// - `ServiceError::Decode` for malformed base64
    pub fn decode(&self) -> Result<Vec<u8>, ServiceError> {
        general_purpose::STANDARD
            .decode(&self.data_base64)
            .map_err(|e| ServiceError::Decode(e.to_string()))
    }
}

/// Guess an image MIME type from its leading bytes
#[must_use]
pub fn sniff_mime_type(bytes: &[u8]) -> String {
    image::guess_format(bytes)
        .map(|format| format.to_mime_type().to_string())
        .unwrap_or_else(|_| DEFAULT_MIME_TYPE.to_string())
}

/// Exhibition halls an item can be filed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ItemCategory {
    Packaging,
    Container,
    Paper,
    Electronic,
    Textile,
    Other,
}

impl ItemCategory {
    pub const ALL: [ItemCategory; 6] = [
        Self::Packaging,
        Self::Container,
        Self::Paper,
        Self::Electronic,
        Self::Textile,
        Self::Other,
    ];

    /// Display label used by the collection
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Packaging => "包装",
            Self::Container => "容器",
            Self::Paper => "纸质",
            Self::Electronic => "电子",
            Self::Textile => "纺织",
            Self::Other => "其他",
        }
    }

    fn english_name(self) -> &'static str {
        match self {
            Self::Packaging => "packaging",
            Self::Container => "container",
            Self::Paper => "paper",
            Self::Electronic => "electronic",
            Self::Textile => "textile",
            Self::Other => "other",
        }
    }

    /// Map a model-supplied label to a category; unknown labels become `Other`
    ///
    /// # Examples
    /// ```rust
    /// use remuse::ItemCategory;
    ///
    /// assert_eq!(ItemCategory::normalize("容器"), ItemCategory::Container);
    /// assert_eq!(ItemCategory::normalize(" Paper "), ItemCategory::Paper);
    /// assert_eq!(ItemCategory::normalize("spaceship"), ItemCategory::Other);
    /// ```
    #[must_use]
    pub fn normalize(label: &str) -> Self {
        let trimmed = label.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.label() == trimmed || c.english_name().eq_ignore_ascii_case(trimmed))
            .unwrap_or(Self::Other)
    }
}

impl fmt::Display for ItemCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<String> for ItemCategory {
    fn from(label: String) -> Self {
        Self::normalize(&label)
    }
}

impl From<ItemCategory> for String {
    fn from(category: ItemCategory) -> Self {
        category.label().to_string()
    }
}

/// Effort level of an upcycling idea
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    #[serde(rename = "简单", alias = "easy", alias = "Easy")]
    Easy,
    #[serde(rename = "中等", alias = "medium", alias = "Medium")]
    Medium,
    #[serde(rename = "困难", alias = "hard", alias = "Hard")]
    Hard,
}

/// A suggested upcycling project for an item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemuseIdea {
    pub title: String,
    pub description: String,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub materials: Vec<String>,
    #[serde(default)]
    pub steps: Vec<String>,
}

/// What the model recognized in a photo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub name: String,
    pub category: ItemCategory,
    pub material: String,
    pub story: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Raw output of a sticker generation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedSticker {
    /// Decoded image bytes, `None` when the model returned no image part
    pub image: Option<Vec<u8>>,
    pub caption: String,
}

/// Remote model capable of classifying items and generating stickers
#[async_trait]
pub trait VisionService: Send + Sync {
    /// Identify the object in a photo
    async fn classify(&self, image: &EncodedImage) -> Result<Classification, ServiceError>;

    /// Propose upcycling projects for a named object of a given material
    async fn generate_ideas(
        &self,
        name: &str,
        material: &str,
    ) -> Result<Vec<RemuseIdea>, ServiceError>;

    /// Produce a sticker frame (subject on a black background) and a caption
    async fn generate_sticker_image(
        &self,
        image: &EncodedImage,
        name: &str,
    ) -> Result<GeneratedSticker, ServiceError>;

    /// Human-readable service name for logs
    fn name(&self) -> &'static str {
        "vision"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ErrorCategory;
    use std::sync::Arc;

    fn category_of(error: ServiceError) -> ErrorCategory {
        ClassifiedError::from(&error).category
    }

    #[test]
    fn test_service_error_classification() {
        assert_eq!(
            category_of(ServiceError::Network("dns failure".into())),
            ErrorCategory::Network
        );
        assert_eq!(
            category_of(ServiceError::Timeout(Duration::from_secs(60))),
            ErrorCategory::Network
        );
        assert_eq!(
            category_of(ServiceError::Api {
                status: 429,
                body: "slow down".into()
            }),
            ErrorCategory::RateLimit
        );
        assert_eq!(
            category_of(ServiceError::Blocked("SAFETY".into())),
            ErrorCategory::Safety
        );
        assert_eq!(category_of(ServiceError::EmptyResponse), ErrorCategory::ImageQuality);
        assert_eq!(
            category_of(ServiceError::Parse("expected value at line 1".into())),
            ErrorCategory::ParseError
        );
        assert_eq!(category_of(ServiceError::EmptyImage), ErrorCategory::ImageQuality);
    }

    #[test]
    fn test_encode_rejects_empty_input() {
        let input = ImageInput::new("empty.jpg", Vec::new());
        assert_eq!(EncodedImage::encode(&input), Err(ServiceError::EmptyImage));
    }

    #[test]
    fn test_encode_decode() {
        let input = ImageInput::new("bytes.bin", vec![1_u8, 2, 3, 250]);
        let encoded = EncodedImage::encode(&input).unwrap();
        assert_eq!(encoded.data_base64, "AQID+g==");
        assert_eq!(encoded.decode().unwrap(), input.bytes.as_ref());
        assert_eq!(Arc::strong_count(&input.bytes), 1);
    }

    #[test]
    fn test_sniff_mime_type() {
        let png_magic = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        assert_eq!(sniff_mime_type(&png_magic), "image/png");
        assert_eq!(sniff_mime_type(b"plain text"), DEFAULT_MIME_TYPE);
    }

    #[test]
    fn test_category_serde() {
        let category: ItemCategory = serde_json::from_str("\"电子\"").unwrap();
        assert_eq!(category, ItemCategory::Electronic);
        let unknown: ItemCategory = serde_json::from_str("\"玩具\"").unwrap();
        assert_eq!(unknown, ItemCategory::Other);
        assert_eq!(serde_json::to_string(&ItemCategory::Textile).unwrap(), "\"纺织\"");
    }

    #[test]
    fn test_idea_deserialization_accepts_both_difficulty_labels() {
        let json = r#"[
            {"title":"笔筒","description":"d","difficulty":"简单","materials":["胶水"],"steps":["剪"]},
            {"title":"Lamp","description":"d","difficulty":"hard"}
        ]"#;
        let ideas: Vec<RemuseIdea> = serde_json::from_str(json).unwrap();
        assert_eq!(ideas[0].difficulty, Difficulty::Easy);
        assert_eq!(ideas[1].difficulty, Difficulty::Hard);
        assert!(ideas[1].steps.is_empty());
    }
}
