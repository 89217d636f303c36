//! `generateContent` REST client for Gemini models
//!
//! Requests normally go to a credential-injecting proxy, so the key sent here
//! is usually the `PROXIED` placeholder. Prompts and response schemas are
//! carried as plain data.

use super::{
    Classification, EncodedImage, GeneratedSticker, RemuseIdea, ServiceError, VisionService,
    DEFAULT_STICKER_CAPTION,
};
use crate::config::ServiceConfig;
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

const CLASSIFY_PROMPT: &str = "请分析这张收集品或废旧物品的图片。识别它是什么，可能的材质，\
并用中文写一句富有诗意或像博物馆档案一样的描述（story）。\
category 必须是以下之一: 包装, 容器, 纸质, 电子, 纺织, 其他。\
tags 给出三个简短的中文标签。";

const STICKER_IMAGE_PROMPT: &str = "Create a flat vector art sticker of this object. \
The sticker MUST have a thick WHITE DIE-CUT BORDER around the subject. \
The background MUST be PURE SOLID BLACK (#000000). \
High contrast, vibrant colors, minimalist design. No text, no shadows.";

/// Longest error body kept in `ServiceError::Api`
const MAX_ERROR_BODY_CHARS: usize = 300;

fn ideas_prompt(name: &str, material: &str) -> String {
    format!(
        "针对材质为\"{material}\"的\"{name}\"，生成3个富有创意的改造（再生）方案。\
方案应包含从简单到复杂的难度。请全部使用中文回复。返回 JSON 格式。"
    )
}

fn caption_prompt(name: &str) -> String {
    format!(
        "You are a scriptwriter for a mini-theater of objects. Write a \"Short Drama\" \
(2 lines max) for this object: \"{name}\". The tone should be witty, slightly dramatic, \
or philosophical. It is an object speaking. Output ONLY the Chinese text. \
Do not add quotes or labels."
    )
}

fn classification_schema() -> Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "name": { "type": "STRING" },
            "category": { "type": "STRING" },
            "material": { "type": "STRING" },
            "story": { "type": "STRING" },
            "tags": { "type": "ARRAY", "items": { "type": "STRING" } }
        },
        "required": ["name", "category", "material", "story", "tags"]
    })
}

fn ideas_schema() -> Value {
    json!({
        "type": "ARRAY",
        "items": {
            "type": "OBJECT",
            "properties": {
                "title": { "type": "STRING" },
                "description": { "type": "STRING" },
                "difficulty": { "type": "STRING", "enum": ["简单", "中等", "困难"] },
                "materials": { "type": "ARRAY", "items": { "type": "STRING" } },
                "steps": { "type": "ARRAY", "items": { "type": "STRING" } }
            },
            "required": ["title", "description", "difficulty", "materials", "steps"]
        }
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum RequestPart<'a> {
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: InlineData<'a>,
    },
    Text { text: &'a str },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineData<'a> {
    mime_type: &'a str,
    data: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    response_schema: Value,
}

impl GenerationConfig {
    fn json(schema: Value) -> Self {
        Self {
            response_mime_type: "application/json",
            response_schema: schema,
        }
    }
}

impl<'a> GenerateContentRequest<'a> {
    fn text(prompt: &'a str) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![RequestPart::Text { text: prompt }],
            }],
            generation_config: None,
        }
    }

    fn image_and_text(image: &'a EncodedImage, prompt: &'a str) -> Self {
        Self {
            contents: vec![Content {
                parts: vec![
                    RequestPart::Inline {
                        inline_data: InlineData {
                            mime_type: &image.mime_type,
                            data: &image.data_base64,
                        },
                    },
                    RequestPart::Text { text: prompt },
                ],
            }],
            generation_config: None,
        }
    }

    fn with_schema(mut self, schema: Value) -> Self {
        self.generation_config = Some(GenerationConfig::json(schema));
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<ResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    inline_data: Option<ResponseInlineData>,
}

#[derive(Debug, Deserialize)]
struct ResponseInlineData {
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    fn parts(&self) -> impl Iterator<Item = &ResponsePart> {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .into_iter()
            .flat_map(|content| content.parts.iter())
    }

    /// Reject prompt-level blocks and safety-terminated candidates
    fn ensure_not_blocked(&self) -> Result<(), ServiceError> {
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return Err(ServiceError::Blocked(reason.to_string()));
        }
        let safety_stop = self
            .candidates
            .first()
            .and_then(|c| c.finish_reason.as_deref())
            .is_some_and(|reason| reason == "SAFETY" || reason == "PROHIBITED_CONTENT");
        if safety_stop {
            return Err(ServiceError::Blocked("candidate stopped for SAFETY".to_string()));
        }
        Ok(())
    }

    /// Concatenated text of the first candidate, `None` when blank
    fn text(&self) -> Option<String> {
        let text: String = self.parts().filter_map(|p| p.text.as_deref()).collect();
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }

    fn first_inline_data(&self) -> Option<&str> {
        self.parts()
            .find_map(|p| p.inline_data.as_ref().map(|d| d.data.as_str()))
    }
}

fn parse_classification(response: &GenerateContentResponse) -> Result<Classification, ServiceError> {
    let text = response.text().ok_or(ServiceError::EmptyResponse)?;
    serde_json::from_str(&text).map_err(|e| ServiceError::Parse(e.to_string()))
}

fn parse_ideas(response: &GenerateContentResponse) -> Result<Vec<RemuseIdea>, ServiceError> {
    match response.text() {
        Some(text) => serde_json::from_str(&text).map_err(|e| ServiceError::Parse(e.to_string())),
        None => Ok(Vec::new()),
    }
}

fn extract_sticker_image(response: &GenerateContentResponse) -> Result<Option<Vec<u8>>, ServiceError> {
    response
        .first_inline_data()
        .map(|data| {
            general_purpose::STANDARD
                .decode(data)
                .map_err(|e| ServiceError::Decode(e.to_string()))
        })
        .transpose()
}

fn truncate_body(body: &str) -> String {
    if body.chars().count() > MAX_ERROR_BODY_CHARS {
        body.chars().take(MAX_ERROR_BODY_CHARS).collect()
    } else {
        body.to_string()
    }
}

/// HTTP client for the Gemini `generateContent` endpoint
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    config: ServiceConfig,
}

impl GeminiClient {
    /// Build a client from explicit settings
    ///
    /// # Errors
    /// - `ServiceError::Network` when the HTTP client cannot be initialized
    pub fn new(config: ServiceConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ServiceError::Network(e.to_string()))?;
        Ok(Self { http, config })
    }

    #[must_use]
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.base_url, model
        )
    }

    fn map_transport_error(&self, error: &reqwest::Error) -> ServiceError {
        if error.is_timeout() {
            ServiceError::Timeout(self.config.request_timeout)
        } else {
            ServiceError::Network(error.to_string())
        }
    }

    async fn generate(
        &self,
        model: &str,
        request: &GenerateContentRequest<'_>,
    ) -> Result<GenerateContentResponse, ServiceError> {
        let url = self.endpoint(model);
        debug!(%url, "Sending generateContent request");

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(&e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(&e))?;

        if !status.is_success() {
            return Err(ServiceError::Api {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let parsed: GenerateContentResponse =
            serde_json::from_str(&body).map_err(|e| ServiceError::Parse(e.to_string()))?;
        parsed.ensure_not_blocked()?;
        Ok(parsed)
    }
}

#[async_trait]
impl VisionService for GeminiClient {
    #[instrument(skip(self, image), fields(model = %self.config.text_model))]
    async fn classify(&self, image: &EncodedImage) -> Result<Classification, ServiceError> {
        let request = GenerateContentRequest::image_and_text(image, CLASSIFY_PROMPT)
            .with_schema(classification_schema());
        let response = self.generate(&self.config.text_model, &request).await?;
        parse_classification(&response)
    }

    #[instrument(skip(self), fields(model = %self.config.text_model))]
    async fn generate_ideas(
        &self,
        name: &str,
        material: &str,
    ) -> Result<Vec<RemuseIdea>, ServiceError> {
        let prompt = ideas_prompt(name, material);
        let request = GenerateContentRequest::text(&prompt).with_schema(ideas_schema());
        let response = self.generate(&self.config.text_model, &request).await?;
        parse_ideas(&response)
    }

    #[instrument(skip(self, image), fields(model = %self.config.image_model))]
    async fn generate_sticker_image(
        &self,
        image: &EncodedImage,
        name: &str,
    ) -> Result<GeneratedSticker, ServiceError> {
        let caption_text = caption_prompt(name);
        let caption_request = GenerateContentRequest::text(&caption_text);
        let image_request = GenerateContentRequest::image_and_text(image, STICKER_IMAGE_PROMPT);

        let (caption_response, image_response) = tokio::try_join!(
            self.generate(&self.config.text_model, &caption_request),
            self.generate(&self.config.image_model, &image_request),
        )?;

        let caption = caption_response
            .text()
            .unwrap_or_else(|| DEFAULT_STICKER_CAPTION.to_string());
        let image = extract_sticker_image(&image_response)?;
        if image.is_none() {
            warn!("Image model returned no image part");
        }

        Ok(GeneratedSticker { image, caption })
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}
