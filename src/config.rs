//! Configuration types for background removal, the vision service and the pipeline

use crate::error::{RemuseError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest possible brightness value: the Euclidean magnitude of (255, 255, 255)
pub const MAX_BRIGHTNESS: f32 = 441.672_94;

/// Default brightness at or below which a border-connected pixel is fully transparent
pub const DEFAULT_THRESHOLD_LOW: f32 = 60.0;

/// Default brightness range over which alpha ramps from 0 to 255
pub const DEFAULT_FEATHER_WIDTH: f32 = 30.0;

/// Default timeout applied to every remote call
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Upstream used when no proxy URL is configured
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Placeholder key sent to the credential-injecting proxy
pub const PROXIED_API_KEY: &str = "PROXIED";

/// Output image format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OutputFormat {
    /// PNG with alpha channel transparency
    #[default]
    Png,
    /// WebP with alpha channel transparency
    WebP,
    /// Raw RGBA8 pixel data (4 bytes per pixel)
    Rgba8,
}

/// Configuration for the chroma-key background removal engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemovalConfig {
    /// Brightness at or below which a confirmed background pixel becomes fully transparent
    pub threshold_low: f32,

    /// Brightness range above `threshold_low` over which alpha ramps linearly to 255
    pub feather_width: f32,

    /// Encoding used when the result leaves the engine as bytes
    pub output_format: OutputFormat,
}

impl Default for RemovalConfig {
    fn default() -> Self {
        Self {
            threshold_low: DEFAULT_THRESHOLD_LOW,
            feather_width: DEFAULT_FEATHER_WIDTH,
            output_format: OutputFormat::default(),
        }
    }
}

impl RemovalConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    /// ```rust
    /// use remuse::RemovalConfig;
    ///
    /// let config = RemovalConfig::builder()
    ///     .threshold_low(40.0)
    ///     .feather_width(25.0)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.candidate_limit(), 65.0);
    /// ```
    #[must_use]
    pub fn builder() -> RemovalConfigBuilder {
        RemovalConfigBuilder::default()
    }

    /// Brightness at or below which a pixel is a background candidate
    #[must_use]
    pub fn candidate_limit(&self) -> f32 {
        self.threshold_low + self.feather_width
    }

    /// Validate all configuration parameters
    ///
    /// # Validation Rules
    ///
    /// - `threshold_low`: finite, 0 to `MAX_BRIGHTNESS`
    /// - `feather_width`: finite, greater than 0, at most `MAX_BRIGHTNESS`
    ///
    /// # Errors
    /// - Threshold outside the brightness scale
    /// - Non-positive or oversized feather width
    ///
    /// # Examples
    ///
    /// ```rust
    /// use remuse::RemovalConfig;
    ///
    /// let mut config = RemovalConfig::default();
    /// assert!(config.validate().is_ok());
    ///
    /// config.feather_width = 0.0;
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<()> {
        if !self.threshold_low.is_finite()
            || self.threshold_low < 0.0
            || self.threshold_low > MAX_BRIGHTNESS
        {
            return Err(RemuseError::config_value_error(
                "threshold",
                self.threshold_low,
                "0-441.7",
                Some(DEFAULT_THRESHOLD_LOW),
            ));
        }

        if !self.feather_width.is_finite()
            || self.feather_width <= 0.0
            || self.feather_width > MAX_BRIGHTNESS
        {
            return Err(RemuseError::config_value_error(
                "feather width",
                self.feather_width,
                "(0, 441.7]",
                Some(DEFAULT_FEATHER_WIDTH),
            ));
        }

        Ok(())
    }
}

/// Builder for `RemovalConfig`
#[derive(Debug, Default)]
pub struct RemovalConfigBuilder {
    config: RemovalConfig,
}

impl RemovalConfigBuilder {
    /// Set the fully-transparent brightness threshold
    #[must_use]
    pub fn threshold_low(mut self, threshold: f32) -> Self {
        self.config.threshold_low = threshold;
        self
    }

    /// Set the feathering range
    #[must_use]
    pub fn feather_width(mut self, width: f32) -> Self {
        self.config.feather_width = width;
        self
    }

    /// Set output format
    #[must_use]
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    /// Build the configuration
    ///
    /// # Errors
    /// - Any rule checked by [`RemovalConfig::validate`]
    pub fn build(self) -> Result<RemovalConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Connection settings for the hosted vision/generation model
///
/// Passed into the client at construction time. The real API key normally
/// lives only in the proxy; the client sends a placeholder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Proxy (or upstream) base URL
    pub base_url: String,
    /// Key sent in `x-goog-api-key`; the proxy replaces it
    pub api_key: String,
    /// Model used for classification, ideas and captions
    pub text_model: String,
    /// Model used for sticker image synthesis
    pub image_model: String,
    /// HTTP-level timeout for a single request
    pub request_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: PROXIED_API_KEY.to_string(),
            text_model: "gemini-3-flash-preview".to_string(),
            image_model: "gemini-2.5-flash-image".to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ServiceConfig {
    /// Build a configuration from the process environment
    ///
    /// Reads `GEMINI_PROXY_URL`, `GEMINI_API_KEY`, `REMUSE_TEXT_MODEL`,
    /// `REMUSE_IMAGE_MODEL` and `REMUSE_REQUEST_TIMEOUT_SECS`; anything unset
    /// keeps its default.
    ///
    /// # Errors
    /// - `REMUSE_REQUEST_TIMEOUT_SECS` is not a positive integer
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    ///
    /// # Errors
    /// - The timeout value is not a positive integer
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("GEMINI_PROXY_URL").filter(|v| !v.trim().is_empty()) {
            config.base_url = url.trim().trim_end_matches('/').to_string();
        }
        if let Some(key) = lookup("GEMINI_API_KEY").filter(|v| !v.trim().is_empty()) {
            config.api_key = key;
        }
        if let Some(model) = lookup("REMUSE_TEXT_MODEL").filter(|v| !v.trim().is_empty()) {
            config.text_model = model;
        }
        if let Some(model) = lookup("REMUSE_IMAGE_MODEL").filter(|v| !v.trim().is_empty()) {
            config.image_model = model;
        }
        if let Some(raw) = lookup("REMUSE_REQUEST_TIMEOUT_SECS") {
            let secs = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| {
                    RemuseError::config_value_error(
                        "request timeout",
                        raw.clone(),
                        "1..",
                        Some("60".to_string()),
                    )
                })?;
            config.request_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Set the base URL
    #[must_use]
    pub fn with_base_url<S: Into<String>>(mut self, url: S) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the HTTP timeout
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Settings for the batch analysis pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Background removal settings applied to generated stickers
    pub removal: RemovalConfig,
    /// Deadline for each remote call (`None` waits forever)
    pub request_timeout: Option<Duration>,
    /// Items analyzed at once within a batch (1 = strictly sequential)
    pub max_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            removal: RemovalConfig::default(),
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
            max_concurrency: 1,
        }
    }
}

impl PipelineConfig {
    /// Set the removal configuration
    #[must_use]
    pub fn with_removal(mut self, removal: RemovalConfig) -> Self {
        self.removal = removal;
        self
    }

    /// Set the per-call timeout
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the batch concurrency, at least 1
    #[must_use]
    pub fn with_max_concurrency(mut self, concurrency: usize) -> Self {
        self.max_concurrency = concurrency.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_removal_config_defaults() {
        let config = RemovalConfig::default();
        assert_eq!(config.threshold_low, 60.0);
        assert_eq!(config.feather_width, 30.0);
        assert_eq!(config.candidate_limit(), 90.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_removal_config_builder_rejects_bad_values() {
        assert!(RemovalConfig::builder().threshold_low(-1.0).build().is_err());
        assert!(RemovalConfig::builder().threshold_low(500.0).build().is_err());
        assert!(RemovalConfig::builder().feather_width(0.0).build().is_err());
        assert!(RemovalConfig::builder()
            .feather_width(f32::NAN)
            .build()
            .is_err());

        let config = RemovalConfig::builder()
            .threshold_low(0.0)
            .feather_width(MAX_BRIGHTNESS)
            .output_format(OutputFormat::WebP)
            .build()
            .unwrap();
        assert_eq!(config.output_format, OutputFormat::WebP);
    }

    #[test]
    fn test_service_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("GEMINI_PROXY_URL", "http://localhost:3000/api/gemini/"),
            ("REMUSE_REQUEST_TIMEOUT_SECS", "15"),
        ]
        .into_iter()
        .collect();

        let config =
            ServiceConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string())).unwrap();
        assert_eq!(config.base_url, "http://localhost:3000/api/gemini");
        assert_eq!(config.api_key, PROXIED_API_KEY);
        assert_eq!(config.request_timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_service_config_rejects_bad_timeout() {
        let result = ServiceConfig::from_lookup(|k| {
            (k == "REMUSE_REQUEST_TIMEOUT_SECS").then(|| "soon".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_pipeline_config_concurrency_floor() {
        let config = PipelineConfig::default().with_max_concurrency(0);
        assert_eq!(config.max_concurrency, 1);
        assert_eq!(config.request_timeout, Some(DEFAULT_REQUEST_TIMEOUT));
    }
}
