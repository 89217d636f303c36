//! Classification of remote-call failures into user-facing error records
//!
//! Raw failures from the vision service arrive as text (transport errors,
//! HTTP status lines, safety rejections, malformed bodies). They are mapped
//! by substring signature into one of six categories, each with a title, a
//! message and a remediation hint. Classification never fails.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest raw message carried verbatim by an `Unknown` classification
const MAX_RAW_MESSAGE_CHARS: usize = 100;

/// Category of a classified remote failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    /// Connectivity, authentication, timeouts and upstream server errors
    Network,
    /// The model could not make sense of the photo
    ImageQuality,
    /// Request rate or quota exhausted
    RateLimit,
    /// Content-safety rejection
    Safety,
    /// The model answered with a body that could not be parsed
    ParseError,
    /// Anything unrecognized
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Network => "network",
            Self::ImageQuality => "image-quality",
            Self::RateLimit => "rate-limit",
            Self::Safety => "safety",
            Self::ParseError => "parse-error",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A normalized, user-presentable remote failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub title: String,
    pub message: String,
    pub suggestion: String,
}

struct Rule {
    keywords: &'static [&'static str],
    category: ErrorCategory,
    title: &'static str,
    message: &'static str,
    suggestion: &'static str,
}

// Order matters: the first matching rule wins.
const RULES: &[Rule] = &[
    Rule {
        keywords: &[
            "fetch",
            "network",
            "timeout",
            "timed out",
            "aborted",
            "econnrefused",
            "enotfound",
            "err_connection",
            "connection",
            "cors",
        ],
        category: ErrorCategory::Network,
        title: "Network connection failed",
        message: "Could not reach the AI analysis service.",
        suggestion: "Check your network connection and try again. If you use a VPN, try switching nodes.",
    },
    Rule {
        keywords: &[
            "429",
            "rate limit",
            "quota",
            "resource exhausted",
            "too many requests",
        ],
        category: ErrorCategory::RateLimit,
        title: "AI service busy",
        message: "Requests are too frequent or the API quota is used up.",
        suggestion: "Wait about 30 seconds before retrying, or ask the administrator to check the API quota.",
    },
    Rule {
        keywords: &["safety", "blocked", "harm", "prohibited", "content filter"],
        category: ErrorCategory::Safety,
        title: "Image content restricted",
        message: "The AI safety system considers this image unsuitable for analysis.",
        suggestion: "Make sure the photo shows only the item to archive, without people or sensitive content.",
    },
    Rule {
        keywords: &[
            "401",
            "403",
            "unauthorized",
            "forbidden",
            "api key",
            "permission",
        ],
        category: ErrorCategory::Network,
        title: "API authentication failed",
        message: "The API key is invalid or has expired.",
        suggestion: "Ask the administrator to update the API key configuration.",
    },
    Rule {
        keywords: &["no response", "empty", "could not", "unable to"],
        category: ErrorCategory::ImageQuality,
        title: "Item not recognized",
        message: "The AI could not identify an item in the photo.",
        suggestion: "Try: 1) keep the item centered and sharp 2) use a plain background 3) light it well 4) avoid motion blur.",
    },
    Rule {
        keywords: &["json", "parse", "unexpected token", "syntax error"],
        category: ErrorCategory::ParseError,
        title: "Unexpected AI response",
        message: "The AI returned a result in an unexpected format.",
        suggestion: "This is usually temporary. Retry, or take the photo again.",
    },
    Rule {
        keywords: &[
            "500",
            "502",
            "503",
            "504",
            "internal",
            "server error",
            "service unavailable",
        ],
        category: ErrorCategory::Network,
        title: "AI server error",
        message: "The AI service is temporarily unavailable.",
        suggestion: "The service is having trouble; wait a few seconds and retry.",
    },
];

impl ClassifiedError {
    /// Classify a raw failure message
    ///
    /// # Examples
    /// ```rust
    /// use remuse::{ClassifiedError, ErrorCategory};
    ///
    /// let err = ClassifiedError::classify("rate limit exceeded");
    /// assert_eq!(err.category, ErrorCategory::RateLimit);
    /// ```
    #[must_use]
    pub fn classify(raw: &str) -> Self {
        let lowered = raw.to_lowercase();

        RULES
            .iter()
            .find(|rule| rule.keywords.iter().any(|kw| lowered.contains(kw)))
            .map_or_else(
                || Self::unknown(raw),
                |rule| Self {
                    category: rule.category,
                    title: rule.title.to_string(),
                    message: rule.message.to_string(),
                    suggestion: rule.suggestion.to_string(),
                },
            )
    }

    fn unknown(raw: &str) -> Self {
        let message = if raw.chars().count() > MAX_RAW_MESSAGE_CHARS {
            let head: String = raw.chars().take(MAX_RAW_MESSAGE_CHARS).collect();
            format!("{}...", head)
        } else {
            raw.to_string()
        };

        Self {
            category: ErrorCategory::Unknown,
            title: "Analysis ran into a problem".to_string(),
            message,
            suggestion: "Please retry. If it keeps happening, try another photo or check your network connection."
                .to_string(),
        }
    }

    /// Whether the caller should offer a retry
    ///
    /// Every remote failure is retryable; the pipeline never retries on its own.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        true
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.category, self.title, self.message)
    }
}

impl std::error::Error for ClassifiedError {}
