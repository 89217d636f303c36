//! Scripted vision service for tests and offline runs
//!
//! Outcomes are consumed in call order per operation; once a script runs out
//! every further call succeeds with a canned result. A hook can observe each
//! classify call after it resolves and before the caller sees the result,
//! which is how tests inject cancellation into that window.

use super::{
    Classification, Difficulty, EncodedImage, GeneratedSticker, ItemCategory, RemuseIdea,
    ServiceError, VisionService,
};
use crate::services::io::ImageIOService;
use async_trait::async_trait;
use image::{Rgba, RgbaImage};
use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

/// Result of one scripted call
#[derive(Debug, Clone)]
pub enum MockOutcome<T> {
    /// Resolve with this value
    Succeed(T),
    /// Resolve with this error
    Fail(ServiceError),
    /// Never resolve
    Hang,
}

impl<T> MockOutcome<T> {
    async fn resolve(self) -> Result<T, ServiceError> {
        match self {
            Self::Succeed(value) => Ok(value),
            Self::Fail(error) => Err(error),
            Self::Hang => std::future::pending().await,
        }
    }
}

type ClassifyFn = dyn Fn(usize, &EncodedImage) -> MockOutcome<Classification> + Send + Sync;
type ResolveHook = dyn Fn(usize) + Send + Sync;

/// Vision service returning scripted outcomes
#[derive(Default)]
pub struct MockVisionService {
    classify_script: Mutex<VecDeque<MockOutcome<Classification>>>,
    classify_fn: Option<Arc<ClassifyFn>>,
    ideas_script: Mutex<VecDeque<MockOutcome<Vec<RemuseIdea>>>>,
    sticker_script: Mutex<VecDeque<MockOutcome<GeneratedSticker>>>,
    on_classify_resolved: Option<Arc<ResolveHook>>,
    delay: Option<Duration>,
    classify_calls: AtomicUsize,
    ideas_calls: AtomicUsize,
    sticker_calls: AtomicUsize,
    call_history: Arc<Mutex<Vec<String>>>,
}

impl std::fmt::Debug for MockVisionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockVisionService")
            .field("classify_calls", &self.classify_calls())
            .field("ideas_calls", &self.ideas_calls())
            .field("sticker_calls", &self.sticker_calls())
            .field("delay", &self.delay)
            .finish_non_exhaustive()
    }
}

impl MockVisionService {
    /// Mock that succeeds on every call
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script classify outcomes in call order
    #[must_use]
    pub fn with_classify_outcomes(self, outcomes: Vec<MockOutcome<Classification>>) -> Self {
        Self {
            classify_script: Mutex::new(outcomes.into()),
            ..self
        }
    }

    /// Decide classify outcomes from the call index and payload
    ///
    /// Takes precedence over any scripted outcomes.
    #[must_use]
    pub fn with_classify_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, &EncodedImage) -> MockOutcome<Classification> + Send + Sync + 'static,
    {
        self.classify_fn = Some(Arc::new(f));
        self
    }

    /// Script idea generation outcomes in call order
    #[must_use]
    pub fn with_ideas_outcomes(self, outcomes: Vec<MockOutcome<Vec<RemuseIdea>>>) -> Self {
        Self {
            ideas_script: Mutex::new(outcomes.into()),
            ..self
        }
    }

    /// Script sticker generation outcomes in call order
    #[must_use]
    pub fn with_sticker_outcomes(self, outcomes: Vec<MockOutcome<GeneratedSticker>>) -> Self {
        Self {
            sticker_script: Mutex::new(outcomes.into()),
            ..self
        }
    }

    /// Delay every call before it resolves
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Run `hook(call_index)` after a classify call resolves, before returning
    #[must_use]
    pub fn on_classify_resolved<F>(mut self, hook: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.on_classify_resolved = Some(Arc::new(hook));
        self
    }

    pub fn classify_calls(&self) -> usize {
        self.classify_calls.load(Ordering::SeqCst)
    }

    pub fn ideas_calls(&self) -> usize {
        self.ideas_calls.load(Ordering::SeqCst)
    }

    pub fn sticker_calls(&self) -> usize {
        self.sticker_calls.load(Ordering::SeqCst)
    }

    /// Names of the calls made so far, in order
    pub fn call_history(&self) -> Vec<String> {
        self.call_history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    /// Canned classification for the n-th classify call
    #[must_use]
    pub fn sample_classification(call: usize) -> Classification {
        Classification {
            name: format!("旧物 #{}", call + 1),
            category: ItemCategory::Container,
            material: "塑料".to_string(),
            story: "它曾装满清晨的牛奶，如今只装得下回忆。".to_string(),
            tags: vec!["塑料".to_string(), "容器".to_string()],
        }
    }

    /// Canned idea list
    #[must_use]
    pub fn sample_ideas() -> Vec<RemuseIdea> {
        vec![RemuseIdea {
            title: "迷你花盆".to_string(),
            description: "剪开瓶身，种一株多肉。".to_string(),
            difficulty: Difficulty::Easy,
            materials: vec!["剪刀".to_string(), "土".to_string()],
            steps: vec!["剪开".to_string(), "装土".to_string(), "种植".to_string()],
        }]
    }

    /// Canned sticker frame: white square on a black background, PNG-encoded
    #[must_use]
    pub fn sample_sticker_frame() -> Vec<u8> {
        let frame = RgbaImage::from_fn(16, 16, |x, y| {
            if (4..12).contains(&x) && (4..12).contains(&y) {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([0, 0, 0, 255])
            }
        });
        ImageIOService::encode_png(&frame).unwrap_or_default()
    }

    fn record_call(&self, method: &str) {
        if let Ok(mut history) = self.call_history.lock() {
            history.push(method.to_string());
        }
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn next<T>(script: &Mutex<VecDeque<MockOutcome<T>>>) -> Option<MockOutcome<T>> {
        script.lock().ok().and_then(|mut queue| queue.pop_front())
    }
}

#[async_trait]
impl VisionService for MockVisionService {
    async fn classify(&self, image: &EncodedImage) -> Result<Classification, ServiceError> {
        let call = self.classify_calls.fetch_add(1, Ordering::SeqCst);
        self.record_call("classify");
        self.pause().await;

        let outcome = match &self.classify_fn {
            Some(f) => f(call, image),
            None => Self::next(&self.classify_script)
                .unwrap_or_else(|| MockOutcome::Succeed(Self::sample_classification(call))),
        };
        let result = outcome.resolve().await;

        if let Some(hook) = &self.on_classify_resolved {
            hook(call);
        }
        result
    }

    async fn generate_ideas(
        &self,
        _name: &str,
        _material: &str,
    ) -> Result<Vec<RemuseIdea>, ServiceError> {
        self.ideas_calls.fetch_add(1, Ordering::SeqCst);
        self.record_call("generate_ideas");
        self.pause().await;

        Self::next(&self.ideas_script)
            .unwrap_or_else(|| MockOutcome::Succeed(Self::sample_ideas()))
            .resolve()
            .await
    }

    async fn generate_sticker_image(
        &self,
        _image: &EncodedImage,
        name: &str,
    ) -> Result<GeneratedSticker, ServiceError> {
        self.sticker_calls.fetch_add(1, Ordering::SeqCst);
        self.record_call("generate_sticker_image");
        self.pause().await;

        Self::next(&self.sticker_script)
            .unwrap_or_else(|| {
                MockOutcome::Succeed(GeneratedSticker {
                    image: Some(Self::sample_sticker_frame()),
                    caption: format!("我是{}，我有话要说。", name),
                })
            })
            .resolve()
            .await
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
