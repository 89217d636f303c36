//! Pipeline state, scheduling and cancellation
//!
//! All item state lives in one `watch` channel: every mutation replaces the
//! affected item in place and wakes subscribers. Operations take a child of
//! the session cancellation token and check it after every suspension point
//! and again inside each commit, so a cancelled operation never writes.

use super::{
    item::{BatchItem, ImageInput, ItemAnalysis, ItemId, ItemStatus, Sticker},
    PipelineError,
};
use crate::{
    classify::ClassifiedError,
    config::{PipelineConfig, RemovalConfig},
    error::{RemuseError, Result as RemuseResult},
    removal::remove_background,
    services::{
        io::ImageIOService,
        progress::{BatchProgress, NoOpProgressReporter, PipelineStage, ProgressReporter, ProgressUpdate},
    },
    vision::{EncodedImage, ServiceError, VisionService},
};
use chrono::Utc;
use futures::StreamExt;
use instant::Instant;
use std::{
    collections::HashSet,
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

type InFlightSet = Arc<Mutex<HashSet<ItemId>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks an item busy for the lifetime of the guard
struct InFlightGuard {
    set: InFlightSet,
    id: ItemId,
}

impl InFlightGuard {
    fn acquire(set: &InFlightSet, id: ItemId) -> Result<Self, PipelineError> {
        if lock(set).insert(id) {
            Ok(Self {
                set: Arc::clone(set),
                id,
            })
        } else {
            Err(PipelineError::AlreadyInFlight(id))
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.set).remove(&self.id);
    }
}

#[derive(Debug)]
struct Tokens {
    session: CancellationToken,
    single: Option<CancellationToken>,
}

impl Default for Tokens {
    fn default() -> Self {
        Self {
            session: CancellationToken::new(),
            single: None,
        }
    }
}

/// Cancels every in-flight pipeline operation
///
/// Cloneable and usable from any task; operations started after a cancel get
/// fresh tokens and run normally.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tokens: Arc<Mutex<Tokens>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let mut tokens = lock(&self.tokens);
        tokens.session.cancel();
        *tokens = Tokens::default();
    }

    fn child(&self) -> CancellationToken {
        lock(&self.tokens).session.child_token()
    }

    /// Token for the single-item path, cancelling the previous one
    fn replace_single(&self) -> CancellationToken {
        let mut tokens = lock(&self.tokens);
        if let Some(previous) = tokens.single.take() {
            previous.cancel();
        }
        let token = tokens.session.child_token();
        tokens.single = Some(token.clone());
        token
    }
}

/// Removes a batch's not-yet-started items from the queued set on drop
struct QueuedBatch {
    set: InFlightSet,
    ids: Vec<ItemId>,
}

impl QueuedBatch {
    fn register(set: &InFlightSet, ids: &[ItemId]) -> Self {
        lock(set).extend(ids.iter().copied());
        Self {
            set: Arc::clone(set),
            ids: ids.to_vec(),
        }
    }
}

impl Drop for QueuedBatch {
    fn drop(&mut self) {
        let mut set = lock(&self.set);
        for id in &self.ids {
            set.remove(id);
        }
    }
}

/// How an analysis run ended
enum RunOutcome {
    Committed(BatchItem),
    /// The item was no longer `Pending`; state untouched
    Skipped(BatchItem),
    Cancelled,
}

/// Orchestrates item analysis and sticker generation against a vision service
pub struct BatchPipeline {
    service: Arc<dyn VisionService>,
    config: PipelineConfig,
    reporter: Arc<dyn ProgressReporter>,
    state: watch::Sender<Vec<BatchItem>>,
    /// Items owned by a running batch that have not started yet
    queued: InFlightSet,
    analyzing: InFlightSet,
    stickering: InFlightSet,
    cancel: CancelHandle,
}

impl BatchPipeline {
    #[must_use]
    pub fn new(service: Arc<dyn VisionService>, config: PipelineConfig) -> Self {
        let (state, _) = watch::channel(Vec::new());
        Self {
            service,
            config,
            reporter: Arc::new(NoOpProgressReporter),
            state,
            queued: Arc::default(),
            analyzing: Arc::default(),
            stickering: Arc::default(),
            cancel: CancelHandle {
                tokens: Arc::default(),
            },
        }
    }

    #[must_use]
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Live snapshots of the item collection
    pub fn subscribe(&self) -> watch::Receiver<Vec<BatchItem>> {
        self.state.subscribe()
    }

    /// Current snapshot of every item, in submission order
    pub fn items(&self) -> Vec<BatchItem> {
        self.state.borrow().clone()
    }

    /// Current snapshot of one item
    pub fn item(&self, id: ItemId) -> Option<BatchItem> {
        self.state.borrow().iter().find(|item| item.id == id).cloned()
    }

    /// Handle that cancels everything in flight
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Cancel every in-flight operation
    ///
    /// Items that have not started stay `Pending`; results that resolve after
    /// this point are discarded.
    pub fn cancel(&self) {
        info!("Cancelling in-flight pipeline operations");
        self.cancel.cancel();
    }

    /// Cancel everything and clear the collection
    pub fn dismiss(&self) {
        self.cancel.cancel();
        self.state.send_replace(Vec::new());
    }

    /// Append new `Pending` items
    pub fn enqueue<I>(&self, inputs: I) -> Vec<ItemId>
    where
        I: IntoIterator<Item = ImageInput>,
    {
        let new_items: Vec<BatchItem> = inputs.into_iter().map(BatchItem::new).collect();
        let ids = new_items.iter().map(|item| item.id).collect();
        let queued: Vec<(ItemId, String)> = new_items
            .iter()
            .map(|item| (item.id, item.name().to_string()))
            .collect();
        if !new_items.is_empty() {
            self.state.send_modify(|items| items.extend(new_items));
        }
        let now = Instant::now();
        for (id, name) in &queued {
            self.report_stage(*id, name, PipelineStage::Queued, now);
        }
        ids
    }

    /// Enqueue and analyze a batch
    ///
    /// Items are processed at most `max_concurrency` at a time, in submission
    /// order. Until an item starts, it belongs to this batch and `retry`
    /// rejects it. Returns the final snapshots of the submitted items.
    #[instrument(skip(self, inputs))]
    pub async fn process_batch<I>(&self, inputs: I) -> Vec<BatchItem>
    where
        I: IntoIterator<Item = ImageInput>,
    {
        let ids = self.enqueue(inputs);
        let _queued = QueuedBatch::register(&self.queued, &ids);
        let token = self.cancel.child();
        let total = ids.len();
        let completed = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        let start = Instant::now();
        info!(batch_size = total, concurrency = self.config.max_concurrency, "Starting batch");

        futures::stream::iter(ids.iter().copied())
            .for_each_concurrent(self.config.max_concurrency, |id| {
                let token = token.clone();
                let (completed, failed) = (&completed, &failed);
                async move {
                    if token.is_cancelled() {
                        return;
                    }
                    match self.analyze(id, &token, false).await {
                        Ok(RunOutcome::Committed(item)) => {
                            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                            let errors = if matches!(item.status, ItemStatus::Error(_)) {
                                failed.fetch_add(1, Ordering::SeqCst) + 1
                            } else {
                                failed.load(Ordering::SeqCst)
                            };
                            self.reporter.report_batch_progress(BatchProgress::new(
                                done,
                                errors,
                                total,
                                item.name(),
                                start,
                            ));
                        },
                        Ok(RunOutcome::Skipped(item)) => {
                            debug!(%id, status = item.status.label(), "Item no longer pending")
                        },
                        Ok(RunOutcome::Cancelled) => debug!(%id, "Item run cancelled"),
                        Err(e) => warn!(%id, error = %e, "Item skipped"),
                    }
                }
            })
            .await;

        info!(
            completed = completed.load(Ordering::SeqCst),
            failed = failed.load(Ordering::SeqCst),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Batch finished"
        );

        let snapshot = self.state.borrow();
        ids.iter()
            .filter_map(|id| snapshot.iter().find(|item| item.id == *id).cloned())
            .collect()
    }

    /// Analyze one photo on the single-item path
    ///
    /// Cancels the previous single-item request, if any.
    ///
    /// # Errors
    /// - `PipelineError::Cancelled` when cancelled before the result was committed
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn process_one(&self, input: ImageInput) -> Result<BatchItem, PipelineError> {
        let token = self.cancel.replace_single();
        let item = BatchItem::new(input);
        let id = item.id;
        self.state.send_modify(|items| items.push(item));

        match self.analyze(id, &token, false).await? {
            RunOutcome::Committed(item) | RunOutcome::Skipped(item) => Ok(item),
            RunOutcome::Cancelled => Err(PipelineError::Cancelled),
        }
    }

    /// Run analysis again for a failed or stranded item
    ///
    /// # Errors
    /// - `NotFound` for an unknown id
    /// - `AlreadyInFlight` while the item is being analyzed or still queued
    ///   in a running batch
    /// - `NotRetryable` for an item that already succeeded
    /// - `Cancelled` when cancelled before the result was committed
    #[instrument(skip(self))]
    pub async fn retry(&self, id: ItemId) -> Result<BatchItem, PipelineError> {
        let token = self.cancel.child();
        match self.analyze(id, &token, true).await? {
            RunOutcome::Committed(item) | RunOutcome::Skipped(item) => Ok(item),
            RunOutcome::Cancelled => Err(PipelineError::Cancelled),
        }
    }

    /// Generate the sticker for an analyzed item
    ///
    /// One-shot: once a sticker exists the item is never re-stickered. When
    /// the model returns no image the source photo is used instead, and when
    /// background removal fails the unprocessed frame is kept.
    ///
    /// # Errors
    /// - `NotFound`, `NotReady`, `StickerExists`, `AlreadyInFlight` before any work starts
    /// - `Remote` for a classified service failure
    /// - `Removal` when the frame cannot be decoded or encoded
    /// - `Cancelled` when cancelled before the sticker was committed
    #[instrument(skip(self))]
    pub async fn generate_sticker(&self, id: ItemId) -> Result<BatchItem, PipelineError> {
        let _guard = InFlightGuard::acquire(&self.stickering, id)?;
        let token = self.cancel.child();
        let start = Instant::now();

        let mut rejection = None;
        let mut source = None;
        self.state.send_if_modified(|items| {
            let Some(item) = items.iter_mut().find(|item| item.id == id) else {
                rejection = Some(PipelineError::NotFound(id));
                return false;
            };
            let Some(analysis) = item.status.analysis() else {
                rejection = Some(PipelineError::NotReady(id));
                return false;
            };
            if item.sticker.sticker.is_some() {
                rejection = Some(PipelineError::StickerExists(id));
                return false;
            }
            source = Some((item.input.clone(), analysis.name.clone(), analysis.category.clone()));
            item.sticker.generating = true;
            true
        });
        if let Some(error) = rejection {
            return Err(error);
        }
        let Some((input, name, category)) = source else {
            return Err(PipelineError::NotFound(id));
        };

        self.report_stage(id, &input.name, PipelineStage::GeneratingSticker, start);
        let encoded = match EncodedImage::encode(&input) {
            Ok(encoded) => encoded,
            Err(e) => return Err(self.fail_sticker(id, &token, &e)),
        };

        let generated = match self
            .guarded(&token, self.service.generate_sticker_image(&encoded, &name))
            .await
        {
            None => return Err(PipelineError::Cancelled),
            Some(Err(e)) => return Err(self.fail_sticker(id, &token, &e)),
            Some(Ok(generated)) => generated,
        };

        let frame = generated.image.unwrap_or_else(|| {
            warn!(%id, "No sticker image returned, using the source photo");
            input.bytes.to_vec()
        });

        self.report_stage(id, &input.name, PipelineStage::RemovingBackground, start);
        let removal = self.config.removal.clone();
        let task = tokio::task::spawn_blocking(move || finish_sticker_frame(&frame, &removal));
        let processed = tokio::select! {
            biased;
            () = token.cancelled() => return Err(PipelineError::Cancelled),
            joined = task => joined
                .map_err(|e| RemuseError::processing(format!("Sticker task failed: {}", e)))
                .and_then(|result| result),
        };
        let (image_png, background_removed) = match processed {
            Ok(done) => done,
            Err(e) => {
                if self
                    .commit(id, &token, |item| item.sticker.generating = false)
                    .is_none()
                {
                    return Err(PipelineError::Cancelled);
                }
                return Err(PipelineError::Removal(e));
            },
        };

        let sticker = Sticker {
            id: Uuid::new_v4(),
            original_item_id: id,
            image_png,
            caption: generated.caption,
            category,
            background_removed,
            created_at: Utc::now(),
        };
        let item = self
            .commit(id, &token, move |item| {
                item.sticker.generating = false;
                item.sticker.sticker = Some(sticker);
            })
            .ok_or(PipelineError::Cancelled)?;

        self.report_stage(id, &input.name, PipelineStage::Completed, start);
        info!(%id, background_removed, "Sticker created");
        Ok(item)
    }

    /// Drive one item through encode → classify → ideas
    ///
    /// With `retry` set the item must be in `Error`, or stranded in
    /// `Pending`/`Analyzing` by a cancelled run. Without it only `Pending`
    /// items start; anything else is skipped untouched.
    async fn analyze(
        &self,
        id: ItemId,
        token: &CancellationToken,
        retry: bool,
    ) -> Result<RunOutcome, PipelineError> {
        // Leaving the queued set and entering the in-flight set happen under
        // one lock, so a retry never sees the item in neither.
        let _guard = {
            let mut queued = lock(&self.queued);
            if retry && queued.contains(&id) {
                return Err(PipelineError::AlreadyInFlight(id));
            }
            if !retry {
                queued.remove(&id);
            }
            InFlightGuard::acquire(&self.analyzing, id)?
        };
        let start = Instant::now();

        let mut rejection = None;
        let mut skipped = None;
        let mut input = None;
        self.state.send_if_modified(|items| {
            let Some(item) = items.iter_mut().find(|item| item.id == id) else {
                rejection = Some(PipelineError::NotFound(id));
                return false;
            };
            if retry && matches!(item.status, ItemStatus::Success(_)) {
                rejection = Some(PipelineError::NotRetryable(id));
                return false;
            }
            if !retry && item.status != ItemStatus::Pending {
                skipped = Some(item.clone());
                return false;
            }
            if token.is_cancelled() {
                return false;
            }
            item.status = ItemStatus::Analyzing;
            item.attempts += 1;
            input = Some(item.input.clone());
            true
        });
        if let Some(error) = rejection {
            return Err(error);
        }
        if let Some(item) = skipped {
            return Ok(RunOutcome::Skipped(item));
        }
        let Some(input) = input else {
            return Ok(RunOutcome::Cancelled);
        };

        self.report_stage(id, &input.name, PipelineStage::Encoding, start);
        let encoded = match EncodedImage::encode(&input) {
            Ok(encoded) => encoded,
            Err(e) => return Ok(self.fail_analysis(id, token, PipelineStage::Encoding, &e)),
        };

        self.report_stage(id, &input.name, PipelineStage::Classifying, start);
        let classification = match self.guarded(token, self.service.classify(&encoded)).await {
            None => return Ok(RunOutcome::Cancelled),
            Some(Err(e)) => {
                return Ok(self.fail_analysis(id, token, PipelineStage::Classifying, &e))
            },
            Some(Ok(classification)) => classification,
        };

        self.report_stage(id, &input.name, PipelineStage::GeneratingIdeas, start);
        let ideas = match self
            .guarded(
                token,
                self.service
                    .generate_ideas(&classification.name, &classification.material),
            )
            .await
        {
            None => return Ok(RunOutcome::Cancelled),
            Some(Ok(ideas)) => ideas,
            Some(Err(e)) => {
                warn!(%id, error = %e, "Idea generation failed, continuing without ideas");
                Vec::new()
            },
        };

        let analysis = ItemAnalysis::new(classification, ideas, input.hall.as_deref());
        let Some(item) = self.commit(id, token, move |item| {
            item.status = ItemStatus::Success(analysis);
        }) else {
            return Ok(RunOutcome::Cancelled);
        };

        self.report_stage(id, &input.name, PipelineStage::Completed, start);
        self.reporter.report_item(&item);
        Ok(RunOutcome::Committed(item))
    }

    /// Await a remote call under the request timeout, unless cancelled first
    ///
    /// Returns `None` when cancellation was observed, including when it
    /// happened while the call was resolving.
    async fn guarded<T, F>(
        &self,
        token: &CancellationToken,
        call: F,
    ) -> Option<std::result::Result<T, ServiceError>>
    where
        F: Future<Output = std::result::Result<T, ServiceError>>,
    {
        let timed = async {
            match self.config.request_timeout {
                Some(limit) => tokio::time::timeout(limit, call)
                    .await
                    .unwrap_or(Err(ServiceError::Timeout(limit))),
                None => call.await,
            }
        };

        tokio::select! {
            biased;
            () = token.cancelled() => None,
            result = timed => (!token.is_cancelled()).then_some(result),
        }
    }

    /// Apply a mutation to one item unless the token is cancelled
    fn commit<F>(&self, id: ItemId, token: &CancellationToken, mutate: F) -> Option<BatchItem>
    where
        F: FnOnce(&mut BatchItem),
    {
        let mut committed = None;
        self.state.send_if_modified(|items| {
            if token.is_cancelled() {
                return false;
            }
            let Some(item) = items.iter_mut().find(|item| item.id == id) else {
                return false;
            };
            mutate(item);
            committed = Some(item.clone());
            true
        });
        committed
    }

    fn fail_analysis(
        &self,
        id: ItemId,
        token: &CancellationToken,
        stage: PipelineStage,
        error: &ServiceError,
    ) -> RunOutcome {
        let classified = ClassifiedError::from(error);
        warn!(%id, category = %classified.category, error = %error, "Analysis failed");

        let recorded = classified.clone();
        match self.commit(id, token, move |item| item.status = ItemStatus::Error(recorded)) {
            Some(item) => {
                self.reporter.report_error(id, stage, &classified);
                self.reporter.report_item(&item);
                RunOutcome::Committed(item)
            },
            None => RunOutcome::Cancelled,
        }
    }

    fn fail_sticker(
        &self,
        id: ItemId,
        token: &CancellationToken,
        error: &ServiceError,
    ) -> PipelineError {
        let classified = ClassifiedError::from(error);
        warn!(%id, category = %classified.category, error = %error, "Sticker generation failed");

        if self
            .commit(id, token, |item| item.sticker.generating = false)
            .is_none()
        {
            return PipelineError::Cancelled;
        }
        self.reporter
            .report_error(id, PipelineStage::GeneratingSticker, &classified);
        PipelineError::Remote(classified)
    }

    fn report_stage(&self, id: ItemId, name: &str, stage: PipelineStage, start: Instant) {
        self.reporter
            .report_stage(ProgressUpdate::new(id, name, stage, start));
    }
}

/// Decode a sticker frame, key out its background and encode it as PNG
///
/// A removal failure keeps the unprocessed frame; decode and encode failures
/// are errors.
fn finish_sticker_frame(frame: &[u8], config: &RemovalConfig) -> RemuseResult<(Vec<u8>, bool)> {
    let decoded = image::load_from_memory(frame)
        .map_err(|e| RemuseError::image_decode(format!("Failed to decode sticker frame: {}", e)))?
        .to_rgba8();

    match remove_background(&decoded, config) {
        Ok(keyed) => Ok((ImageIOService::encode_png(&keyed)?, true)),
        Err(e) => {
            warn!(error = %e, "Background removal failed, keeping the unprocessed frame");
            Ok((ImageIOService::encode_png(&decoded)?, false))
        },
    }
}
