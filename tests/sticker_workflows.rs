//! Integration tests for sticker generation

use remuse::{
    BatchPipeline, ErrorCategory, GeneratedSticker, ImageInput, ItemId, MockOutcome,
    MockVisionService, PipelineConfig, PipelineError, ServiceError,
};
use std::sync::Arc;
use std::time::Duration;

fn photo(name: &str) -> ImageInput {
    ImageInput::new(name, MockVisionService::sample_sticker_frame())
}

/// Pipeline with one successfully analyzed item
async fn analyzed(mock: MockVisionService) -> (BatchPipeline, Arc<MockVisionService>, ItemId) {
    let mock = Arc::new(mock);
    let pipeline = BatchPipeline::new(mock.clone(), PipelineConfig::default());
    let item = pipeline.process_one(photo("bottle.png")).await.unwrap();
    (pipeline, mock, item.id)
}

fn decode(png: &[u8]) -> image::RgbaImage {
    image::load_from_memory(png).unwrap().to_rgba8()
}

#[tokio::test]
async fn test_sticker_is_keyed_and_one_shot() {
    let (pipeline, mock, id) = analyzed(MockVisionService::new()).await;

    let item = pipeline.generate_sticker(id).await.unwrap();
    assert!(!item.sticker.generating);
    let sticker = item.sticker.sticker.as_ref().unwrap();
    assert_eq!(sticker.original_item_id, id);
    assert!(sticker.background_removed);
    assert!(sticker.caption.contains("旧物 #1"));

    let keyed = decode(&sticker.image_png);
    assert_eq!(keyed.get_pixel(0, 0)[3], 0);
    assert_eq!(keyed.get_pixel(8, 8)[3], 255);

    assert!(matches!(
        pipeline.generate_sticker(id).await,
        Err(PipelineError::StickerExists(_))
    ));
    assert_eq!(mock.sticker_calls(), 1);
}

#[tokio::test]
async fn test_missing_model_image_falls_back_to_source_photo() {
    let mock = MockVisionService::new().with_sticker_outcomes(vec![MockOutcome::Succeed(
        GeneratedSticker {
            image: None,
            caption: "我是一只瓶子。".to_string(),
        },
    )]);
    let (pipeline, _, id) = analyzed(mock).await;

    let item = pipeline.generate_sticker(id).await.unwrap();
    let sticker = item.sticker.sticker.unwrap();
    assert_eq!(sticker.caption, "我是一只瓶子。");
    assert!(sticker.background_removed);

    let keyed = decode(&sticker.image_png);
    assert_eq!(keyed.dimensions(), (16, 16));
    assert_eq!(keyed.get_pixel(0, 0)[3], 0);
}

#[tokio::test]
async fn test_remote_failure_clears_generating_flag() {
    let mock = MockVisionService::new().with_sticker_outcomes(vec![MockOutcome::Fail(
        ServiceError::Blocked("PROHIBITED_CONTENT".to_string()),
    )]);
    let (pipeline, _, id) = analyzed(mock).await;

    match pipeline.generate_sticker(id).await {
        Err(PipelineError::Remote(error)) => assert_eq!(error.category, ErrorCategory::Safety),
        other => panic!("expected a remote error, got {:?}", other),
    }
    let item = pipeline.item(id).unwrap();
    assert!(!item.sticker.generating);
    assert!(item.sticker.sticker.is_none());

    // The script is exhausted, so the second attempt succeeds
    let item = pipeline.generate_sticker(id).await.unwrap();
    assert!(item.sticker.sticker.is_some());
}

#[tokio::test]
async fn test_undecodable_frame_is_a_removal_error() {
    let mock = MockVisionService::new().with_sticker_outcomes(vec![MockOutcome::Succeed(
        GeneratedSticker {
            image: Some(b"definitely not an image".to_vec()),
            caption: String::new(),
        },
    )]);
    let (pipeline, _, id) = analyzed(mock).await;

    assert!(matches!(
        pipeline.generate_sticker(id).await,
        Err(PipelineError::Removal(_))
    ));
    let item = pipeline.item(id).unwrap();
    assert!(!item.sticker.generating);
    assert!(item.sticker.sticker.is_none());
}

#[tokio::test]
async fn test_concurrent_requests_for_one_item_are_rejected() {
    let mock = MockVisionService::new().with_delay(Duration::from_millis(20));
    let (pipeline, mock, id) = analyzed(mock).await;

    let (first, second) = tokio::join!(pipeline.generate_sticker(id), pipeline.generate_sticker(id));

    assert!(first.is_ok());
    assert!(matches!(second, Err(PipelineError::AlreadyInFlight(_))));
    assert_eq!(mock.sticker_calls(), 1);
}

#[tokio::test]
async fn test_sticker_requires_a_successful_analysis() {
    let mock = Arc::new(MockVisionService::new());
    let pipeline = BatchPipeline::new(mock.clone(), PipelineConfig::default());
    let ids = pipeline.enqueue(vec![photo("pending.png")]);

    assert!(matches!(
        pipeline.generate_sticker(ids[0]).await,
        Err(PipelineError::NotReady(_))
    ));
    assert!(matches!(
        pipeline.generate_sticker(ItemId::new()).await,
        Err(PipelineError::NotFound(_))
    ));
    assert_eq!(mock.sticker_calls(), 0);
}

#[tokio::test]
async fn test_cancelled_sticker_can_be_restarted() {
    let mock = MockVisionService::new().with_sticker_outcomes(vec![MockOutcome::Hang]);
    let (pipeline, _, id) = analyzed(mock).await;

    let (result, ()) = tokio::join!(pipeline.generate_sticker(id), async {
        tokio::task::yield_now().await;
        pipeline.cancel();
    });
    assert!(matches!(result, Err(PipelineError::Cancelled)));

    // The cancelled run never committed, leaving the flag stranded
    let item = pipeline.item(id).unwrap();
    assert!(item.sticker.generating);
    assert!(item.sticker.sticker.is_none());

    let item = pipeline.generate_sticker(id).await.unwrap();
    assert!(!item.sticker.generating);
    assert!(item.sticker.sticker.is_some());
}
