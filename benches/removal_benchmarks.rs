use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use image::{Rgba, RgbaImage};
use remuse::{
    classify::ClassifiedError, detect_background, remove_background, services::ImageIOService,
    RemovalConfig,
};

/// Sticker-like frame: dark background, bright disc with a dark logo in the middle
fn sticker_frame(size: u32) -> RgbaImage {
    let center = size as f32 / 2.0;
    let radius = size as f32 * 0.35;
    RgbaImage::from_fn(size, size, |x, y| {
        let dx = x as f32 - center;
        let dy = y as f32 - center;
        let distance = (dx * dx + dy * dy).sqrt();
        if distance < radius * 0.3 {
            Rgba([15, 15, 15, 255])
        } else if distance < radius {
            Rgba([230, 180, 90, 255])
        } else {
            // Slight noise so the background is not perfectly uniform
            let noise = ((x * 7 + y * 13) % 20) as u8;
            Rgba([noise, noise, noise, 255])
        }
    })
}

fn bench_remove_background(c: &mut Criterion) {
    let config = RemovalConfig::default();
    let mut group = c.benchmark_group("remove_background");

    for size in [256_u32, 512, 1024] {
        let frame = sticker_frame(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            b.iter(|| remove_background(black_box(frame), black_box(&config)));
        });
    }

    group.finish();
}

fn bench_detect_background(c: &mut Criterion) {
    let config = RemovalConfig::default();
    let frame = sticker_frame(1024);

    c.bench_function("detect_background_1024", |b| {
        b.iter(|| detect_background(black_box(&frame), black_box(&config)));
    });
}

fn bench_sticker_finish(c: &mut Criterion) {
    let config = RemovalConfig::default();
    let png = ImageIOService::encode_png(&sticker_frame(512)).unwrap();

    c.bench_function("decode_remove_encode_512", |b| {
        b.iter(|| {
            let keyed = remuse::remove_background_from_bytes(black_box(&png), &config).unwrap();
            ImageIOService::encode_png(&keyed).unwrap()
        });
    });
}

fn bench_classify(c: &mut Criterion) {
    let messages = [
        "Network error: error sending request for url",
        "API error 429: Resource has been exhausted (e.g. check quota).",
        "Request blocked by safety filter: SAFETY",
        "Failed to parse AI response as JSON: expected value at line 1 column 1",
        "something nobody anticipated happened in the middle of the request pipeline and kept going",
    ];

    c.bench_function("classify_error_messages", |b| {
        b.iter(|| {
            for message in &messages {
                black_box(ClassifiedError::classify(black_box(message)));
            }
        });
    });
}

criterion_group!(
    benches,
    bench_remove_background,
    bench_detect_background,
    bench_sticker_finish,
    bench_classify
);
criterion_main!(benches);
