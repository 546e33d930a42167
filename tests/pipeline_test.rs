use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

use totem_compositor::db::RecordStore;
use totem_compositor::imaging::{prepare_frame, ApertureInsets, ApertureStrategy, Compositor, ImagingConfig, Rect, ScaleMode};
use totem_compositor::jobs::{JobState, JobsConfig};
use totem_compositor::provider::ScriptedProvider;
use totem_compositor::service::{FrameRequest, StudioService};
use totem_compositor::storage::MemoryObjectStore;

const BORDER: Rgba<u8> = Rgba([110, 40, 150, 255]);
const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const PHOTO: Rgba<u8> = Rgba([30, 140, 60, 255]);

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{}_{}", prefix, nanos));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn encode(image: DynamicImage, format: ImageFormat) -> Bytes {
    let mut cursor = Cursor::new(Vec::new());
    image.write_to(&mut cursor, format).expect("encode test image");
    Bytes::from(cursor.into_inner())
}

/// 画框原图：四周白边 + 实色边框 + 中间白色窗口。
fn raw_frame(width: u32, height: u32, margin: u32, window: Rect) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let in_margin = x < margin || y < margin || x >= width - margin || y >= height - margin;
        if in_margin || window.contains(x, y) {
            WHITE
        } else {
            BORDER
        }
    })
}

fn close_to(pixel: &Rgba<u8>, expected: Rgba<u8>, tolerance: u8) -> bool {
    pixel.0.iter().zip(expected.0.iter()).all(|(a, b)| a.abs_diff(*b) <= tolerance)
}

#[tokio::test]
async fn reference_to_composite_with_fixed_aperture() {
    let dir = unique_temp_dir("totem_pipeline_fixed");
    let records = RecordStore::open(dir.join("totem.db")).expect("open records");
    let store = Arc::new(MemoryObjectStore::new());
    let window = Rect::new(250, 300, 650, 800).expect("window");
    let provider = Arc::new(ScriptedProvider::returning(raw_frame(900, 1100, 50, window)));

    let service = StudioService::start(
        records,
        Arc::clone(&provider),
        Arc::clone(&store),
        ImagingConfig::default(),
        &JobsConfig::default(),
    );

    let reference = encode(
        DynamicImage::ImageRgb8(image::RgbImage::from_pixel(800, 600, image::Rgb([200, 120, 40]))),
        ImageFormat::Jpeg,
    );
    let mut frame = service
        .submit_frame(
            "tester",
            FrameRequest::from_reference(reference)
                .with_strategy(ApertureStrategy::Fixed(ApertureInsets::default())),
        )
        .await
        .expect("submit frame");
    assert_eq!(frame.ticket.wait().await, JobState::Succeeded);
    assert_eq!(provider.calls()[0].reference_sizes, vec![(800, 600)]);

    let frame_png = service.fetch_image(&frame.storage_key).await.expect("frame blob");
    let stored_frame = image::load_from_memory(&frame_png).expect("decode frame").to_rgba8();
    assert_eq!(stored_frame.dimensions(), (1080, 1350));
    assert_eq!(stored_frame.get_pixel(0, 0)[3], 255);
    assert_eq!(stored_frame.get_pixel(1079, 1349)[3], 255);
    assert_eq!(stored_frame.get_pixel(120, 160)[3], 0);
    assert_eq!(stored_frame.get_pixel(959, 1149)[3], 0);
    assert_eq!(stored_frame.get_pixel(119, 160)[3], 255);

    let photo = encode(
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(1200, 1600, PHOTO)),
        ImageFormat::Png,
    );
    let mut composite = service
        .submit_integration("tester", &frame.id, photo, None)
        .await
        .expect("submit integration");
    assert_eq!(composite.ticket.wait().await, JobState::Succeeded);

    let composite_png = service.fetch_image(&composite.storage_key).await.expect("composite blob");
    let result = image::load_from_memory(&composite_png).expect("decode composite").to_rgba8();
    assert_eq!(result.dimensions(), (1080, 1350));
    assert!(result.pixels().all(|p| p[3] == 255), "composite must be fully opaque");
    for (x, y) in [(120, 160), (959, 160), (120, 1149), (959, 1149), (540, 655)] {
        assert!(close_to(result.get_pixel(x, y), PHOTO, 1), "aperture pixel ({x},{y})");
    }
    assert!(close_to(result.get_pixel(2, 2), BORDER, 2));

    let listing = service.list_for_owner("tester").await.expect("listing");
    assert_eq!(listing.frames.len(), 1);
    assert_eq!(listing.composites.len(), 1);

    service.shutdown().await;
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn failed_generation_leaves_orphan_for_reconciler() {
    let dir = unique_temp_dir("totem_pipeline_orphan");
    let records = RecordStore::open(dir.join("totem.db")).expect("open records");
    let store = Arc::new(MemoryObjectStore::new());
    let provider = Arc::new(ScriptedProvider::failing("no image part in response"));
    let jobs = JobsConfig {
        reconcile_grace_secs: 0,
        ..JobsConfig::default()
    };

    let service = StudioService::start(records, provider, Arc::clone(&store), ImagingConfig::default(), &jobs);

    let mut submission = service
        .submit_frame("tester", FrameRequest::from_theme("stained glass"))
        .await
        .expect("submit frame");
    assert!(matches!(submission.ticket.wait().await, JobState::Failed(_)));
    assert!(store.keys().is_empty());
    assert_eq!(service.list_for_owner("tester").await.expect("listing").frames.len(), 1);

    let report = service.reconcile().await.expect("reconcile");
    assert_eq!(report.deleted, 1);
    assert!(service.list_for_owner("tester").await.expect("listing").frames.is_empty());

    service.shutdown().await;
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn mask_detected_frame_uses_contain_and_leaves_margins() {
    let window = Rect::new(200, 250, 880, 1100).expect("window");
    let config = ImagingConfig::default();

    let (frame, aperture) =
        prepare_frame(raw_frame(1080, 1350, 0, window), &ApertureStrategy::MaskDetected, &config).expect("prepare");
    assert_eq!(aperture, window);

    let subject = RgbaImage::from_pixel(1200, 1600, PHOTO);
    let result = Compositor::new(&config)
        .integrate(&frame, &subject, &ApertureStrategy::MaskDetected)
        .expect("integrate");

    assert_eq!(result.placement.mode, ScaleMode::Contain);
    assert_eq!(result.placement.size.1, 850);
    assert!(result.placement.size.0 <= 680);
    assert_eq!(result.bitmap.dimensions(), (1080, 1350));
    assert!(close_to(result.bitmap.get_pixel(540, 675), PHOTO, 1));
    // Contain 在开口左右留下透明边
    assert_eq!(result.bitmap.get_pixel(202, 675)[3], 0);
    assert!(close_to(result.bitmap.get_pixel(100, 100), BORDER, 1));
}
