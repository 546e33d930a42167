//! # 画布归一化模块
//!
//! ## 设计思路
//!
//! 生成模型的构图不可控：尺寸不固定、四周可能留白、开口位置随机。
//! 这里把一张随机产物变成可预期的标准资产：
//! - 铺满：内容占比不足时裁到内容包围盒再放大；
//! - 定尺寸：最终一定精确缩放到目标画布（硬性后置条件）；
//! - 定开口：固定内缩窗口，或提取最大的近白连通域作为唯一开口。

use image::RgbaImage;

use super::alpha::{color_key_to_alpha, is_content, isolate_largest_hole, trim_transparent_margins};
use super::compositor::ApertureStrategy;
use super::geometry::Rect;
use super::resize::resize_exact;
use super::{ApertureInsets, ImageError, ImagingConfig, ResampleFilter};

/// 内容像素（非透明、非近白）占全部像素的比例。
pub fn content_coverage(bitmap: &RgbaImage, background_threshold: u8) -> f32 {
    let total = bitmap.width() as u64 * bitmap.height() as u64;
    if total == 0 {
        return 0.0;
    }
    let content = bitmap
        .pixels()
        .filter(|p| is_content(p, background_threshold))
        .count() as u64;
    (content as f64 / total as f64) as f32
}

/// 将任意尺寸的画框归一化到 `target_width × target_height`。
///
/// 内容占比低于 `coverage_threshold` 时先裁到内容包围盒；完全没有内容时返回
/// `DegenerateFrame`。成功时输出尺寸恒等于目标尺寸。
pub fn normalize_to_canvas(
    bitmap: RgbaImage,
    target_width: u32,
    target_height: u32,
    coverage_threshold: f32,
    background_threshold: u8,
    filter: ResampleFilter,
) -> Result<RgbaImage, ImageError> {
    let (width, height) = bitmap.dimensions();
    let coverage = content_coverage(&bitmap, background_threshold);

    let source = if coverage < coverage_threshold {
        let (cropped, bounds) = trim_transparent_margins(bitmap, background_threshold).into_result()?;
        log::info!(
            "🧭 内容覆盖率 {:.1}% 低于 {:.1}%，裁到内容区域 ({},{})-({},{})",
            coverage * 100.0,
            coverage_threshold * 100.0,
            bounds.x0,
            bounds.y0,
            bounds.x1,
            bounds.y1
        );
        cropped
    } else {
        bitmap
    };

    let normalized = resize_exact(&source, target_width, target_height, filter)?;

    log::debug!(
        "📐 画布归一化：{}x{} -> {}x{}",
        width,
        height,
        normalized.width(),
        normalized.height()
    );

    Ok(normalized)
}

/// 在全不透明的 alpha 通道上按内缩印出一块 alpha=0 的矩形开口。
///
/// 与画面内容无关，开口位置完全由内缩决定。
pub fn apply_fixed_aperture(bitmap: &mut RgbaImage, insets: ApertureInsets) -> Result<Rect, ImageError> {
    let (width, height) = bitmap.dimensions();
    let aperture = insets.rect_in(width, height)?;

    for (x, y, pixel) in bitmap.enumerate_pixels_mut() {
        pixel[3] = if aperture.contains(x, y) { 0 } else { 255 };
    }

    Ok(aperture)
}

/// 生成阶段的完整画框处理：归一化画布 + 按策略确定唯一开口。
pub fn prepare_frame(
    raw: RgbaImage,
    strategy: &ApertureStrategy,
    config: &ImagingConfig,
) -> Result<(RgbaImage, Rect), ImageError> {
    let mut frame = normalize_to_canvas(
        raw,
        config.canvas_width,
        config.canvas_height,
        config.coverage_threshold,
        config.color_key_threshold,
        config.resample,
    )?;

    let aperture = match strategy {
        ApertureStrategy::Fixed(insets) => apply_fixed_aperture(&mut frame, *insets)?,
        ApertureStrategy::MaskDetected => {
            for pixel in frame.pixels_mut() {
                pixel[3] = 255;
            }
            color_key_to_alpha(&mut frame, config.color_key_threshold);
            isolate_largest_hole(&mut frame).ok_or_else(|| {
                ImageError::DegenerateFrame("画框中没有可作为开口的近白区域".to_string())
            })?
        }
    };

    log::info!(
        "🖼️ 画框就绪：{}x{} 开口 ({},{})-({},{}) 策略 {}",
        frame.width(),
        frame.height(),
        aperture.x0,
        aperture.y0,
        aperture.x1,
        aperture.y1,
        strategy.as_str()
    );

    Ok((frame, aperture))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn bordered_frame(width: u32, height: u32, margin: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            let inside_margin = x >= margin && y >= margin && x < width - margin && y < height - margin;
            if inside_margin {
                Rgba([180, 40, 40, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        })
    }

    #[test]
    fn normalize_hits_canvas_for_various_inputs() {
        for (w, h) in [(512, 512), (2048, 1024), (1080, 1350)] {
            let input = RgbaImage::from_pixel(w, h, Rgba([90, 30, 200, 255]));
            let output = normalize_to_canvas(input, 1080, 1350, 0.9, 235, ResampleFilter::Lanczos3)
                .expect("normalize should succeed");
            assert_eq!(output.dimensions(), (1080, 1350));
        }
    }

    #[test]
    fn normalize_crops_white_margins_before_scaling() {
        let input = bordered_frame(400, 500, 100);
        let output = normalize_to_canvas(input, 1080, 1350, 0.9, 235, ResampleFilter::Lanczos3)
            .expect("normalize should succeed");

        assert_eq!(output.dimensions(), (1080, 1350));
        // 四角原本是白边，裁切后应为内容色
        for (x, y) in [(0, 0), (1079, 0), (0, 1349), (1079, 1349)] {
            let p = output.get_pixel(x, y);
            assert!(p[0] > 150 && p[1] < 80, "corner ({x},{y}) still white: {:?}", p);
        }
    }

    #[test]
    fn normalize_all_white_is_degenerate() {
        let input = RgbaImage::from_pixel(300, 300, Rgba([255, 255, 255, 255]));
        let result = normalize_to_canvas(input, 1080, 1350, 0.9, 235, ResampleFilter::Lanczos3);

        assert!(matches!(result, Err(ImageError::DegenerateFrame(_))));
    }

    #[test]
    fn fixed_aperture_stamps_exact_window() {
        let mut frame = RgbaImage::from_pixel(1080, 1350, Rgba([10, 10, 10, 128]));
        let aperture = apply_fixed_aperture(&mut frame, ApertureInsets::default()).expect("aperture fits");

        assert_eq!(aperture, Rect { x0: 120, y0: 160, x1: 960, y1: 1150 });
        assert_eq!(frame.get_pixel(119, 160)[3], 255);
        assert_eq!(frame.get_pixel(120, 160)[3], 0);
        assert_eq!(frame.get_pixel(959, 1149)[3], 0);
        assert_eq!(frame.get_pixel(960, 1149)[3], 255);
        assert_eq!(frame.get_pixel(500, 1150)[3], 255);
    }

    #[test]
    fn fixed_aperture_rejects_too_small_canvas() {
        let mut frame = RgbaImage::from_pixel(240, 360, Rgba([10, 10, 10, 255]));
        assert!(matches!(
            apply_fixed_aperture(&mut frame, ApertureInsets::default()),
            Err(ImageError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn prepare_frame_mask_detected_finds_white_window() {
        let config = ImagingConfig::default();
        let raw = RgbaImage::from_fn(540, 675, |x, y| {
            if (100..440).contains(&x) && (120..560).contains(&y) {
                Rgba([252, 252, 252, 255])
            } else {
                Rgba([20, 120, 60, 255])
            }
        });

        let (frame, aperture) = prepare_frame(raw, &ApertureStrategy::MaskDetected, &config)
            .expect("frame should prepare");

        assert_eq!(frame.dimensions(), (1080, 1350));
        assert!(aperture.x0 >= 195 && aperture.x0 <= 205, "x0 = {}", aperture.x0);
        assert!(aperture.y0 >= 235 && aperture.y0 <= 245, "y0 = {}", aperture.y0);
        assert_eq!(frame.get_pixel(540, 675)[3], 0);
        assert_eq!(frame.get_pixel(10, 10)[3], 255);
    }

    #[test]
    fn prepare_frame_mask_detected_without_window_is_degenerate() {
        let config = ImagingConfig::default();
        let raw = RgbaImage::from_pixel(200, 250, Rgba([20, 120, 60, 255]));

        let result = prepare_frame(raw, &ApertureStrategy::MaskDetected, &config);
        assert!(matches!(result, Err(ImageError::DegenerateFrame(_))));
    }
}
