//! # 合成模块
//!
//! ## 设计思路
//!
//! 一条可配置的流水线，而不是多份复制粘贴的“整合”函数：
//! - 开口来源是一个枚举 `ApertureStrategy`（固定内缩 / 遮罩检测）；
//! - 缩放语义是另一个枚举 `ScaleMode`（contain / cover），由配置按开口策略选定。
//!
//! ## 实现思路
//!
//! 1. 确定开口矩形（固定内缩直接计算；遮罩检测取 alpha==0 的包围盒）
//! 2. 按缩放语义计算人像尺寸与居中偏移
//! 3. 新建全透明画布：先按人像 alpha 贴人像，再按画框 alpha 贴画框
//!
//! 整个过程只操作本地缓冲，失败时不会把半成品交给调用方。

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use super::geometry::{bounding_box, centered_offset, scale_factor, scaled_size, Rect, ScaleMode};
use super::resize::resize_exact;
use super::{ApertureInsets, ImageError, ImagingConfig, ResampleFilter};

/// 画框开口的来源。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ApertureStrategy {
    /// 固定内缩窗口，与画面内容无关。
    Fixed(ApertureInsets),
    /// 由画框 alpha 通道中透明像素的包围盒决定。
    MaskDetected,
}

impl ApertureStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fixed(_) => "fixed",
            Self::MaskDetected => "mask_detected",
        }
    }
}

/// 人像在画布上的摆放方案。
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Placement {
    pub aperture: Rect,
    pub mode: ScaleMode,
    pub scale: f64,
    /// 缩放后的人像尺寸。
    pub size: (u32, u32),
    /// 人像左上角在画布上的位置，可能为负。
    pub offset: (i64, i64),
}

/// 合成结果：尺寸恒等于画框尺寸。
#[derive(Debug, Clone)]
pub struct CompositeResult {
    pub bitmap: RgbaImage,
    pub placement: Placement,
}

/// 透明像素（alpha==0）的包围盒即开口。
pub fn detect_aperture(frame: &RgbaImage) -> Result<Rect, ImageError> {
    bounding_box(frame, |p| p[3] == 0).ok_or_else(|| {
        ImageError::NoApertureFound(format!(
            "{}x{} 画框中没有透明像素",
            frame.width(),
            frame.height()
        ))
    })
}

/// 计算人像放入开口时的缩放与偏移。
pub fn plan_placement(aperture: Rect, subject: (u32, u32), mode: ScaleMode) -> Placement {
    let hole = aperture.size();
    let size = scaled_size(subject, hole, mode);
    Placement {
        aperture,
        mode,
        scale: scale_factor(subject, hole, mode),
        size,
        offset: centered_offset(aperture, size),
    }
}

/// 把人像放在画框下方合成，返回与画框同尺寸的新位图。
pub fn composite(
    frame: &RgbaImage,
    subject: &RgbaImage,
    aperture: Rect,
    mode: ScaleMode,
    filter: ResampleFilter,
) -> Result<CompositeResult, ImageError> {
    let (width, height) = frame.dimensions();
    if !aperture.fits_within(width, height) {
        return Err(ImageError::InvalidGeometry(format!(
            "开口 ({},{})-({},{}) 超出画框 {}x{}",
            aperture.x0, aperture.y0, aperture.x1, aperture.y1, width, height
        )));
    }

    let placement = plan_placement(aperture, subject.dimensions(), mode);
    let resized = resize_exact(subject, placement.size.0, placement.size.1, filter)?;

    let mut canvas = RgbaImage::new(width, height);
    image::imageops::overlay(&mut canvas, &resized, placement.offset.0, placement.offset.1);
    image::imageops::overlay(&mut canvas, frame, 0, 0);

    log::debug!(
        "🧩 合成：人像 {}x{} -> {}x{}（{}，系数 {:.4}）偏移 ({}, {})",
        subject.width(),
        subject.height(),
        placement.size.0,
        placement.size.1,
        mode.as_str(),
        placement.scale,
        placement.offset.0,
        placement.offset.1
    );

    Ok(CompositeResult {
        bitmap: canvas,
        placement,
    })
}

/// 遮罩检测开口：画框中没有透明像素时返回 `NoApertureFound`。
pub fn integrate_with_detected_aperture(
    frame: &RgbaImage,
    subject: &RgbaImage,
    mode: ScaleMode,
    filter: ResampleFilter,
) -> Result<CompositeResult, ImageError> {
    let aperture = detect_aperture(frame)?;
    composite(frame, subject, aperture, mode, filter)
}

/// 固定内缩开口：开口由内缩直接给出，不看画框像素。
pub fn integrate_with_fixed_aperture(
    frame: &RgbaImage,
    subject: &RgbaImage,
    insets: ApertureInsets,
    mode: ScaleMode,
    filter: ResampleFilter,
) -> Result<CompositeResult, ImageError> {
    let aperture = insets.rect_in(frame.width(), frame.height())?;
    composite(frame, subject, aperture, mode, filter)
}

/// 按配置选择缩放语义与滤镜的合成器。
#[derive(Debug, Clone)]
pub struct Compositor {
    config: ImagingConfig,
}

impl Compositor {
    pub fn new(config: &ImagingConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn integrate(
        &self,
        frame: &RgbaImage,
        subject: &RgbaImage,
        strategy: &ApertureStrategy,
    ) -> Result<CompositeResult, ImageError> {
        let mode = self.config.scale_for(strategy);
        self.integrate_with_mode(frame, subject, strategy, mode)
    }

    /// 显式指定缩放语义，覆盖配置中的默认值。
    pub fn integrate_with_mode(
        &self,
        frame: &RgbaImage,
        subject: &RgbaImage,
        strategy: &ApertureStrategy,
        mode: ScaleMode,
    ) -> Result<CompositeResult, ImageError> {
        match strategy {
            ApertureStrategy::Fixed(insets) => {
                integrate_with_fixed_aperture(frame, subject, *insets, mode, self.config.resample)
            }
            ApertureStrategy::MaskDetected => {
                integrate_with_detected_aperture(frame, subject, mode, self.config.resample)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::canvas::apply_fixed_aperture;
    use image::Rgba;

    const FRAME_COLOR: Rgba<u8> = Rgba([200, 30, 30, 255]);
    const PHOTO_COLOR: Rgba<u8> = Rgba([20, 60, 220, 255]);

    fn is_photo(pixel: &Rgba<u8>) -> bool {
        pixel.0.iter().zip(PHOTO_COLOR.0.iter()).all(|(a, b)| a.abs_diff(*b) <= 1)
    }

    fn fixed_frame() -> (RgbaImage, Rect) {
        let mut frame = RgbaImage::from_pixel(1080, 1350, FRAME_COLOR);
        let aperture = apply_fixed_aperture(&mut frame, ApertureInsets::default()).expect("aperture fits");
        (frame, aperture)
    }

    #[test]
    fn detect_aperture_requires_transparent_pixels() {
        let frame = RgbaImage::from_pixel(100, 100, FRAME_COLOR);
        assert!(matches!(detect_aperture(&frame), Err(ImageError::NoApertureFound(_))));

        let (frame, aperture) = fixed_frame();
        assert_eq!(detect_aperture(&frame).expect("hole exists"), aperture);
    }

    #[test]
    fn cover_portrait_into_fixed_aperture() {
        let (frame, aperture) = fixed_frame();
        let photo = RgbaImage::from_pixel(1200, 1600, PHOTO_COLOR);

        let result = integrate_with_fixed_aperture(
            &frame,
            &photo,
            ApertureInsets::default(),
            ScaleMode::Cover,
            ResampleFilter::Lanczos3,
        )
        .expect("composite should succeed");

        assert_eq!(result.bitmap.dimensions(), (1080, 1350));
        assert_eq!(result.placement.size, (840, 1120));
        assert_eq!(result.placement.offset, (120, 95));

        for (x, y, pixel) in result.bitmap.enumerate_pixels() {
            if aperture.contains(x, y) {
                assert!(is_photo(pixel), "aperture pixel ({x},{y}) = {:?}", pixel);
            } else {
                assert_eq!(*pixel, FRAME_COLOR, "frame pixel ({x},{y})");
            }
        }
    }

    #[test]
    fn contain_leaves_transparent_gap_inside_aperture() {
        let (frame, _) = fixed_frame();
        let photo = RgbaImage::from_pixel(1200, 1600, PHOTO_COLOR);

        let result = integrate_with_fixed_aperture(
            &frame,
            &photo,
            ApertureInsets::default(),
            ScaleMode::Contain,
            ResampleFilter::Lanczos3,
        )
        .expect("composite should succeed");

        assert_eq!(result.placement.size, (742, 990));
        assert_eq!(result.placement.offset, (169, 160));
        assert_eq!(result.bitmap.get_pixel(130, 600)[3], 0);
        assert!(is_photo(result.bitmap.get_pixel(540, 600)));
    }

    #[test]
    fn matching_aspect_leaves_no_gap_under_cover() {
        let (frame, aperture) = fixed_frame();
        let photo = RgbaImage::from_pixel(420, 495, PHOTO_COLOR);

        let result = integrate_with_fixed_aperture(
            &frame,
            &photo,
            ApertureInsets::default(),
            ScaleMode::Cover,
            ResampleFilter::Lanczos3,
        )
        .expect("composite should succeed");

        assert_eq!(result.placement.size, aperture.size());
        assert_eq!(result.placement.offset, (aperture.x0 as i64, aperture.y0 as i64));
        assert!(result.bitmap.pixels().all(|p| p[3] >= 254));
    }

    #[test]
    fn detected_aperture_without_hole_fails() {
        let frame = RgbaImage::from_pixel(1080, 1350, FRAME_COLOR);
        let photo = RgbaImage::from_pixel(10, 10, PHOTO_COLOR);

        let result = integrate_with_detected_aperture(&frame, &photo, ScaleMode::Contain, ResampleFilter::Lanczos3);
        assert!(matches!(result, Err(ImageError::NoApertureFound(_))));
    }

    #[test]
    fn compositor_picks_scale_from_strategy() {
        let (frame, _) = fixed_frame();
        let photo = RgbaImage::from_pixel(1200, 1600, PHOTO_COLOR);
        let compositor = Compositor::new(&ImagingConfig::default());

        let fixed = compositor
            .integrate(&frame, &photo, &ApertureStrategy::Fixed(ApertureInsets::default()))
            .expect("fixed integrate");
        let detected = compositor
            .integrate(&frame, &photo, &ApertureStrategy::MaskDetected)
            .expect("detected integrate");

        assert_eq!(fixed.placement.mode, ScaleMode::Cover);
        assert_eq!(detected.placement.mode, ScaleMode::Contain);
        assert_eq!(detected.placement.aperture, fixed.placement.aperture);
    }

    #[test]
    fn strategy_serializes_with_kind_tag() {
        let json = serde_json::to_value(ApertureStrategy::Fixed(ApertureInsets::default())).expect("serialize");
        assert_eq!(json["kind"], "fixed");
        assert_eq!(json["bottom"], 200);

        let parsed: ApertureStrategy =
            serde_json::from_str(r#"{"kind":"mask_detected"}"#).expect("deserialize");
        assert_eq!(parsed, ApertureStrategy::MaskDetected);
    }
}
