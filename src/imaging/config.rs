//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有“可调策略”集中到 `ImagingConfig`：画布尺寸、色键阈值、覆盖率阈值、
//! 开口策略、每种开口对应的缩放语义、解码上限与重采样滤镜。
//!
//! ## 实现思路
//!
//! - `Default` 即参考部署的取值（1080×1350，四边内缩 120/160/120/200）。
//! - 全部字段 `#[serde(default)]`，配置文件只需写需要覆盖的项。
//! - `validate` 在启动时拒绝装不下开口的几何参数，避免任务运行中途才失败。

use fast_image_resize as fr;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use super::compositor::ApertureStrategy;
use super::geometry::{Rect, ScaleMode};
use super::ImageError;

pub const CANVAS_WIDTH: u32 = 1080;
pub const CANVAS_HEIGHT: u32 = 1350;

/// 固定开口的四边内缩（像素）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApertureInsets {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl Default for ApertureInsets {
    fn default() -> Self {
        Self {
            left: 120,
            top: 160,
            right: 120,
            bottom: 200,
        }
    }
}

impl ApertureInsets {
    /// 内缩在 `width × height` 画布上围出的开口矩形。
    ///
    /// 画布小于 `(left + right + 1, top + bottom + 1)` 时开口为空，返回错误。
    pub fn rect_in(&self, width: u32, height: u32) -> Result<Rect, ImageError> {
        let x1 = width.checked_sub(self.right);
        let y1 = height.checked_sub(self.bottom);

        x1.zip(y1)
            .and_then(|(x1, y1)| Rect::new(self.left, self.top, x1, y1))
            .ok_or_else(|| {
                ImageError::InvalidGeometry(format!(
                    "内缩 {}/{}/{}/{} 在 {}x{} 画布上围不出开口",
                    self.left, self.top, self.right, self.bottom, width, height
                ))
            })
    }
}

/// 重采样滤镜。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResampleFilter {
    Lanczos3,
    CatmullRom,
    Bilinear,
    Nearest,
}

impl ResampleFilter {
    pub(crate) fn to_fast_filter(self) -> fr::FilterType {
        match self {
            Self::Nearest => fr::FilterType::Box,
            Self::Bilinear => fr::FilterType::Bilinear,
            Self::CatmullRom => fr::FilterType::CatmullRom,
            Self::Lanczos3 => fr::FilterType::Lanczos3,
        }
    }

    pub(crate) fn to_image_filter(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Bilinear => FilterType::Triangle,
            Self::CatmullRom => FilterType::CatmullRom,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

/// 像素处理配置。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagingConfig {
    /// 标准画布宽度。
    pub canvas_width: u32,
    /// 标准画布高度。
    pub canvas_height: u32,
    /// 色键阈值：三个通道都大于该值即视为背景白。
    pub color_key_threshold: u8,
    /// 内容像素占比低于该值时先裁到内容包围盒再放大。
    pub coverage_threshold: f32,
    /// 生成画框时采用的开口策略。
    pub aperture_strategy: ApertureStrategy,
    /// 固定开口下的缩放语义。
    pub fixed_scale: ScaleMode,
    /// 遮罩检测开口下的缩放语义。
    pub detected_scale: ScaleMode,
    /// 重采样滤镜。
    pub resample: ResampleFilter,
    /// 上传/下载原始字节的体积上限（字节）。
    pub max_upload_bytes: u64,
    /// 解码后的像素上限（`width * height`）。
    pub max_decoded_pixels: u64,
    /// 解码阶段允许的预计内存上限（按 RGBA 估算，字节）。
    pub max_decoded_bytes: u64,
    /// 人像长边/短边比例上限，超过则居中裁切。
    pub subject_aspect_limit: f32,
}

impl Default for ImagingConfig {
    fn default() -> Self {
        Self {
            canvas_width: CANVAS_WIDTH,
            canvas_height: CANVAS_HEIGHT,
            color_key_threshold: 235,
            coverage_threshold: 0.9,
            aperture_strategy: ApertureStrategy::Fixed(ApertureInsets::default()),
            fixed_scale: ScaleMode::Cover,
            detected_scale: ScaleMode::Contain,
            resample: ResampleFilter::Lanczos3,
            max_upload_bytes: 50 * 1024 * 1024,
            max_decoded_pixels: 40_000_000,
            max_decoded_bytes: 160 * 1024 * 1024,
            subject_aspect_limit: 3.0,
        }
    }
}

impl ImagingConfig {
    /// 某种开口策略对应的缩放语义。
    pub fn scale_for(&self, strategy: &ApertureStrategy) -> ScaleMode {
        match strategy {
            ApertureStrategy::Fixed(_) => self.fixed_scale,
            ApertureStrategy::MaskDetected => self.detected_scale,
        }
    }

    pub fn canvas_size(&self) -> (u32, u32) {
        (self.canvas_width, self.canvas_height)
    }

    pub fn validate(&self) -> Result<(), ImageError> {
        if self.canvas_width == 0 || self.canvas_height == 0 {
            return Err(ImageError::InvalidGeometry(format!(
                "画布尺寸必须为正：{}x{}",
                self.canvas_width, self.canvas_height
            )));
        }

        if !(self.coverage_threshold > 0.0 && self.coverage_threshold <= 1.0) {
            return Err(ImageError::InvalidGeometry(format!(
                "coverage_threshold 必须在 (0, 1] 之间：{}",
                self.coverage_threshold
            )));
        }

        if self.color_key_threshold == u8::MAX {
            return Err(ImageError::InvalidGeometry(
                "color_key_threshold 为 255 时没有像素会被视为背景".to_string(),
            ));
        }

        if !(self.subject_aspect_limit >= 1.0) {
            return Err(ImageError::InvalidGeometry(format!(
                "subject_aspect_limit 不能小于 1：{}",
                self.subject_aspect_limit
            )));
        }

        if let ApertureStrategy::Fixed(insets) = &self.aperture_strategy {
            insets.rect_in(self.canvas_width, self.canvas_height)?;
        }

        Ok(())
    }
}
