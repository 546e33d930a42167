//! # 几何工具模块
//!
//! ## 设计思路
//!
//! 纯函数集合，无状态：遮罩包围盒、contain/cover 缩放、居中摆放、按比例中心裁切。
//!
//! ## 实现思路
//!
//! - `Rect` 采用半开区间 `[x0, x1) × [y0, y1)`，宽高恒为正。
//! - 缩放后的尺寸用整数交叉相乘决定取哪条边，避免 `0.7 * 1200` 这类浮点误差
//!   让结果少一个像素；另一条边向下取整。
//! - 居中偏移使用向下取整除法（`div_euclid`）：奇数余量时多出的一个像素落在
//!   右侧/下侧；子图大于开口时，多出的一行/列溢出在左侧/上侧。

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

/// 图像坐标系中的矩形，半开区间。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Rect {
    /// 构造矩形；宽或高为 0 时返回 `None`。
    pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Option<Self> {
        if x1 > x0 && y1 > y0 {
            Some(Self { x0, y0, x1, y1 })
        } else {
            None
        }
    }

    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width(), self.height())
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// 矩形是否完全位于 `width × height` 画布内。
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x1 <= width && self.y1 <= height
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }
}

/// 子图放入开口时的缩放语义。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMode {
    /// 完整可见，可能在开口内留边。
    Contain,
    /// 填满开口，超出部分被画框遮挡。
    Cover,
}

impl ScaleMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Contain => "contain",
            Self::Cover => "cover",
        }
    }
}

impl std::str::FromStr for ScaleMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "contain" => Ok(Self::Contain),
            "cover" => Ok(Self::Cover),
            other => Err(format!("未知缩放模式：{}（可选：contain / cover）", other)),
        }
    }
}

/// 计算满足谓词的像素的包围盒；没有任何像素满足时返回 `None`。
pub fn bounding_box<F>(image: &RgbaImage, mut predicate: F) -> Option<Rect>
where
    F: FnMut(&Rgba<u8>) -> bool,
{
    let (width, height) = image.dimensions();
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0u32;
    let mut max_y = 0u32;
    let mut found = false;

    for (x, y, pixel) in image.enumerate_pixels() {
        if !predicate(pixel) {
            continue;
        }
        found = true;
        min_x = min_x.min(x);
        min_y = min_y.min(y);
        max_x = max_x.max(x);
        max_y = max_y.max(y);
    }

    if !found || width == 0 || height == 0 {
        return None;
    }

    Rect::new(min_x, min_y, max_x + 1, max_y + 1)
}

/// 缩放系数：cover 取 `max(holeW/subW, holeH/subH)`，contain 取 `min(...)`。
pub fn scale_factor(subject: (u32, u32), hole: (u32, u32), mode: ScaleMode) -> f64 {
    let sx = hole.0 as f64 / subject.0.max(1) as f64;
    let sy = hole.1 as f64 / subject.1.max(1) as f64;
    match mode {
        ScaleMode::Cover => sx.max(sy),
        ScaleMode::Contain => sx.min(sy),
    }
}

/// 按缩放语义计算子图缩放后的整数尺寸（向下取整，最少 1 像素）。
pub fn scaled_size(subject: (u32, u32), hole: (u32, u32), mode: ScaleMode) -> (u32, u32) {
    let (sw, sh) = (subject.0.max(1) as u64, subject.1.max(1) as u64);
    let (hw, hh) = (hole.0 as u64, hole.1 as u64);

    // hw/sw 与 hh/sh 的大小关系，交叉相乘后比较
    let width_ratio_dominates = hw * sh >= hh * sw;
    let width_driven = match mode {
        ScaleMode::Cover => width_ratio_dominates,
        ScaleMode::Contain => !width_ratio_dominates || hw * sh == hh * sw,
    };

    let (w, h) = if width_driven {
        (hw, sh * hw / sw)
    } else {
        (sw * hh / sh, hh)
    };

    (w.clamp(1, u32::MAX as u64) as u32, h.clamp(1, u32::MAX as u64) as u32)
}

/// 子图在开口内居中时的左上角坐标（可能为负，表示向左/上溢出）。
pub fn centered_offset(hole: Rect, size: (u32, u32)) -> (i64, i64) {
    let dx = (hole.width() as i64 - size.0 as i64).div_euclid(2);
    let dy = (hole.height() as i64 - size.1 as i64).div_euclid(2);
    (hole.x0 as i64 + dx, hole.y0 as i64 + dy)
}

/// 当长边/短边比例超过 `max_ratio` 时，返回居中裁切到该比例的区域；否则 `None`。
pub fn aspect_limited_crop(size: (u32, u32), max_ratio: f32) -> Option<Rect> {
    let (w, h) = size;
    if w == 0 || h == 0 || !max_ratio.is_finite() || max_ratio < 1.0 {
        return None;
    }

    let ratio = w.max(h) as f64 / w.min(h) as f64;
    if ratio <= max_ratio as f64 {
        return None;
    }

    if w > h {
        let new_w = ((h as f64 * max_ratio as f64).floor() as u32).clamp(1, w);
        let x0 = (w - new_w) / 2;
        Rect::new(x0, 0, x0 + new_w, h)
    } else {
        let new_h = ((w as f64 * max_ratio as f64).floor() as u32).clamp(1, h);
        let y0 = (h - new_h) / 2;
        Rect::new(0, y0, w, y0 + new_h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cover_uses_larger_ratio_and_exact_integer_sizes() {
        let hole = (840, 990);
        let subject = (1200, 1600);

        assert!((scale_factor(subject, hole, ScaleMode::Cover) - 0.7).abs() < 1e-12);
        assert_eq!(scaled_size(subject, hole, ScaleMode::Cover), (840, 1120));
    }

    #[test]
    fn contain_uses_smaller_ratio() {
        let hole = (840, 990);
        let subject = (1200, 1600);

        assert!((scale_factor(subject, hole, ScaleMode::Contain) - 0.61875).abs() < 1e-12);
        assert_eq!(scaled_size(subject, hole, ScaleMode::Contain), (742, 990));
    }

    #[test]
    fn equal_aspect_fills_hole_exactly_in_both_modes() {
        let hole = (840, 990);
        let subject = (1680, 1980);

        assert_eq!(scaled_size(subject, hole, ScaleMode::Cover), hole);
        assert_eq!(scaled_size(subject, hole, ScaleMode::Contain), hole);
    }

    #[test]
    fn centered_offset_floors_toward_trailing_side() {
        let hole = Rect::new(120, 160, 960, 1150).expect("valid rect");

        assert_eq!(centered_offset(hole, (840, 1120)), (120, 95));
        assert_eq!(centered_offset(hole, (839, 990)), (120, 160));
        // 溢出 1 像素时落在左侧
        assert_eq!(centered_offset(hole, (841, 990)), (119, 160));
    }

    #[test]
    fn bounding_box_of_empty_mask_is_none() {
        let image = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]));
        assert_eq!(bounding_box(&image, |p| p[3] == 0), None);
    }

    #[test]
    fn bounding_box_is_half_open() {
        let mut image = RgbaImage::from_pixel(10, 8, Rgba([0, 0, 0, 255]));
        image.put_pixel(2, 3, Rgba([0, 0, 0, 0]));
        image.put_pixel(6, 5, Rgba([0, 0, 0, 0]));

        let rect = bounding_box(&image, |p| p[3] == 0).expect("mask has pixels");
        assert_eq!(rect, Rect { x0: 2, y0: 3, x1: 7, y1: 6 });
        assert_eq!(rect.size(), (5, 3));
    }

    #[test]
    fn aspect_limited_crop_only_trims_extreme_ratios() {
        assert_eq!(aspect_limited_crop((1200, 1600), 3.0), None);

        let rect = aspect_limited_crop((4000, 1000), 3.0).expect("panorama should be cropped");
        assert_eq!(rect.size(), (3000, 1000));
        assert_eq!(rect.x0, 500);
    }
}
