//! # 透明度推导模块
//!
//! ## 设计思路
//!
//! 生成模型给出的画框没有真正的透明通道，“开口”只是一片近白色区域。
//! 本模块负责两件相反的事：
//! - 色键：把近白像素的 alpha 清零，得到真正的透明洞；
//! - 裁边：找出非透明、非近白的内容包围盒，去掉四周死边。
//!
//! ## 实现思路
//!
//! - 近白判定为 `R > t && G > t && B > t`，严格大于。
//! - 裁边在无内容时原样返回并标记为退化，由调用方决定是否报 `DegenerateFrame`。
//! - 最大透明连通域的提取采用 4 连通 BFS，优先选择不接触画布边缘的区域。

use std::collections::VecDeque;

use image::{Rgba, RgbaImage};

use super::geometry::{bounding_box, Rect};
use super::ImageError;

/// 像素是否为近白色（仅看 RGB）。
#[inline]
pub fn is_near_white(pixel: &Rgba<u8>, threshold: u8) -> bool {
    pixel[0] > threshold && pixel[1] > threshold && pixel[2] > threshold
}

/// 像素是否属于画框内容：不透明且不是近白背景。
#[inline]
pub fn is_content(pixel: &Rgba<u8>, threshold: u8) -> bool {
    pixel[3] > 0 && !is_near_white(pixel, threshold)
}

/// 将近白像素设为完全透明，其他像素保持不变。
///
/// 同一阈值重复调用结果不变。
pub fn color_key_to_alpha(bitmap: &mut RgbaImage, threshold: u8) -> usize {
    let mut cleared = 0usize;
    for pixel in bitmap.pixels_mut() {
        if is_near_white(pixel, threshold) && pixel[3] != 0 {
            pixel[3] = 0;
            cleared += 1;
        }
    }
    cleared
}

/// 裁边结果。
#[derive(Debug)]
pub enum TrimOutcome {
    /// 找到内容并裁切到其包围盒。
    Trimmed { bitmap: RgbaImage, bounds: Rect },
    /// 没有任何内容像素，原图原样返回。
    Degenerate(RgbaImage),
}

impl TrimOutcome {
    pub fn trimmed(&self) -> bool {
        matches!(self, Self::Trimmed { .. })
    }

    pub fn bitmap(&self) -> &RgbaImage {
        match self {
            Self::Trimmed { bitmap, .. } | Self::Degenerate(bitmap) => bitmap,
        }
    }

    pub fn into_bitmap(self) -> RgbaImage {
        match self {
            Self::Trimmed { bitmap, .. } | Self::Degenerate(bitmap) => bitmap,
        }
    }

    /// 将退化情况转换为 `DegenerateFrame` 错误。
    pub fn into_result(self) -> Result<(RgbaImage, Rect), ImageError> {
        match self {
            Self::Trimmed { bitmap, bounds } => Ok((bitmap, bounds)),
            Self::Degenerate(bitmap) => Err(ImageError::DegenerateFrame(format!(
                "{}x{} 图像中没有非透明、非近白的像素",
                bitmap.width(),
                bitmap.height()
            ))),
        }
    }
}

/// 裁掉透明或近白的四周死边。
pub fn trim_transparent_margins(bitmap: RgbaImage, threshold: u8) -> TrimOutcome {
    let Some(bounds) = bounding_box(&bitmap, |p| is_content(p, threshold)) else {
        log::debug!(
            "🫥 裁边：{}x{} 图像无内容像素，原样返回",
            bitmap.width(),
            bitmap.height()
        );
        return TrimOutcome::Degenerate(bitmap);
    };

    if bounds.size() == bitmap.dimensions() {
        return TrimOutcome::Trimmed { bitmap, bounds };
    }

    let cropped = image::imageops::crop_imm(&bitmap, bounds.x0, bounds.y0, bounds.width(), bounds.height())
        .to_image();
    TrimOutcome::Trimmed {
        bitmap: cropped,
        bounds,
    }
}

/// 只保留一个透明连通域作为开口，其余透明像素恢复为不透明。
///
/// 选取规则：不接触画布边缘的最大连通域；若全部接触边缘，则取整体最大者。
/// 没有任何透明像素时返回 `None` 且不修改图像。
pub fn isolate_largest_hole(bitmap: &mut RgbaImage) -> Option<Rect> {
    let (width, height) = bitmap.dimensions();
    let w = width as usize;
    let h = height as usize;
    if w == 0 || h == 0 {
        return None;
    }

    let mut labels = vec![0u32; w * h];
    let mut regions: Vec<HoleRegion> = Vec::new();
    let mut queue = VecDeque::new();

    for start in 0..w * h {
        if labels[start] != 0 || bitmap.as_raw()[start * 4 + 3] != 0 {
            continue;
        }

        let label = regions.len() as u32 + 1;
        let mut region = HoleRegion::new(label, start % w, start / w);
        labels[start] = label;
        queue.push_back(start);

        while let Some(idx) = queue.pop_front() {
            let (x, y) = (idx % w, idx / w);
            region.include(x, y, w, h);

            let neighbors = [
                (x > 0).then(|| idx - 1),
                (x + 1 < w).then(|| idx + 1),
                (y > 0).then(|| idx - w),
                (y + 1 < h).then(|| idx + w),
            ];
            for next in neighbors.into_iter().flatten() {
                if labels[next] == 0 && bitmap.as_raw()[next * 4 + 3] == 0 {
                    labels[next] = label;
                    queue.push_back(next);
                }
            }
        }

        regions.push(region);
    }

    let chosen = regions
        .iter()
        .filter(|r| !r.touches_border)
        .max_by_key(|r| r.area)
        .or_else(|| regions.iter().max_by_key(|r| r.area))?;

    let keep = chosen.label;
    let bounds = Rect::new(
        chosen.min_x as u32,
        chosen.min_y as u32,
        chosen.max_x as u32 + 1,
        chosen.max_y as u32 + 1,
    )?;

    if regions.len() > 1 {
        log::debug!(
            "🕳️ 检测到 {} 个透明区域，保留最大开口 {}x{}（面积 {}）",
            regions.len(),
            bounds.width(),
            bounds.height(),
            chosen.area
        );
        for (idx, pixel) in bitmap.pixels_mut().enumerate() {
            if labels[idx] != 0 && labels[idx] != keep {
                pixel[3] = 255;
            }
        }
    }

    Some(bounds)
}

struct HoleRegion {
    label: u32,
    area: usize,
    min_x: usize,
    min_y: usize,
    max_x: usize,
    max_y: usize,
    touches_border: bool,
}

impl HoleRegion {
    fn new(label: u32, x: usize, y: usize) -> Self {
        Self {
            label,
            area: 0,
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
            touches_border: false,
        }
    }

    fn include(&mut self, x: usize, y: usize, w: usize, h: usize) {
        self.area += 1;
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        if x == 0 || y == 0 || x + 1 == w || y + 1 == h {
            self.touches_border = true;
        }
    }
}
