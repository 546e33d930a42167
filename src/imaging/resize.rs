//! # 重采样模块
//!
//! ## 设计思路
//!
//! 所有缩放统一走 `fast_image_resize` 卷积实现（默认 Lanczos3），
//! 失败时回退 `image::imageops::resize`，保证“精确到目标尺寸”这一后置条件。

use fast_image_resize as fr;
use image::RgbaImage;

use super::{ImageError, ResampleFilter};

/// 将 RGBA 位图缩放到恰好 `width × height`。
pub fn resize_exact(
    bitmap: &RgbaImage,
    width: u32,
    height: u32,
    filter: ResampleFilter,
) -> Result<RgbaImage, ImageError> {
    if width == 0 || height == 0 {
        return Err(ImageError::InvalidGeometry(format!(
            "目标尺寸必须为正：{}x{}",
            width, height
        )));
    }

    if bitmap.dimensions() == (width, height) {
        return Ok(bitmap.clone());
    }

    match resize_with_fast_image_resize(bitmap, width, height, filter) {
        Ok(resized) => Ok(resized),
        Err(err) => {
            log::warn!(
                "⚠️ fast_image_resize 缩放失败，回退 image::resize：{}",
                err
            );
            Ok(image::imageops::resize(
                bitmap,
                width,
                height,
                filter.to_image_filter(),
            ))
        }
    }
}

fn resize_with_fast_image_resize(
    bitmap: &RgbaImage,
    width: u32,
    height: u32,
    filter: ResampleFilter,
) -> Result<RgbaImage, ImageError> {
    let (src_width, src_height) = bitmap.dimensions();

    let src_image = fr::images::Image::from_vec_u8(
        src_width,
        src_height,
        bitmap.as_raw().clone(),
        fr::PixelType::U8x4,
    )
    .map_err(|e| ImageError::Decode(format!("构建源图像缓冲失败：{}", e)))?;

    let mut dst_image = fr::images::Image::new(width, height, fr::PixelType::U8x4);

    let mut resizer = fr::Resizer::new();
    let options = fr::ResizeOptions::new()
        .resize_alg(fr::ResizeAlg::Convolution(filter.to_fast_filter()));

    resizer
        .resize(&src_image, &mut dst_image, Some(&options))
        .map_err(|e| ImageError::Decode(format!("fast_image_resize 执行失败：{}", e)))?;

    RgbaImage::from_raw(width, height, dst_image.into_vec())
        .ok_or_else(|| ImageError::Decode("fast_image_resize 输出缓冲长度异常".to_string()))
}
