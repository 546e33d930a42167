//! # 解码与编码模块
//!
//! ## 设计思路
//!
//! 将“字节 → 图像 → RGBA”的过程集中管理，并在关键节点增加资源上限控制。
//! 优先做尺寸检查，再进行完整解码，降低恶意输入触发高内存开销的风险。
//!
//! ## 实现思路
//!
//! 1. 嗅探上传类型（`infer`），只放行 PNG / JPEG / WEBP / HEIC
//! 2. 读取 header 尺寸，按像素与内存上限快速拒绝
//! 3. 完整解码；人像额外应用 EXIF 方向、压平到不透明白底、极端比例居中裁切
//! 4. 输出统一编码为 PNG

use std::io::Cursor;

use image::metadata::Orientation;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader, Rgba, RgbaImage};

use super::geometry::aspect_limited_crop;
use super::{ImageError, ImagingConfig};

pub const PNG_CONTENT_TYPE: &str = "image/png";

const ACCEPTED_UPLOAD_TYPES: [&str; 5] = [
    "image/png",
    "image/jpeg",
    "image/jpg",
    "image/webp",
    "image/heic",
];

/// 校验上传字节的真实类型，返回嗅探到的 MIME。
pub fn sniff_upload(bytes: &[u8], config: &ImagingConfig) -> Result<&'static str, ImageError> {
    if bytes.is_empty() {
        return Err(ImageError::InvalidFormat("上传内容为空".to_string()));
    }

    if bytes.len() as u64 > config.max_upload_bytes {
        return Err(ImageError::ResourceLimit(format!(
            "文件过大：{:.2} MB（限制：{:.2} MB）",
            bytes.len() as f64 / 1024.0 / 1024.0,
            config.max_upload_bytes as f64 / 1024.0 / 1024.0
        )));
    }

    let kind = infer::get(bytes)
        .ok_or_else(|| ImageError::InvalidFormat("无法识别的文件类型".to_string()))?;

    if !ACCEPTED_UPLOAD_TYPES.contains(&kind.mime_type()) {
        return Err(ImageError::InvalidFormat(format!(
            "不支持的图片类型：{}",
            kind.mime_type()
        )));
    }

    Ok(kind.mime_type())
}

/// 解码任意图片为 RGBA 位图（不做方向校正，用于画框与参考图）。
pub fn decode_bitmap(bytes: &[u8], config: &ImagingConfig) -> Result<RgbaImage, ImageError> {
    let (width, height) = inspect_dimensions(bytes)?;
    validate_limits(config, width, height)?;

    let decoded = image::load_from_memory(bytes)
        .map_err(|e| ImageError::Decode(format!("图片解码失败：{}", e)))?;

    Ok(decoded.to_rgba8())
}

/// 解码人像：应用 EXIF 方向、压平为不透明、按比例上限居中裁切。
pub fn decode_subject(bytes: &[u8], config: &ImagingConfig) -> Result<RgbaImage, ImageError> {
    let (width, height) = inspect_dimensions(bytes)?;
    validate_limits(config, width, height)?;

    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ImageError::InvalidFormat(format!("无法识别图片格式：{}", e)))?
        .into_decoder()?;

    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut decoded = DynamicImage::from_decoder(decoder)?;
    decoded.apply_orientation(orientation);

    let mut subject = flatten_onto_white(decoded.to_rgba8());

    if let Some(crop) = aspect_limited_crop(subject.dimensions(), config.subject_aspect_limit) {
        log::info!(
            "✂️ 人像比例超限，居中裁切：{}x{} -> {}x{}",
            subject.width(),
            subject.height(),
            crop.width(),
            crop.height()
        );
        subject = image::imageops::crop_imm(&subject, crop.x0, crop.y0, crop.width(), crop.height())
            .to_image();
    }

    log::debug!(
        "🧍 人像解码完成 - 原始尺寸: {}x{} 方向: {:?} 输出尺寸: {}x{}",
        width,
        height,
        orientation,
        subject.width(),
        subject.height()
    );

    Ok(subject)
}

/// 将半透明像素合成到白底上，输出 alpha 恒为 255。
pub fn flatten_onto_white(mut bitmap: RgbaImage) -> RgbaImage {
    for pixel in bitmap.pixels_mut() {
        let alpha = pixel[3] as u32;
        if alpha == 255 {
            continue;
        }
        let blend = |c: u8| ((c as u32 * alpha + 255 * (255 - alpha) + 127) / 255) as u8;
        *pixel = Rgba([blend(pixel[0]), blend(pixel[1]), blend(pixel[2]), 255]);
    }
    bitmap
}

/// 编码为 PNG 字节。
pub fn encode_png(bitmap: &RgbaImage) -> Result<Vec<u8>, ImageError> {
    let mut cursor = Cursor::new(Vec::new());
    bitmap
        .write_to(&mut cursor, ImageFormat::Png)
        .map_err(|e| ImageError::Decode(format!("PNG 编码失败：{}", e)))?;
    Ok(cursor.into_inner())
}

/// 仅通过内存中的图片头信息读取宽高。
fn inspect_dimensions(bytes: &[u8]) -> Result<(u32, u32), ImageError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| ImageError::InvalidFormat(format!("无法识别图片格式：{}", e)))?
        .into_dimensions()
        .map_err(|e| ImageError::InvalidFormat(format!("无法读取图片尺寸：{}", e)))
}

fn validate_limits(config: &ImagingConfig, width: u32, height: u32) -> Result<(), ImageError> {
    let pixels = (width as u64)
        .checked_mul(height as u64)
        .ok_or_else(|| ImageError::ResourceLimit("图片像素数溢出".to_string()))?;

    if pixels == 0 {
        return Err(ImageError::Decode(format!("图片尺寸无效：{}x{}", width, height)));
    }

    if pixels > config.max_decoded_pixels {
        return Err(ImageError::ResourceLimit(format!(
            "图片像素过大：{} 像素（限制：{} 像素）",
            pixels, config.max_decoded_pixels
        )));
    }

    let estimated = pixels
        .checked_mul(4)
        .ok_or_else(|| ImageError::ResourceLimit("图片解码内存估算溢出".to_string()))?;

    if estimated > config.max_decoded_bytes {
        return Err(ImageError::ResourceLimit(format!(
            "图片解码预计内存过大：{:.2} MB（限制：{:.2} MB）",
            estimated as f64 / 1024.0 / 1024.0,
            config.max_decoded_bytes as f64 / 1024.0 / 1024.0
        )));
    }

    Ok(())
}
