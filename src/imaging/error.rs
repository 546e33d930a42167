//! # 错误模型模块
//!
//! ## 设计思路
//!
//! 使用单一错误枚举承载像素链路中的所有错误来源，避免字符串拼接式错误处理。
//! 通过 `thiserror` 保持人类可读错误，同时让调用侧可按分支匹配。
//! `DegenerateFrame` / `NoApertureFound` 必须可区分：前者是画框本身无可用内容，
//! 后者是按遮罩检测开口时一个透明像素都没有。

/// 像素处理统一错误类型。
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("解码错误：{0}")]
    Decode(String),

    #[error("格式错误：{0}")]
    InvalidFormat(String),

    #[error("资源限制：{0}")]
    ResourceLimit(String),

    #[error("几何参数无效：{0}")]
    InvalidGeometry(String),

    #[error("画框无可用内容：{0}")]
    DegenerateFrame(String),

    #[error("未检测到透明开口：{0}")]
    NoApertureFound(String),
}

impl ImageError {
    /// 稳定错误码，用于日志检索与任务状态。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Decode(_) => "E_DECODE",
            Self::InvalidFormat(_) => "E_FORMAT",
            Self::ResourceLimit(_) => "E_LIMIT",
            Self::InvalidGeometry(_) => "E_GEOMETRY",
            Self::DegenerateFrame(_) => "E_DEGENERATE_FRAME",
            Self::NoApertureFound(_) => "E_NO_APERTURE",
        }
    }

    /// 出错所在阶段。
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Decode(_) | Self::InvalidFormat(_) | Self::ResourceLimit(_) => "decode",
            Self::InvalidGeometry(_) | Self::DegenerateFrame(_) => "normalize",
            Self::NoApertureFound(_) => "composite",
        }
    }
}

impl From<image::ImageError> for ImageError {
    fn from(error: image::ImageError) -> Self {
        match error {
            image::ImageError::Unsupported(e) => ImageError::InvalidFormat(e.to_string()),
            image::ImageError::Limits(e) => ImageError::ResourceLimit(e.to_string()),
            other => ImageError::Decode(other.to_string()),
        }
    }
}
