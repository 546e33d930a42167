//! 生成服务模块
//!
//! # 设计思路
//!
//! 生成模型是一个不可靠的外部协作者：构图、尺寸、留白都不受控，调用也可能失败或超时。
//! 这里只约定最小契约 `generate(prompt, references) -> bitmap`，几何上的保证全部交给
//! `imaging::canvas` 去强制。
//!
//! # 实现思路
//!
//! - `FrameProvider` trait 作为注入点；进程启动时构造一次，以 `Arc` 共享。
//! - `HttpFrameProvider`：`reqwest` 调用 `generateContent` 接口，带超时、重试与抖动退避。
//! - `ScriptedProvider`：确定性替身，测试与离线演示使用。
//! - `prompt`：画框提示词模板与主题校验。

use std::future::Future;

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

mod http;
pub mod prompt;
mod scripted;

pub use http::HttpFrameProvider;
pub use scripted::{ProviderCall, ScriptedProvider};

/// 单次生成最多携带的参考图数量。
pub const MAX_REFERENCE_IMAGES: usize = 2;

/// 生成服务契约。
pub trait FrameProvider: Send + Sync + 'static {
    /// 按提示词与 0..=2 张参考图生成一张位图；未返回图片时为 `AppError::Provider`。
    fn generate(
        &self,
        prompt: &str,
        references: Vec<RgbaImage>,
    ) -> impl Future<Output = Result<RgbaImage, AppError>> + Send;
}

/// 生成服务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// 服务根地址
    pub endpoint: String,
    /// 模型名
    pub model: String,
    /// API Key；为空时从环境变量 `TOTEM_PROVIDER_API_KEY` 读取
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
    /// 建连超时（秒）
    pub connect_timeout_secs: u64,
    /// 最大尝试次数（含首次）
    pub retry_attempts: u8,
    /// 退避基准延迟（毫秒），按 2 的幂增长并叠加抖动
    pub retry_base_delay_ms: u64,
    /// 响应体上限（字节）
    pub max_response_bytes: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-2.5-flash-image".to_string(),
            api_key: None,
            request_timeout_secs: 90,
            connect_timeout_secs: 10,
            retry_attempts: 3,
            retry_base_delay_ms: 500,
            max_response_bytes: 64 * 1024 * 1024,
        }
    }
}

impl ProviderConfig {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.retry_attempts == 0 {
            return Err(AppError::Config("provider.retry_attempts 至少为 1".to_string()));
        }
        if self.request_timeout_secs == 0 || self.connect_timeout_secs == 0 {
            return Err(AppError::Config("provider 超时必须大于 0 秒".to_string()));
        }
        if !(self.endpoint.starts_with("https://") || self.endpoint.starts_with("http://")) {
            return Err(AppError::Config(format!("provider.endpoint 无效: {}", self.endpoint)));
        }
        if self.model.trim().is_empty() {
            return Err(AppError::Config("provider.model 不能为空".to_string()));
        }
        Ok(())
    }
}

fn check_reference_count(references: &[RgbaImage]) -> Result<(), AppError> {
    if references.len() > MAX_REFERENCE_IMAGES {
        return Err(AppError::InvalidInput(format!(
            "参考图最多 {} 张，收到 {} 张",
            MAX_REFERENCE_IMAGES,
            references.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_provider_config_is_valid() {
        ProviderConfig::default().validate().expect("defaults should validate");
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let config = ProviderConfig {
            retry_attempts: 0,
            ..ProviderConfig::default()
        };
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn api_key_is_never_serialized() {
        let config = ProviderConfig {
            api_key: Some("secret".to_string()),
            ..ProviderConfig::default()
        };
        let json = serde_json::to_string(&config).expect("serialize");
        assert!(!json.contains("secret"));
    }
}
