//! HTTP 生成服务
//!
//! ## 实现思路
//!
//! - 请求体：提示词文本 + 最多两张 base64 内联 PNG。
//! - 响应：取第一个候选中第一个内联图片部分；没有图片即 `AppError::Provider`。
//! - 每次尝试受 `request_timeout_secs` 约束；超时、连接错误、HTTP 408/429/5xx 可重试，
//!   最多 `retry_attempts` 次，指数退避叠加抖动，服务端 `Retry-After` 优先。
//! - 参考图编码与响应解码属于像素计算，放到 `spawn_blocking` 中执行。
//! - 返回图片先读 header 尺寸并按 `ImagingConfig` 的像素/内存上限拒绝，再完整解码；
//!   超限报 `ImageError::ResourceLimit`，其余解码失败归为 `AppError::Provider`。

use std::io::Cursor;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use image::{ImageFormat, RgbaImage};
use serde::{Deserialize, Serialize};

use super::{check_reference_count, FrameProvider, ProviderConfig};
use crate::config::API_KEY_ENV;
use crate::error::AppError;
use crate::imaging::decode::decode_bitmap;
use crate::imaging::{ImageError, ImagingConfig};

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<RequestContent>,
}

#[derive(Serialize)]
struct RequestContent {
    parts: Vec<RequestPart>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RequestPart {
    Text { text: String },
    Inline { inline_data: InlineData },
}

#[derive(Serialize, Deserialize)]
struct InlineData {
    #[serde(alias = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(alias = "inlineData")]
    inline_data: Option<InlineData>,
}

/// 基于 `reqwest` 的生成服务客户端。
#[derive(Clone)]
pub struct HttpFrameProvider {
    client: reqwest::Client,
    config: ProviderConfig,
    api_key: String,
    limits: ImagingConfig,
}

impl HttpFrameProvider {
    /// `limits` 约束生成结果的解码尺寸，与上传图片共用同一组上限。
    pub fn new(config: ProviderConfig, limits: ImagingConfig) -> Result<Self, AppError> {
        config.validate()?;

        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty()))
            .ok_or_else(|| AppError::Config(format!("缺少生成服务 API Key（{}）", API_KEY_ENV)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| AppError::Provider(format!("无法创建 HTTP 客户端：{}", e)))?;

        Ok(Self {
            client,
            config,
            api_key,
            limits,
        })
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        )
    }

    async fn send_with_retry(&self, body: Bytes) -> Result<Bytes, AppError> {
        let url = self.generate_url();
        let max_attempts = self.config.retry_attempts;
        let mut attempt: u8 = 1;

        loop {
            let send_result = self
                .client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone())
                .send()
                .await;

            match send_result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return self.read_body(resp).await;
                    }

                    if attempt < max_attempts && is_retryable_http_status(status) {
                        let delay_ms = self.compute_retry_delay_with_jitter(attempt, retry_after_hint_ms(resp.headers()));
                        log::warn!(
                            "⚠️ 生成服务 HTTP {}（第 {}/{} 次，可重试）；{}ms 后重试",
                            status.as_u16(),
                            attempt,
                            max_attempts,
                            delay_ms
                        );
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        attempt = attempt.saturating_add(1);
                        continue;
                    }

                    let detail = resp.text().await.unwrap_or_default();
                    return Err(AppError::Provider(format!(
                        "HTTP {}: {}",
                        status.as_u16(),
                        detail.chars().take(300).collect::<String>()
                    )));
                }
                Err(err) => {
                    if attempt >= max_attempts || !is_retryable_network_error(&err) {
                        return Err(map_reqwest_error(err, attempt));
                    }

                    let delay_ms = self.compute_retry_delay_with_jitter(attempt, None);
                    log::warn!(
                        "⚠️ 生成服务请求失败（第 {}/{} 次，可重试）：{}；{}ms 后重试",
                        attempt,
                        max_attempts,
                        err,
                        delay_ms
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    async fn read_body(&self, resp: reqwest::Response) -> Result<Bytes, AppError> {
        if let Some(len) = resp.content_length() {
            if len > self.config.max_response_bytes {
                return Err(AppError::Provider(format!(
                    "响应过大：{:.2} MB",
                    len as f64 / 1024.0 / 1024.0
                )));
            }
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| map_reqwest_error(e, 1))?;
        if bytes.len() as u64 > self.config.max_response_bytes {
            return Err(AppError::Provider(format!(
                "响应过大：{:.2} MB",
                bytes.len() as f64 / 1024.0 / 1024.0
            )));
        }
        Ok(bytes)
    }

    fn compute_retry_delay_with_jitter(&self, attempt: u8, server_hint_ms: Option<u64>) -> u64 {
        let exp = self
            .config
            .retry_base_delay_ms
            .saturating_mul(1_u64 << (attempt.saturating_sub(1).min(16) as u32));
        let base = server_hint_ms.unwrap_or(exp);
        let jitter_bound = (base / 2).max(1);
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let jitter = seed % (jitter_bound + 1);
        base.saturating_add(jitter)
    }
}

impl FrameProvider for HttpFrameProvider {
    async fn generate(&self, prompt: &str, references: Vec<RgbaImage>) -> Result<RgbaImage, AppError> {
        check_reference_count(&references)?;
        let started = std::time::Instant::now();
        let reference_count = references.len();

        let prompt = prompt.to_string();
        let body = tokio::task::spawn_blocking(move || build_request_body(prompt, &references))
            .await
            .map_err(|e| AppError::Provider(format!("编码参考图任务异常终止: {}", e)))??;

        let response = self.send_with_retry(body).await?;

        let limits = self.limits.clone();
        let image = tokio::task::spawn_blocking(move || extract_first_image(&response, &limits))
            .await
            .map_err(|e| AppError::Provider(format!("解码生成结果任务异常终止: {}", e)))??;

        log::info!(
            "🎨 生成服务返回 {}x{}（参考图 {} 张，耗时 {}ms）",
            image.width(),
            image.height(),
            reference_count,
            started.elapsed().as_millis()
        );

        Ok(image)
    }
}

fn build_request_body(prompt: String, references: &[RgbaImage]) -> Result<Bytes, AppError> {
    let mut parts = vec![RequestPart::Text { text: prompt }];
    for reference in references {
        let mut cursor = Cursor::new(Vec::new());
        reference
            .write_to(&mut cursor, ImageFormat::Png)
            .map_err(|e| AppError::Provider(format!("参考图编码失败：{}", e)))?;
        parts.push(RequestPart::Inline {
            inline_data: InlineData {
                mime_type: "image/png".to_string(),
                data: general_purpose::STANDARD.encode(cursor.into_inner()),
            },
        });
    }

    let request = GenerateRequest {
        contents: vec![RequestContent { parts }],
    };
    serde_json::to_vec(&request)
        .map(Bytes::from)
        .map_err(|e| AppError::Provider(format!("请求体序列化失败：{}", e)))
}

fn extract_first_image(body: &[u8], limits: &ImagingConfig) -> Result<RgbaImage, AppError> {
    let response: GenerateResponse = serde_json::from_slice(body)
        .map_err(|e| AppError::Provider(format!("响应解析失败：{}", e)))?;

    let inline = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|content| content.parts.into_iter().find_map(|p| p.inline_data))
        .ok_or_else(|| AppError::Provider("生成服务未返回图片".to_string()))?;

    let bytes = general_purpose::STANDARD
        .decode(inline.data.trim())
        .map_err(|e| AppError::Provider(format!("图片 base64 解码失败：{}", e)))?;

    decode_bitmap(&bytes, limits).map_err(|e| match e {
        ImageError::ResourceLimit(_) => AppError::Image(e),
        other => AppError::Provider(format!("生成结果不是有效图片（{}）：{}", inline.mime_type, other)),
    })
}

fn retry_after_hint_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?;
    let text = value.to_str().ok()?.trim();
    let secs = text.parse::<u64>().ok()?;
    Some(secs.saturating_mul(1000))
}

fn is_retryable_http_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::REQUEST_TIMEOUT
        || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn is_retryable_network_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

fn map_reqwest_error(err: reqwest::Error, attempts: u8) -> AppError {
    if err.is_timeout() {
        AppError::Timeout(format!("生成服务请求超时（已尝试 {} 次）", attempts))
    } else {
        AppError::Provider(format!("生成服务请求失败（已尝试 {} 次）：{}", attempts, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn png_base64(width: u32, height: u32) -> String {
        let mut cursor = Cursor::new(Vec::new());
        RgbaImage::from_pixel(width, height, Rgba([1, 2, 3, 255]))
            .write_to(&mut cursor, ImageFormat::Png)
            .expect("encode png");
        general_purpose::STANDARD.encode(cursor.into_inner())
    }

    #[test]
    fn request_body_carries_prompt_and_inline_references() {
        let references = vec![RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255]))];
        let body = build_request_body("make a frame".to_string(), &references).expect("build body");
        let json: serde_json::Value = serde_json::from_slice(&body).expect("valid json");

        let parts = &json["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], "make a frame");
        assert_eq!(parts[1]["inline_data"]["mime_type"], "image/png");
        assert!(parts[1]["inline_data"]["data"].as_str().is_some_and(|d| !d.is_empty()));
    }

    #[test]
    fn extracts_first_inline_image_from_camel_case_response() {
        let body = serde_json::json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "here is your frame" },
                        { "inlineData": { "mimeType": "image/png", "data": png_base64(6, 5) } }
                    ]
                }
            }]
        });

        let image = extract_first_image(&serde_json::to_vec(&body).expect("serialize"), &ImagingConfig::default())
            .expect("image part exists");
        assert_eq!(image.dimensions(), (6, 5));
    }

    #[test]
    fn text_only_response_is_provider_error() {
        let body = br#"{"candidates":[{"content":{"parts":[{"text":"sorry"}]}}]}"#;
        let limits = ImagingConfig::default();
        assert!(matches!(extract_first_image(body, &limits), Err(AppError::Provider(_))));

        let empty = br#"{}"#;
        assert!(matches!(extract_first_image(empty, &limits), Err(AppError::Provider(_))));
    }

    #[test]
    fn oversized_generated_image_hits_decode_limits() {
        let body = serde_json::json!({
            "candidates": [{
                "content": {
                    "parts": [{ "inlineData": { "mimeType": "image/png", "data": png_base64(70, 60) } }]
                }
            }]
        });
        let body = serde_json::to_vec(&body).expect("serialize");

        let tight = ImagingConfig {
            max_decoded_pixels: 4_000,
            ..ImagingConfig::default()
        };
        assert!(matches!(
            extract_first_image(&body, &tight),
            Err(AppError::Image(ImageError::ResourceLimit(_)))
        ));

        let byte_capped = ImagingConfig {
            max_decoded_bytes: 70 * 60 * 4 - 1,
            ..ImagingConfig::default()
        };
        assert!(matches!(
            extract_first_image(&body, &byte_capped),
            Err(AppError::Image(ImageError::ResourceLimit(_)))
        ));

        assert_eq!(
            extract_first_image(&body, &ImagingConfig::default()).expect("within limits").dimensions(),
            (70, 60)
        );
    }

    #[test]
    fn garbage_inline_data_is_provider_error() {
        let body = serde_json::json!({
            "candidates": [{
                "content": {
                    "parts": [{ "inlineData": { "mimeType": "image/png", "data": general_purpose::STANDARD.encode(b"not an image") } }]
                }
            }]
        });

        let result = extract_first_image(&serde_json::to_vec(&body).expect("serialize"), &ImagingConfig::default());
        assert!(matches!(result, Err(AppError::Provider(_))));
    }

    #[test]
    fn retry_policy_matches_status_classes() {
        assert!(is_retryable_http_status(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_http_status(reqwest::StatusCode::BAD_GATEWAY));
        assert!(!is_retryable_http_status(reqwest::StatusCode::BAD_REQUEST));
        assert!(!is_retryable_http_status(reqwest::StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn retry_delay_grows_and_honors_server_hint() {
        let provider = HttpFrameProvider::new(ProviderConfig {
            api_key: Some("test-key".to_string()),
            retry_base_delay_ms: 100,
            ..ProviderConfig::default()
        }, ImagingConfig::default())
        .expect("build provider");

        let first = provider.compute_retry_delay_with_jitter(1, None);
        let third = provider.compute_retry_delay_with_jitter(3, None);
        assert!((100..=150).contains(&first));
        assert!((400..=600).contains(&third));
        assert!((2000..=3000).contains(&provider.compute_retry_delay_with_jitter(1, Some(2000))));
    }
}
