//! 确定性生成服务替身
//!
//! 按脚本顺序返回预置结果；脚本耗尽后重复返回默认结果。
//! 记录每次调用的提示词与参考图尺寸，便于断言。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use image::RgbaImage;

use super::{check_reference_count, FrameProvider};
use crate::error::AppError;

/// 一次调用的记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCall {
    pub prompt: String,
    pub reference_sizes: Vec<(u32, u32)>,
}

type ScriptedResult = Result<RgbaImage, String>;

#[derive(Debug)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<ScriptedResult>>,
    fallback: ScriptedResult,
    delay: Duration,
    calls: Mutex<Vec<ProviderCall>>,
}

impl ScriptedProvider {
    /// 每次都返回同一张位图。
    pub fn returning(image: RgbaImage) -> Self {
        Self::with_fallback(Ok(image))
    }

    /// 每次都失败，模拟生成服务没有返回图片。
    pub fn failing(message: &str) -> Self {
        Self::with_fallback(Err(message.to_string()))
    }

    fn with_fallback(fallback: ScriptedResult) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// 每次调用前等待一段时间，用于模拟慢速上游。
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// 追加一个一次性结果，优先于默认结果返回。
    pub fn push(&self, result: Result<RgbaImage, String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(result);
        }
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    fn next_result(&self) -> Result<RgbaImage, AppError> {
        let scripted = self
            .script
            .lock()
            .map_err(|e| AppError::Provider(format!("获取脚本锁失败: {}", e)))?
            .pop_front();

        match scripted.unwrap_or_else(|| self.fallback.clone()) {
            Ok(image) => Ok(image),
            Err(message) => Err(AppError::Provider(message)),
        }
    }
}

impl FrameProvider for ScriptedProvider {
    async fn generate(&self, prompt: &str, references: Vec<RgbaImage>) -> Result<RgbaImage, AppError> {
        check_reference_count(&references)?;

        if let Ok(mut calls) = self.calls.lock() {
            calls.push(ProviderCall {
                prompt: prompt.to_string(),
                reference_sizes: references.iter().map(|r| r.dimensions()).collect(),
            });
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.next_result()
    }
}
