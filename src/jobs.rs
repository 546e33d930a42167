//! 后台任务模块
//!
//! # 设计思路
//!
//! 每个逻辑请求拆成两个互相独立的阶段：
//!
//! ```text
//! 生成阶段：参考图/主题 → 生成服务 → 归一化 + 开口 → PNG → 存储（预分配键）
//! 整合阶段：画框键 + 人像字节 → 下载画框 → 方向校正/裁切 → 合成 → PNG → 存储（预分配键）
//! ```
//!
//! 阶段在请求/响应路径之外执行，请求侧只负责校验、分配键、写占位记录、入队。
//! 每个阶段要么完整成功，要么整体失败；失败时不做阶段内重试，占位记录成为孤儿，
//! 由对账器清理。
//!
//! # 实现思路
//!
//! - `queue`：有界 `mpsc` 队列 + N 个 worker，任务状态通过 `watch` 通道可观测。
//! - `phases`：阶段执行器；像素计算整体放入 `spawn_blocking`，缓冲区不跨挂起点。

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::imaging::{ApertureStrategy, ScaleMode};

mod phases;
mod queue;

pub use phases::PhaseRunner;
pub use queue::{JobQueue, JobTicket};

/// 任务标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

/// 任务状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed(String),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }
}

/// 画框来源
#[derive(Debug, Clone)]
pub enum FrameSource {
    /// 参考图原始字节（已通过类型嗅探）
    Reference(Bytes),
    /// 文字主题（已规整）
    Theme(String),
}

/// 生成阶段输入
#[derive(Debug, Clone)]
pub struct FrameJob {
    pub frame_id: String,
    pub storage_key: String,
    pub source: FrameSource,
    pub strategy: ApertureStrategy,
}

/// 整合阶段输入
#[derive(Debug, Clone)]
pub struct IntegrationJob {
    pub composite_id: String,
    pub frame_key: String,
    /// 画框生成时采用的开口策略
    pub frame_strategy: ApertureStrategy,
    pub photo: Bytes,
    pub output_key: String,
    /// 覆盖配置中按开口策略选定的缩放语义
    pub scale_override: Option<ScaleMode>,
}

/// 入队的任务
#[derive(Debug, Clone)]
pub enum JobSpec {
    Frame(FrameJob),
    Integration(IntegrationJob),
}

impl JobSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Frame(_) => "frame",
            Self::Integration(_) => "integration",
        }
    }

    /// 任务成功后对象所在的存储键
    pub fn output_key(&self) -> &str {
        match self {
            Self::Frame(job) => &job.storage_key,
            Self::Integration(job) => &job.output_key,
        }
    }
}

/// 后台任务配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// worker 数量
    pub workers: usize,
    /// 队列容量，满时拒绝入队
    pub queue_capacity: usize,
    /// 整合阶段缓存的已解码画框数量
    pub frame_cache_entries: usize,
    /// 单个阶段的总时限（秒）
    pub phase_timeout_secs: u64,
    /// 对账时跳过创建不足该时长的记录（秒）
    pub reconcile_grace_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 64,
            frame_cache_entries: 16,
            phase_timeout_secs: 180,
            reconcile_grace_secs: 600,
        }
    }
}

impl JobsConfig {
    pub fn validate(&self) -> Result<(), crate::error::AppError> {
        if self.workers == 0 || self.queue_capacity == 0 {
            return Err(crate::error::AppError::Config(
                "jobs.workers 与 jobs.queue_capacity 必须大于 0".to_string(),
            ));
        }
        if self.phase_timeout_secs == 0 {
            return Err(crate::error::AppError::Config(
                "jobs.phase_timeout_secs 必须大于 0".to_string(),
            ));
        }
        Ok(())
    }
}
