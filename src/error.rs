//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 定义全局统一的 `AppError` 枚举，作为存储、记录、生成服务与后台任务的公共返回类型。
//! 像素级错误由 `imaging::ImageError` 承载，通过 `From` 自动上转。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - `NotFound` 与 `Storage` 分开：对账器只在 `NotFound` 时删除记录。
//! - 实现 `Serialize` 将错误序列化为字符串，便于任务状态与 CLI 输出。

use serde::Serialize;

use crate::imaging::ImageError;

/// 应用级统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 像素处理流水线错误（解码 / 归一化 / 合成）
    #[error("{0}")]
    Image(#[from] ImageError),

    /// 生成模型调用失败或未返回图片
    #[error("生成服务错误: {0}")]
    Provider(String),

    /// 对象存储读写失败（权限、网络抖动等，非“不存在”）
    #[error("对象存储错误: {0}")]
    Storage(String),

    /// 引用的存储键或记录不存在
    #[error("资源不存在: {0}")]
    NotFound(String),

    /// 数据库操作失败
    #[error("数据库错误: {0}")]
    Database(String),

    /// 配置无效
    #[error("配置错误: {0}")]
    Config(String),

    /// 调用方输入不合法（上传类型、主题文本、存储键格式等）
    #[error("输入无效: {0}")]
    InvalidInput(String),

    /// 后台队列不可用（已关闭或已满）
    #[error("任务队列错误: {0}")]
    Queue(String),

    /// 外部调用或阶段执行超时
    #[error("超时: {0}")]
    Timeout(String),

    /// 文件系统 I/O 错误
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// 是否为“键不存在”信号。
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(error: rusqlite::Error) -> Self {
        AppError::Database(error.to_string())
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
