//! 记录存储模块
//!
//! # 设计思路
//!
//! 画框与合成图各有一张表，记录只保存“身份 + 存储键 + 归属 + 可见性”，
//! 像素数据只存在于对象存储。记录在后台阶段运行之前就写入（占位），
//! 阶段失败时记录会指向一个不存在的对象，由对账器事后清理。
//!
//! # 实现思路
//!
//! - `RecordStore` 只持有数据库路径，不持有连接：请求侧与每个后台阶段
//!   各自通过 `connect()` 打开独立连接，阶段的生命周期可以长于请求。
//! - 所有 SQL 都是 `&Connection` 上的自由函数（见 `records`），便于用内存库单测。
//! - 异步调用方通过 `with_conn` 在 `spawn_blocking` 中执行数据库操作。

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::imaging::ApertureStrategy;

pub mod reconcile;
mod records;
mod schema;

pub use reconcile::{reconcile, ReconcileReport};
pub use records::*;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// 数据模型
// ============================================================================

/// 画框记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub id: String,
    pub owner_id: String,
    pub storage_key: String,
    pub is_public: bool,
    /// 画框生成时使用的开口策略，整合阶段据此选择开口来源。
    pub aperture: ApertureStrategy,
    /// 创建时间（UTC 毫秒）
    pub created_at: i64,
}

/// 合成图记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeRecord {
    pub id: String,
    pub owner_id: String,
    pub storage_key: String,
    /// 来源画框；画框记录被对账删除后置空。
    pub frame_id: Option<String>,
    pub created_at: i64,
}

/// 记录种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Frame,
    Composite,
}

/// 对账用的最小记录视图
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RecordKey {
    pub kind: RecordKind,
    pub id: String,
    pub storage_key: String,
    pub created_at: i64,
}

// ============================================================================
// 连接管理
// ============================================================================

/// 记录存储句柄，可廉价克隆并跨任务共享。
#[derive(Debug, Clone)]
pub struct RecordStore {
    path: PathBuf,
}

impl RecordStore {
    /// 打开数据库文件，创建目录并执行 Schema 初始化/迁移。
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    AppError::Database(format!("创建数据库目录失败: {}", e))
                })?;
            }
        }
        log::info!("数据库路径: {}", path.display());

        let store = Self { path };
        let conn = store.connect()?;
        schema::initialize_schema(&conn)?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 打开一条新的独立连接。
    pub fn connect(&self) -> Result<Connection, AppError> {
        let conn = Connection::open(&self.path).map_err(|e| {
            AppError::Database(format!("打开数据库失败: {}", e))
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| AppError::Database(format!("设置 busy_timeout 失败: {}", e)))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| AppError::Database(format!("启用外键失败: {}", e)))?;
        Ok(conn)
    }

    /// 在阻塞线程池中用一条新连接执行数据库操作。
    pub async fn with_conn<T, F>(&self, op: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, AppError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = store.connect()?;
            op(&mut conn)
        })
        .await
        .map_err(|e| AppError::Database(format!("数据库任务异常终止: {}", e)))?
    }
}
