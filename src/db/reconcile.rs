//! 对账子模块
//!
//! ## 职责
//! - 遍历全部记录，逐个检查其存储键在对象存储中是否存在
//! - 删除对象确定不存在的记录（孤儿记录）
//!
//! ## 语义
//! - 只有“不存在”信号（`exists == false` 或 `AppError::NotFound`）才会删除；
//!   权限、网络等其他错误只记日志，记录保留，且不影响其他记录的检查。
//! - 删除在扫描结束后一次性在单个事务中提交：中途崩溃不会留下部分删除。
//! - 按主键删除，重复运行或并发运行都是安全的，第二次运行删除数为 0。
//! - 创建时间晚于 `now - grace` 的记录跳过不查，避免误删仍在运行的阶段的占位记录。

use std::time::Duration;

use serde::Serialize;

use crate::error::AppError;
use crate::storage::ObjectStore;

use super::{all_record_keys, delete_records, RecordKey, RecordStore};

/// 一次对账的统计结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// 实际检查的记录数
    pub scanned: usize,
    /// 删除的孤儿记录数
    pub deleted: usize,
    /// 检查出错而保留的记录数
    pub kept_on_error: usize,
    /// 因过新而跳过的记录数
    pub skipped_recent: usize,
}

/// 执行一次对账。
///
/// `grace` 之内创建的记录不检查，计入 `skipped_recent`。因此“N 条记录、M 条孤儿，
/// 恰好删除 M 条”只在所有孤儿都早于宽限期时成立；`grace == 0` 时对全部记录成立。
/// 默认配置（`JobsConfig::reconcile_grace_secs`，600 秒）下，刚失败的阶段留下的孤儿
/// 要等下一次宽限期之后的对账才会删除。
pub async fn reconcile<S>(records: &RecordStore, store: &S, grace: Duration) -> Result<ReconcileReport, AppError>
where
    S: ObjectStore,
{
    let started = std::time::Instant::now();
    let keys = records.with_conn(|conn| all_record_keys(conn)).await?;

    let cutoff = chrono::Utc::now().timestamp_millis() - grace.as_millis().min(i64::MAX as u128) as i64;
    let mut report = ReconcileReport::default();
    let mut orphans: Vec<RecordKey> = Vec::new();

    for key in keys {
        if key.created_at > cutoff {
            report.skipped_recent += 1;
            continue;
        }

        report.scanned += 1;
        match store.exists(&key.storage_key).await {
            Ok(true) => {}
            Ok(false) => orphans.push(key),
            Err(err) if err.is_not_found() => orphans.push(key),
            Err(err) => {
                report.kept_on_error += 1;
                log::warn!(
                    "⚠️ 对账检查失败，保留记录 {:?} {} ({}): {}",
                    key.kind,
                    key.id,
                    key.storage_key,
                    err
                );
            }
        }
    }

    if !orphans.is_empty() {
        report.deleted = records
            .with_conn(move |conn| delete_records(conn, &orphans))
            .await?;
    }

    log::info!(
        "🧹 对账完成 - 检查: {} 删除: {} 出错保留: {} 跳过: {} 耗时: {}ms",
        report.scanned,
        report.deleted,
        report.kept_on_error,
        report.skipped_recent,
        started.elapsed().as_millis()
    );

    Ok(report)
}
