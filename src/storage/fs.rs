//! 本地目录对象存储
//!
//! 键 `owner/id.png` 对应文件 `<root>/owner/id.png`。写入先落到同目录的
//! `.part` 临时文件，再 rename 覆盖目标，读者不会看到半个文件。
//!
//! 写入与 rename 在同一个阻塞任务里完成：调用方的 future 被超时丢弃时，
//! 阻塞任务仍会走完提交或清理。进程崩溃留下的 `.part` 在 `open` 时按修改时间清扫。

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use bytes::Bytes;

use super::{validate_content_type, validate_key, ObjectStore};
use crate::error::AppError;

/// 超过该时长未修改的 `.part` 文件视为遗留
const STALE_PART_AGE: Duration = Duration::from_secs(60 * 60);

/// 目录实现的对象存储。
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// 打开（必要时创建）存储根目录。
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, AppError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| {
            AppError::Storage(format!("创建存储目录 '{}' 失败: {}", root.display(), e))
        })?;
        log::info!("📦 对象存储目录: {}", root.display());

        let swept = sweep_stale_parts(&root, STALE_PART_AGE);
        if swept > 0 {
            log::info!("🧹 已清理 {} 个遗留的临时文件", swept);
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, AppError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<(), AppError> {
        validate_content_type(key, content_type)?;
        let path = self.path_for(key)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::Storage(format!("创建目录失败 '{}': {}", key, e)))?;
        }

        let part = path.with_extension(format!("{}.part", uuid::Uuid::new_v4().simple()));
        let len = bytes.len();
        let owned_key = key.to_string();
        tokio::task::spawn_blocking(move || commit_part(&owned_key, &part, &path, &bytes))
            .await
            .map_err(|e| AppError::Storage(format!("写入 '{}' 的任务异常终止: {}", key, e)))??;

        log::debug!("💾 已写入对象 {}（{} 字节）", key, len);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, AppError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(AppError::NotFound(key.to_string())),
            Err(e) => Err(AppError::Storage(format!("读取 '{}' 失败: {}", key, e))),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, AppError> {
        let path = self.path_for(key)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AppError::Storage(format!("检查 '{}' 失败: {}", key, e))),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AppError::Storage(format!("删除 '{}' 失败: {}", key, e))),
        }
    }
}

fn commit_part(key: &str, part: &Path, path: &Path, bytes: &[u8]) -> Result<(), AppError> {
    if let Err(e) = std::fs::write(part, bytes) {
        let _ = std::fs::remove_file(part);
        return Err(AppError::Storage(format!("写入 '{}' 失败: {}", key, e)));
    }

    if let Err(e) = std::fs::rename(part, path) {
        let _ = std::fs::remove_file(part);
        return Err(AppError::Storage(format!("提交 '{}' 失败: {}", key, e)));
    }
    Ok(())
}

/// 删除 `<root>/<owner>/` 下早于 `max_age` 的 `.part` 文件，返回删除个数。
///
/// 较新的 `.part` 可能属于其它进程正在进行的写入，保留不动。
fn sweep_stale_parts(root: &Path, max_age: Duration) -> usize {
    let Ok(owners) = std::fs::read_dir(root) else {
        return 0;
    };
    let now = SystemTime::now();
    let mut removed = 0;

    for owner in owners.flatten() {
        let Ok(entries) = std::fs::read_dir(owner.path()) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("part") {
                continue;
            }
            let stale = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .map(|modified| now.duration_since(modified).unwrap_or_default() >= max_age)
                .unwrap_or(false);
            if !stale {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("⚠️ 清理临时文件 '{}' 失败: {}", path.display(), e),
            }
        }
    }
    removed
}
