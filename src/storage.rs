//! 对象存储模块
//!
//! # 设计思路
//!
//! 画框与合成图只以 PNG 字节的形式落在对象存储中，记录表里只保存存储键。
//! 存储后端通过 `ObjectStore` trait 注入：进程启动时构造一次，之后以 `Arc`
//! 只读共享给请求侧与所有后台阶段。
//!
//! # 实现思路
//!
//! - 存储键格式固定为 `<owner>/<id>.png`，在任何 I/O 之前用正则校验，
//!   杜绝 `..`、绝对路径等路径穿越。
//! - “不存在”统一映射为 `AppError::NotFound`，其余失败映射为 `AppError::Storage`，
//!   对账器依赖这一区分决定删除还是保留记录。
//! - `FsObjectStore`：本地目录实现，`put` 先写临时文件再 rename，单键原子。
//! - `MemoryObjectStore`：内存实现，支持按键注入故障，供测试使用。

use std::future::Future;

use bytes::Bytes;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::AppError;

mod fs;
mod memory;

pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;

/// 存储键语法：两段 `[A-Za-z0-9_-]+`，以 `.png` 结尾。
static KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]{1,64}/[A-Za-z0-9_-]{1,64}\.png$").unwrap()
});

/// 所有写入对象的内容类型。
pub const PNG_CONTENT_TYPE: &str = crate::imaging::decode::PNG_CONTENT_TYPE;

/// 对象存储后端。
///
/// 实现必须可在多个任务间并发使用；单个键的 `put` 要么完整可见，要么不可见。
pub trait ObjectStore: Send + Sync + 'static {
    /// 写入对象；返回成功即视为已持久化。
    fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> impl Future<Output = Result<(), AppError>> + Send;

    /// 读取对象；不存在时返回 `AppError::NotFound`。
    fn get(&self, key: &str) -> impl Future<Output = Result<Bytes, AppError>> + Send;

    /// 对象是否存在；无法判断时返回 `AppError::Storage`。
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool, AppError>> + Send;

    /// 删除对象；对象本就不存在时视为成功。
    fn delete(&self, key: &str) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// 校验存储键格式。
pub fn validate_key(key: &str) -> Result<(), AppError> {
    if KEY_PATTERN.is_match(key) {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!("存储键格式无效: '{}'", key)))
    }
}

/// 由归属者与对象 ID 构造存储键。
pub fn object_key(owner: &str, id: &str) -> Result<String, AppError> {
    let key = format!("{}/{}.png", owner, id);
    validate_key(&key)?;
    Ok(key)
}

fn validate_content_type(key: &str, content_type: &str) -> Result<(), AppError> {
    if content_type.eq_ignore_ascii_case(PNG_CONTENT_TYPE) {
        Ok(())
    } else {
        Err(AppError::InvalidInput(format!(
            "存储键 '{}' 只接受 {}，收到 {}",
            key, PNG_CONTENT_TYPE, content_type
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_owner_and_uuid_keys() {
        assert!(validate_key("user_42/0f8fad5b-d9cb-469f-a165-70867728950e.png").is_ok());
        assert_eq!(object_key("alice", "frame-1").expect("valid key"), "alice/frame-1.png");
    }

    #[test]
    fn rejects_traversal_and_foreign_extensions() {
        for key in [
            "../etc/passwd.png",
            "/abs/path.png",
            "owner/../x.png",
            "owner/file.jpg",
            "owner/sub/file.png",
            "file.png",
            "",
        ] {
            assert!(
                matches!(validate_key(key), Err(AppError::InvalidInput(_))),
                "key should be rejected: {key}"
            );
        }
    }

    #[test]
    fn object_key_rejects_bad_owner() {
        assert!(object_key("a b", "id").is_err());
        assert!(object_key("", "id").is_err());
    }
}
