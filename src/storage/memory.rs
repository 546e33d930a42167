//! 内存对象存储，带按键故障注入。

use std::collections::HashMap;
use std::sync::Mutex;

use bytes::Bytes;

use super::{validate_content_type, validate_key, ObjectStore};
use crate::error::AppError;

#[derive(Debug, Clone)]
struct StoredObject {
    bytes: Bytes,
    content_type: String,
}

/// `HashMap` 实现的对象存储。
///
/// `inject_failure` 让某个键上的所有操作返回 `AppError::Storage`，
/// 用来模拟权限错误或网络抖动。
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
    failures: Mutex<HashMap<String, String>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inject_failure(&self, key: &str, message: &str) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(key.to_string(), message.to_string());
        }
    }

    pub fn clear_failure(&self, key: &str) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.remove(key);
        }
    }

    /// 当前存储的全部键（已排序）。
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .lock()
            .ok()?
            .get(key)
            .map(|object| object.content_type.clone())
    }

    fn check_failure(&self, key: &str) -> Result<(), AppError> {
        let failures = self
            .failures
            .lock()
            .map_err(|e| AppError::Storage(format!("获取故障表锁失败: {}", e)))?;
        match failures.get(key) {
            Some(message) => Err(AppError::Storage(format!("'{}': {}", key, message))),
            None => Ok(()),
        }
    }

    fn with_objects<T>(
        &self,
        op: impl FnOnce(&mut HashMap<String, StoredObject>) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|e| AppError::Storage(format!("获取存储锁失败: {}", e)))?;
        op(&mut objects)
    }
}

impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: Bytes, content_type: &str) -> Result<(), AppError> {
        validate_key(key)?;
        validate_content_type(key, content_type)?;
        self.check_failure(key)?;
        self.with_objects(|objects| {
            objects.insert(
                key.to_string(),
                StoredObject {
                    bytes,
                    content_type: content_type.to_string(),
                },
            );
            Ok(())
        })
    }

    async fn get(&self, key: &str) -> Result<Bytes, AppError> {
        validate_key(key)?;
        self.check_failure(key)?;
        self.with_objects(|objects| {
            objects
                .get(key)
                .map(|object| object.bytes.clone())
                .ok_or_else(|| AppError::NotFound(key.to_string()))
        })
    }

    async fn exists(&self, key: &str) -> Result<bool, AppError> {
        validate_key(key)?;
        self.check_failure(key)?;
        self.with_objects(|objects| Ok(objects.contains_key(key)))
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        validate_key(key)?;
        self.check_failure(key)?;
        self.with_objects(|objects| {
            objects.remove(key);
            Ok(())
        })
    }
}
