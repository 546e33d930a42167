//! 应用配置模块
//!
//! # 设计思路
//!
//! 所有可调参数集中在一个 JSON 文件里，每个字段都有默认值。配置文件缺失或解析失败时
//! 回退到默认配置并打印警告，不阻止启动；语义上无效的配置（例如开口放不下）才报错。
//!
//! # 实现思路
//!
//! - `AppConfig` 按关注点分节：`storage` / `database` / `provider` / `imaging` / `jobs`。
//! - API Key 只从配置文件或环境变量 `TOTEM_PROVIDER_API_KEY` 读取，序列化时跳过。

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::imaging::ImagingConfig;
use crate::jobs::JobsConfig;
use crate::provider::ProviderConfig;

/// CLI 读取配置路径的环境变量。
pub const CONFIG_PATH_ENV: &str = "TOTEM_CONFIG";
/// 生成服务 API Key 的环境变量。
pub const API_KEY_ENV: &str = "TOTEM_PROVIDER_API_KEY";

const DEFAULT_CONFIG_FILE: &str = "totem.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 文件系统对象存储的根目录
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/objects"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite 数据库文件路径
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/totem.db"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub imaging: ImagingConfig,
    pub jobs: JobsConfig,
}

impl AppConfig {
    /// 默认配置文件路径：`TOTEM_CONFIG`，否则当前目录下的 `totem.json`。
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
    }

    /// 读取配置；文件缺失或格式错误时回退默认值。随后应用环境变量覆盖。
    pub fn load_from_path(path: &Path) -> Self {
        let mut config = match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<AppConfig>(&content) {
                Ok(config) => {
                    log::info!("⚙️ 已加载配置: {}", path.display());
                    config
                }
                Err(e) => {
                    log::warn!("⚠️ 解析配置文件失败，使用默认配置: {} ({})", path.display(), e);
                    AppConfig::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("⚙️ 未找到配置文件 {}，使用默认配置", path.display());
                AppConfig::default()
            }
            Err(e) => {
                log::warn!("⚠️ 读取配置文件失败，使用默认配置: {} ({})", path.display(), e);
                AppConfig::default()
            }
        };

        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.provider.api_key = Some(key);
            }
        }
    }

    /// 把当前配置写成格式化 JSON（不包含 API Key）。
    pub fn save_to_path(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Config(format!("序列化配置失败: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AppError> {
        self.imaging.validate()?;
        self.provider.validate()?;
        self.jobs.validate()?;
        Ok(())
    }
}
