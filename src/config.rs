//! 应用配置模块
//!
//! 配置在启动时一次性解析为 [`BackupConfig`]，之后作为值传给各组件，
//! 组件本身不读取环境变量。

use crate::core::{ScanConfig, SyncConfig};
use crate::db::SourceType;
use crate::error::SyncError;
use crate::logging::LogConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 对象存储类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    S3,
    Local,
}

/// 对象存储配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    #[serde(rename = "type", default = "default_store_type")]
    pub typ: StoreType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// 为空时使用 AWS 默认凭证链（环境变量、~/.aws/credentials）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(default = "default_storage_class")]
    pub storage_class: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// 本地目录存储的根路径
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

fn default_store_type() -> StoreType {
    StoreType::S3
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_storage_class() -> String {
    "DEEP_ARCHIVE".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            typ: default_store_type(),
            bucket: None,
            region: default_region(),
            endpoint: None,
            access_key: None,
            secret_key: None,
            storage_class: default_storage_class(),
            prefix: None,
            path: None,
        }
    }
}

/// 台账数据库配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_url")]
    pub url: String,
}

fn default_ledger_url() -> String {
    let path = crate::dirs::data_dir().join("ledger.db");
    format!("sqlite:{}", path.to_string_lossy().replace('\\', "/"))
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            url: default_ledger_url(),
        }
    }
}

/// 一个本地源目录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    pub source_type: SourceType,
    pub path: PathBuf,
    /// 可移动/网络存储的挂载点；设置后只有真正挂载时才处理该源
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<PathBuf>,
}

fn default_sources() -> Vec<SourceConfig> {
    vec![
        SourceConfig {
            source_type: SourceType::Internal,
            path: PathBuf::from("~/images"),
            mount_point: None,
        },
        SourceConfig {
            source_type: SourceType::External,
            path: PathBuf::from("/mnt/external-storage/images"),
            mount_point: Some(PathBuf::from("/mnt/external-storage")),
        },
        SourceConfig {
            source_type: SourceType::ImmichUpload,
            path: PathBuf::from("~/immich-library/upload"),
            mount_point: None,
        },
    ]
}

/// 完整的备份配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default = "default_sources")]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            ledger: LedgerConfig::default(),
            sources: default_sources(),
            scan: ScanConfig::default(),
            sync: SyncConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl BackupConfig {
    /// 默认配置文件路径
    pub fn default_path() -> PathBuf {
        crate::dirs::config_dir().join("config.json")
    }

    /// 从配置文件加载；文件不存在时使用默认配置
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("读取配置文件失败: {}", path.display()))?;
            Self::from_json(&content)
                .with_context(|| format!("解析配置文件失败: {}", path.display()))?
        } else {
            tracing::debug!("配置文件不存在，使用默认配置: {}", path.display());
            Self::default()
        };
        config.expand_paths();
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// 展开路径中的 `~`
    pub fn expand_paths(&mut self) {
        for source in &mut self.sources {
            source.path = expand_tilde(&source.path);
            source.mount_point = source.mount_point.as_deref().map(expand_tilde);
        }
        self.store.path = self.store.path.as_deref().map(expand_tilde);
        self.log.dir = self.log.dir.as_deref().map(expand_tilde);
    }

    /// 校验运行所需的配置项，缺失时为致命错误
    pub fn validate(&self) -> Result<(), SyncError> {
        match self.store.typ {
            StoreType::S3 => {
                if self.store.bucket.as_deref().map_or(true, |b| b.trim().is_empty()) {
                    return Err(SyncError::MissingBucket);
                }
            }
            StoreType::Local => {
                if self.store.path.is_none() {
                    return Err(SyncError::Config("local store requires path".to_string()));
                }
            }
        }
        if self.sync.max_concurrent_uploads == 0 {
            return Err(SyncError::Config(
                "maxConcurrentUploads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// 将开头的 `~` 替换为用户主目录
pub fn expand_tilde(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => match crate::dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}
