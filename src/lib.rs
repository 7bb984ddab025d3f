pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::{BackupConfig, SourceConfig, StoreConfig, StoreType};
pub use self::core::{RunReport, SyncConfig, SyncEngine};
pub use db::{BackupRecord, BackupStatus, DeletionAuditEntry, Ledger, SourceType};
pub use error::{SyncError, SyncResult};

/// 按配置连接台账和对象存储，执行一次备份
///
/// 缺少 bucket、台账连接失败、凭证被拒绝都是致命错误。
pub async fn run_backup(config: &BackupConfig, dry_run: bool) -> SyncResult<RunReport> {
    config.validate()?;

    let ledger = Ledger::connect(&config.ledger.url).await.map_err(|e| {
        tracing::error!("连接台账失败: {}", e);
        SyncError::from(e)
    })?;
    let store = storage::create_store(&config.store)?;

    let engine = SyncEngine::new(ledger.clone(), store, config).with_dry_run(dry_run);
    let result = engine.run().await;

    ledger.close().await;
    result
}

// 配置和数据目录
pub mod dirs {
    use std::path::PathBuf;

    pub fn home_dir() -> Option<PathBuf> {
        if cfg!(target_os = "windows") {
            std::env::var("USERPROFILE").ok().map(PathBuf::from)
        } else {
            std::env::var("HOME").ok().map(PathBuf::from)
        }
    }

    /// 配置目录: ~/.config/coldsync（Windows 为 %APPDATA%\coldsync）
    pub fn config_dir() -> PathBuf {
        let base = if cfg!(target_os = "windows") {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        } else {
            std::env::var("XDG_CONFIG_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| home_dir().map(|h| h.join(".config")))
        };
        base.map(|p| p.join("coldsync"))
            .unwrap_or_else(|| PathBuf::from(".coldsync"))
    }

    /// 数据目录（台账、日志）: ~/.local/share/coldsync
    pub fn data_dir() -> PathBuf {
        let base = if cfg!(target_os = "windows") {
            std::env::var("LOCALAPPDATA").ok().map(PathBuf::from)
        } else {
            std::env::var("XDG_DATA_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| home_dir().map(|h| h.join(".local").join("share")))
        };
        base.map(|p| p.join("coldsync"))
            .unwrap_or_else(|| PathBuf::from(".coldsync"))
    }
}
