//! 删除同步：本地已删除的文件从对象存储和台账中移除，并写入审计

use crate::config::SourceConfig;
use crate::core::engine::{DeletionSummary, SyncEngine};
use crate::core::scanner::{is_source_accessible, resolve_root};
use crate::db::{BackupStatus, DeletionAuditEntry};
use crate::error::{FileError, SyncError, SyncResult};
use std::path::Path;
use tracing::{error, info, warn};

impl SyncEngine {
    /// 同步单个源目录的删除
    ///
    /// 只处理当前可访问（已挂载）的源目录，避免把“未挂载”误判为“已删除”。
    pub async fn prune_source(&self, source: &SourceConfig) -> SyncResult<Option<DeletionSummary>> {
        let source_type = source.source_type;

        if !is_source_accessible(&source.path, source.mount_point.as_deref()) {
            info!("源目录不可访问（跳过删除同步）: {}", source.path.display());
            return Ok(None);
        }
        let Some(root) = resolve_root(&source.path) else {
            info!("源目录无法解析（跳过删除同步）: {}", source.path.display());
            return Ok(None);
        };

        info!("同步删除 {}: {}", source_type, source.path.display());

        // 台账查询失败视为台账不可用，中止运行
        let records = self
            .ledger
            .list_under(source_type, &root, BackupStatus::Uploaded)
            .await?;

        let mut summary = DeletionSummary::default();

        for record in records {
            match tokio::fs::try_exists(Path::new(&record.local_path)).await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    warn!("无法确认本地文件是否存在（跳过）: {} - {}", record.local_path, e);
                    continue;
                }
            }

            let address = self.store.address(&record.remote_key);

            if self.dry_run {
                info!(
                    "[DRY RUN] 将从远端删除（本地文件已移除）: {} -> {}",
                    record.local_path, address
                );
                summary.deleted += 1;
                continue;
            }

            match self.remove_record(&record.local_path).await {
                Ok(Some(entry)) => {
                    info!(
                        "已删除（本地文件已移除）: {} -> {}",
                        entry.local_path, entry.remote_full_address
                    );
                    summary.deleted += 1;
                }
                Ok(None) => {
                    // 扫描和删除之间台账已被修改
                    warn!("台账中未找到记录: {}", record.local_path);
                    summary.inconsistent += 1;
                }
                Err(FileError::Store(e)) if e.is_fatal() => {
                    error!("对象存储认证失败，中止运行: {} - {}", address, e);
                    return Err(SyncError::from(e));
                }
                Err(e) => {
                    error!("删除失败: {} - {}", address, e);
                    summary.errors += 1;
                }
            }
        }

        info!(
            "删除同步完成 {}: {} 删除, {} 失败",
            source_type, summary.deleted, summary.errors
        );

        Ok(Some(summary))
    }

    /// 在一个台账事务内：读取记录、删除远端对象、写审计、删除记录
    ///
    /// 任一步失败都回滚，记录保持原状，下次运行会重试。
    async fn remove_record(&self, local_path: &str) -> Result<Option<DeletionAuditEntry>, FileError> {
        let Some(pending) = self.ledger.begin_removal(local_path).await? else {
            return Ok(None);
        };

        let key = pending.record().remote_key.clone();
        if let Err(e) = self.store.delete(&key).await {
            if let Err(rollback_err) = pending.rollback().await {
                warn!("回滚失败: {} - {}", local_path, rollback_err);
            }
            return Err(e.into());
        }

        let entry = pending.commit(&self.store.address(&key)).await?;
        Ok(Some(entry))
    }
}
