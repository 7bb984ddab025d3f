//! 归档台账：`backup_records` 记录已归档文件，`backup_deletions` 为只追加的删除审计

pub mod models;
pub use models::*;

use crate::error::LedgerError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

type LedgerResult<T> = std::result::Result<T, LedgerError>;

const RECORD_COLUMNS: &str =
    "local_path, remote_key, source_type, size_bytes, checksum, status, uploaded_at";

/// 台账存储
///
/// 每条记录的写入各自原子；整次运行不是一个事务，避免多个进程同时运行是调用方的责任。
#[derive(Clone)]
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    /// 连接数据库并运行迁移
    pub async fn connect(url: &str) -> LedgerResult<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(LedgerError::Connect)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    tracing::error!("创建台账目录失败: {} - {}", parent.display(), e);
                    LedgerError::Connect(sqlx::Error::Io(e))
                })?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(LedgerError::Connect)?;

        Self::from_pool(pool).await
    }

    /// 内存数据库（单连接，连接关闭即丢失）
    pub async fn in_memory() -> LedgerResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(LedgerError::Connect)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(LedgerError::Connect)?;

        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> LedgerResult<Self> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// 按本地路径查找记录
    pub async fn find(&self, local_path: &str) -> LedgerResult<Option<BackupRecord>> {
        let row = sqlx::query_as::<_, BackupRecordRow>(&format!(
            "SELECT {} FROM backup_records WHERE local_path = ?",
            RECORD_COLUMNS
        ))
        .bind(local_path)
        .fetch_optional(&self.pool)
        .await?;

        row.map(BackupRecord::try_from).transpose()
    }

    /// 按 local_path 插入或覆盖；source_type 一经写入不再改变
    pub async fn upsert(&self, record: &BackupRecord) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO backup_records (local_path, remote_key, source_type, size_bytes, checksum, status, uploaded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(local_path) DO UPDATE SET
                remote_key = excluded.remote_key,
                size_bytes = excluded.size_bytes,
                checksum = excluded.checksum,
                status = excluded.status,
                uploaded_at = excluded.uploaded_at
            "#,
        )
        .bind(&record.local_path)
        .bind(&record.remote_key)
        .bind(record.source_type.as_str())
        .bind(record.size_bytes)
        .bind(&record.checksum)
        .bind(record.status.as_str())
        .bind(record.uploaded_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 记录上传失败：新建 error 记录，或只把已有记录的状态改为 error
    pub async fn record_failure(
        &self,
        local_path: &str,
        remote_key: &str,
        source_type: SourceType,
    ) -> LedgerResult<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO backup_records (local_path, remote_key, source_type, status, uploaded_at)
            VALUES (?, ?, ?, 'error', ?)
            ON CONFLICT(local_path) DO UPDATE SET
                status = 'error',
                uploaded_at = excluded.uploaded_at
            "#,
        )
        .bind(local_path)
        .bind(remote_key)
        .bind(source_type.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// 列出某个源目录下指定状态的记录
    pub async fn list_under(
        &self,
        source_type: SourceType,
        root: &Path,
        status: BackupStatus,
    ) -> LedgerResult<Vec<BackupRecord>> {
        // 以分隔符结尾，避免 /images 匹配到 /images2
        let mut prefix = root.to_string_lossy().into_owned();
        if !prefix.ends_with(std::path::MAIN_SEPARATOR) {
            prefix.push(std::path::MAIN_SEPARATOR);
        }

        let rows = sqlx::query_as::<_, BackupRecordRow>(&format!(
            "SELECT {} FROM backup_records
             WHERE source_type = ? AND status = ? AND substr(local_path, 1, length(?)) = ?
             ORDER BY local_path",
            RECORD_COLUMNS
        ))
        .bind(source_type.as_str())
        .bind(status.as_str())
        .bind(&prefix)
        .bind(&prefix)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(BackupRecord::try_from).collect()
    }

    /// 开启删除事务并读取记录；记录不存在时返回 None
    ///
    /// 远端删除应在 [`PendingRemoval::commit`] 之前执行；在此期间出错直接丢弃即回滚。
    pub async fn begin_removal(&self, local_path: &str) -> LedgerResult<Option<PendingRemoval>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, BackupRecordRow>(&format!(
            "SELECT {} FROM backup_records WHERE local_path = ?",
            RECORD_COLUMNS
        ))
        .bind(local_path)
        .fetch_optional(&mut *tx)
        .await?;

        match row {
            Some(row) => Ok(Some(PendingRemoval {
                tx,
                record: row.try_into()?,
            })),
            None => {
                tx.rollback().await?;
                Ok(None)
            }
        }
    }

    /// 在同一事务内写入审计并删除记录
    pub async fn delete_and_audit(
        &self,
        local_path: &str,
        remote_full_address: &str,
    ) -> LedgerResult<Option<DeletionAuditEntry>> {
        match self.begin_removal(local_path).await? {
            Some(pending) => Ok(Some(pending.commit(remote_full_address).await?)),
            None => Ok(None),
        }
    }

    /// 按本地路径查询删除审计
    pub async fn list_audit(&self, local_path: &str) -> LedgerResult<Vec<DeletionAuditEntry>> {
        let rows = sqlx::query_as::<_, DeletionAuditRow>(
            "SELECT * FROM backup_deletions WHERE local_path = ? ORDER BY id",
        )
        .bind(local_path)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DeletionAuditEntry::try_from).collect()
    }

    pub async fn count_records(&self, status: BackupStatus) -> LedgerResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM backup_records WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn count_audit(&self) -> LedgerResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM backup_deletions")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// 进行中的删除：持有事务和删除前的记录快照
pub struct PendingRemoval {
    tx: Transaction<'static, Sqlite>,
    record: BackupRecord,
}

impl PendingRemoval {
    pub fn record(&self) -> &BackupRecord {
        &self.record
    }

    /// 写入审计条目、删除记录并提交
    pub async fn commit(mut self, remote_full_address: &str) -> LedgerResult<DeletionAuditEntry> {
        let deleted_at = chrono::Utc::now().timestamp();
        let record = &self.record;

        let id = sqlx::query(
            r#"
            INSERT INTO backup_deletions
                (local_path, remote_key, remote_full_address, source_type, size_bytes, checksum, uploaded_at, original_status, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.local_path)
        .bind(&record.remote_key)
        .bind(remote_full_address)
        .bind(record.source_type.as_str())
        .bind(record.size_bytes)
        .bind(&record.checksum)
        .bind(record.uploaded_at)
        .bind(record.status.as_str())
        .bind(deleted_at)
        .execute(&mut *self.tx)
        .await?
        .last_insert_rowid();

        sqlx::query("DELETE FROM backup_records WHERE local_path = ?")
            .bind(&record.local_path)
            .execute(&mut *self.tx)
            .await?;

        self.tx.commit().await?;

        let record = self.record;
        Ok(DeletionAuditEntry {
            id,
            local_path: record.local_path,
            remote_key: record.remote_key,
            remote_full_address: remote_full_address.to_string(),
            source_type: record.source_type,
            size_bytes: record.size_bytes,
            checksum: record.checksum,
            uploaded_at: record.uploaded_at,
            original_status: record.status,
            deleted_at,
        })
    }

    pub async fn rollback(self) -> LedgerResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
