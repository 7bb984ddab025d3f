use crate::error::LedgerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 源目录的逻辑来源，同时作为远端 key 的命名空间
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Internal,
    External,
    ImmichUpload,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Internal => "internal",
            SourceType::External => "external",
            SourceType::ImmichUpload => "immich_upload",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "internal" => Ok(SourceType::Internal),
            "external" => Ok(SourceType::External),
            "immich_upload" => Ok(SourceType::ImmichUpload),
            other => Err(LedgerError::InvalidSourceType(other.to_string())),
        }
    }
}

/// 台账记录状态，只有 `Uploaded` 视为已归档
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackupStatus {
    Uploaded,
    Error,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Uploaded => "uploaded",
            BackupStatus::Error => "error",
        }
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded" => Ok(BackupStatus::Uploaded),
            "error" => Ok(BackupStatus::Error),
            other => Err(LedgerError::InvalidStatus(other.to_string())),
        }
    }
}

/// 台账记录，`local_path` 唯一
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub local_path: String,
    pub remote_key: String,
    pub source_type: SourceType,
    pub size_bytes: Option<i64>,
    pub checksum: Option<String>,
    pub status: BackupStatus,
    pub uploaded_at: i64,
}

impl BackupRecord {
    pub fn uploaded(
        local_path: impl Into<String>,
        remote_key: impl Into<String>,
        source_type: SourceType,
        size_bytes: u64,
        checksum: Option<String>,
    ) -> Self {
        Self {
            local_path: local_path.into(),
            remote_key: remote_key.into(),
            source_type,
            size_bytes: Some(size_bytes as i64),
            checksum,
            status: BackupStatus::Uploaded,
            uploaded_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn is_archived(&self) -> bool {
        self.status == BackupStatus::Uploaded
    }
}

/// 删除审计条目（只追加）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionAuditEntry {
    pub id: i64,
    pub local_path: String,
    pub remote_key: String,
    pub remote_full_address: String,
    pub source_type: SourceType,
    pub size_bytes: Option<i64>,
    pub checksum: Option<String>,
    pub uploaded_at: i64,
    pub original_status: BackupStatus,
    pub deleted_at: i64,
}

// 数据库表模型
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BackupRecordRow {
    pub local_path: String,
    pub remote_key: String,
    pub source_type: String,
    pub size_bytes: Option<i64>,
    pub checksum: Option<String>,
    pub status: String,
    pub uploaded_at: i64,
}

impl TryFrom<BackupRecordRow> for BackupRecord {
    type Error = LedgerError;

    fn try_from(row: BackupRecordRow) -> Result<Self, Self::Error> {
        Ok(BackupRecord {
            local_path: row.local_path,
            remote_key: row.remote_key,
            source_type: row.source_type.parse()?,
            size_bytes: row.size_bytes,
            checksum: row.checksum,
            status: row.status.parse()?,
            uploaded_at: row.uploaded_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeletionAuditRow {
    pub id: i64,
    pub local_path: String,
    pub remote_key: String,
    pub remote_full_address: String,
    pub source_type: String,
    pub size_bytes: Option<i64>,
    pub checksum: Option<String>,
    pub uploaded_at: i64,
    pub original_status: String,
    pub deleted_at: i64,
}

impl TryFrom<DeletionAuditRow> for DeletionAuditEntry {
    type Error = LedgerError;

    fn try_from(row: DeletionAuditRow) -> Result<Self, Self::Error> {
        Ok(DeletionAuditEntry {
            id: row.id,
            local_path: row.local_path,
            remote_key: row.remote_key,
            remote_full_address: row.remote_full_address,
            source_type: row.source_type.parse()?,
            size_bytes: row.size_bytes,
            checksum: row.checksum,
            uploaded_at: row.uploaded_at,
            original_status: row.original_status.parse()?,
            deleted_at: row.deleted_at,
        })
    }
}
