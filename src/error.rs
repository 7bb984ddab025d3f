//! 错误分类：致命错误中止整次运行，单文件错误只影响该文件

use thiserror::Error;

/// 对象存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("transfer failed: {0}")]
    Transfer(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// 凭证或配置错误对整次运行是致命的，不重试
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Auth(_) | StoreError::Config(_))
    }

    /// 网络传输类错误可以重试；本地读文件失败重试无意义
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Timeout(_) | StoreError::Transfer(_))
    }
}

impl From<opendal::Error> for StoreError {
    fn from(e: opendal::Error) -> Self {
        use opendal::ErrorKind;

        match e.kind() {
            ErrorKind::PermissionDenied => StoreError::Auth(e.to_string()),
            ErrorKind::ConfigInvalid => StoreError::Config(e.to_string()),
            // TimeoutLayer 以 Unexpected 报告超时，并标记为临时错误
            _ if e.is_temporary() => StoreError::Timeout(e.to_string()),
            _ => StoreError::Transfer(e.to_string()),
        }
    }
}

/// 台账错误
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("failed to connect to ledger: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("ledger migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid record status: {0}")]
    InvalidStatus(String),

    #[error("invalid source type: {0}")]
    InvalidSourceType(String),
}

/// 单个文件处理失败（记录后继续下一个文件）
#[derive(Debug, Error)]
pub enum FileError {
    #[error("read failed: {0}")]
    Read(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// 台账以 UTF-8 文本保存路径，无法无损表示的文件名不归档
    #[error("file name is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(std::path::PathBuf),
}

/// 致命错误：中止整次运行，进程以非零码退出
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("S3 bucket is not configured")]
    MissingBucket,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("object store credentials rejected: {0}")]
    Auth(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("object store unavailable: {0}")]
    Store(String),
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Auth(msg) => SyncError::Auth(msg),
            StoreError::Config(msg) => SyncError::Config(msg),
            other => SyncError::Store(other.to_string()),
        }
    }
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
