pub mod bucket;
pub mod local;
pub mod s3;

use crate::config::{StoreConfig, StoreType};
use crate::db::SourceType;
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub use bucket::BucketStore;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, delete 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）- read, write 等
pub const IO_TIMEOUT_SECS: u64 = 300;
/// 上传时每次读取并写出的块大小
pub const UPLOAD_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// 随对象写入的描述性元数据
#[derive(Debug, Clone)]
pub struct ObjectAttributes {
    pub source_type: SourceType,
    pub upload_date: chrono::DateTime<chrono::Utc>,
    pub size: u64,
    pub original_path: String,
    pub checksum: Option<String>,
}

impl ObjectAttributes {
    /// 转为对象 user metadata（值必须是 ASCII，原始路径做百分号编码）
    pub fn to_metadata(&self) -> HashMap<String, String> {
        let mut meta = HashMap::new();
        meta.insert("source_type".to_string(), self.source_type.to_string());
        meta.insert("upload_date".to_string(), self.upload_date.to_rfc3339());
        meta.insert("file_size".to_string(), self.size.to_string());
        meta.insert(
            "original_path".to_string(),
            urlencoding::encode(&self.original_path).into_owned(),
        );
        if let Some(ref md5) = self.checksum {
            meta.insert("md5".to_string(), md5.clone());
        }
        meta
    }
}

/// 上传结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub size: u64,
    pub checksum: Option<String>,
}

/// 对象存储抽象接口
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 校验凭证和 bucket 可访问；失败对整次运行是致命的
    async fn verify(&self) -> Result<(), StoreError>;

    /// 流式上传本地文件到指定 key，并附带描述性元数据
    async fn upload(
        &self,
        path: &Path,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> Result<UploadReceipt, StoreError>;

    /// 删除对象；对象不存在也视为成功
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// 检查对象是否存在
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// 对象的完整地址（用于日志和审计）
    fn address(&self, key: &str) -> String;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 根据配置创建存储实例
pub fn create_store(config: &StoreConfig) -> Result<Arc<dyn ObjectStore>, StoreError> {
    match config.typ {
        StoreType::S3 => {
            let store = s3::build(config)?;
            tracing::info!("初始化S3存储: {}, region={}", store.name(), config.region);
            Ok(Arc::new(store) as Arc<dyn ObjectStore>)
        }
        StoreType::Local => {
            let path = config
                .path
                .as_ref()
                .ok_or_else(|| StoreError::Config("local store requires path".to_string()))?;
            let store = local::build(path)?;
            tracing::info!("初始化本地存储: {}", store.name());
            Ok(Arc::new(store) as Arc<dyn ObjectStore>)
        }
    }
}
