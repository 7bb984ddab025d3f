use super::{BucketStore, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::config::StoreConfig;
use crate::error::StoreError;
use opendal::{layers::TimeoutLayer, services::S3, Operator};
use std::time::Duration;

/// 构建 S3 存储；未配置 accessKey/secretKey 时由 OpenDAL 读取默认 AWS 凭证
pub fn build(config: &StoreConfig) -> Result<BucketStore, StoreError> {
    let bucket = config
        .bucket
        .as_deref()
        .filter(|b| !b.trim().is_empty())
        .ok_or_else(|| StoreError::Config("S3 storage requires bucket".to_string()))?;

    let mut builder = S3::default()
        .bucket(bucket)
        .region(&config.region)
        .default_storage_class(&config.storage_class);

    if let (Some(ak), Some(sk)) = (config.access_key.as_deref(), config.secret_key.as_deref()) {
        builder = builder.access_key_id(ak).secret_access_key(sk);
    }

    if let Some(ep) = config.endpoint.as_deref().filter(|e| !e.is_empty()) {
        builder = builder.endpoint(ep);
    }

    if let Some(ref p) = config.prefix {
        builder = builder.root(p);
    }

    // 添加超时层
    let operator = Operator::new(builder)?
        .layer(
            TimeoutLayer::default()
                .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
        )
        .finish();

    let name = format!(
        "s3://{}{}",
        bucket,
        config
            .prefix
            .as_deref()
            .map(|p| format!("/{}", p.trim_matches('/')))
            .unwrap_or_default()
    );

    Ok(BucketStore::new(operator, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ObjectStore;

    #[test]
    fn test_missing_bucket_is_config_error() {
        let config = StoreConfig::default();
        assert!(matches!(build(&config), Err(StoreError::Config(_))));
    }

    #[test]
    fn test_address_includes_bucket_and_prefix() {
        let config = StoreConfig {
            bucket: Some("photo-archive".to_string()),
            prefix: Some("/library/".to_string()),
            ..StoreConfig::default()
        };
        let store = build(&config).unwrap();
        assert_eq!(store.name(), "s3://photo-archive/library");
        assert_eq!(
            store.address("internal/2024/a.jpg"),
            "s3://photo-archive/library/internal/2024/a.jpg"
        );
    }
}
