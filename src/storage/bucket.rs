use super::{ObjectAttributes, ObjectStore, UploadReceipt, UPLOAD_CHUNK_SIZE};
use crate::error::StoreError;
use async_trait::async_trait;
use opendal::Operator;
use std::path::Path;
use tokio::io::AsyncReadExt;

/// 基于 OpenDAL Operator 的对象存储
pub struct BucketStore {
    operator: Operator,
    name: String,
}

impl BucketStore {
    pub fn new(operator: Operator, name: String) -> Self {
        Self { operator, name }
    }

    fn supports_user_metadata(&self) -> bool {
        self.operator
            .info()
            .full_capability()
            .write_with_user_metadata
    }

    async fn stream_file(
        &self,
        writer: &mut opendal::Writer,
        file: &mut tokio::fs::File,
    ) -> Result<u64, StoreError> {
        let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
        let mut total = 0u64;

        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            writer.write(buf[..n].to_vec()).await?;
            total += n as u64;
        }

        Ok(total)
    }
}

#[async_trait]
impl ObjectStore for BucketStore {
    async fn verify(&self) -> Result<(), StoreError> {
        self.operator.check().await?;
        Ok(())
    }

    async fn upload(
        &self,
        path: &Path,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> Result<UploadReceipt, StoreError> {
        let mut file = tokio::fs::File::open(path).await?;

        let mut writer = if self.supports_user_metadata() {
            self.operator
                .writer_with(key)
                .chunk(UPLOAD_CHUNK_SIZE)
                .user_metadata(attributes.to_metadata())
                .await?
        } else {
            self.operator.writer_with(key).chunk(UPLOAD_CHUNK_SIZE).await?
        };

        match self.stream_file(&mut writer, &mut file).await {
            Ok(size) => {
                writer.close().await?;
                Ok(UploadReceipt {
                    size,
                    checksum: attributes.checksum.clone(),
                })
            }
            Err(e) => {
                // 放弃未完成的分块上传
                if let Err(abort_err) = writer.abort().await {
                    tracing::debug!("中止上传失败: {} - {}", key, abort_err);
                }
                Err(e)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        // S3 删除不存在的对象不会报错
        match self.operator.delete(key).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        match self.operator.stat(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn address(&self, key: &str) -> String {
        format!("{}/{}", self.name.trim_end_matches('/'), key)
    }

    fn name(&self) -> &str {
        &self.name
    }
}
