use super::{BucketStore, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::error::StoreError;
use opendal::{layers::TimeoutLayer, services::Fs, Operator};
use std::path::Path;
use std::time::Duration;

/// 构建本地目录存储（对象以 key 为相对路径保存；不支持 user metadata）
pub fn build(root: &Path) -> Result<BucketStore, StoreError> {
    if !root.exists() {
        std::fs::create_dir_all(root)?;
    }

    let root_str = root
        .to_str()
        .ok_or_else(|| StoreError::Config(format!("invalid store path: {}", root.display())))?;

    let builder = Fs::default().root(root_str);

    let operator = Operator::new(builder)?
        .layer(
            TimeoutLayer::default()
                .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
        )
        .finish();

    let name = format!("file://{}", root_str.replace('\\', "/"));
    Ok(BucketStore::new(operator, name))
}
