//! 文件内容校验和（MD5，仅用于完整性校验，不作安全用途）

use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::warn;

/// 读取文件的块大小
pub const FINGERPRINT_CHUNK_SIZE: usize = 64 * 1024;

/// 分块读取文件并计算 MD5（小写十六进制）
///
/// 文件无法读取时返回 None 表示“不可用”，不让调用方失败。
pub async fn fingerprint_file(path: &Path) -> Option<String> {
    match digest_file(path).await {
        Ok(hex) => Some(hex),
        Err(e) => {
            warn!("计算校验和失败: {} - {}", path.display(), e);
            None
        }
    }
}

async fn digest_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut ctx = md5::Context::new();
    let mut buf = vec![0u8; FINGERPRINT_CHUNK_SIZE];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        ctx.consume(&buf[..n]);
    }

    Ok(format!("{:x}", ctx.compute()))
}

/// 计算内存数据的 MD5
pub fn fingerprint_bytes(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}
