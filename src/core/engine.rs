use crate::config::{BackupConfig, SourceConfig};
use crate::core::fingerprint::fingerprint_file;
use crate::core::scanner::{is_source_accessible, remote_key, resolve_root, FileScanner, ScanConfig};
use crate::db::{BackupRecord, Ledger, SourceType};
use crate::error::{FileError, StoreError, SyncError, SyncResult};
use crate::storage::{ObjectAttributes, ObjectStore, UploadReceipt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, error, info, warn, Instrument};

/// 同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    /// 最大并发上传数
    #[serde(default = "default_max_concurrent_uploads")]
    pub max_concurrent_uploads: usize,
    /// 传输失败的最大重试次数
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// 重试基础延迟（毫秒）
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// 跳过已归档文件前确认远端对象仍然存在
    #[serde(default)]
    pub verify_remote: bool,
}

fn default_max_concurrent_uploads() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1000
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_uploads: default_max_concurrent_uploads(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            verify_remote: false,
        }
    }
}

/// 单个源目录的上传统计
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct UploadSummary {
    pub uploaded: u64,
    pub skipped: u64,
    pub errors: u64,
    pub bytes: u64,
}

/// 单个源目录的删除同步统计
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DeletionSummary {
    pub deleted: u64,
    pub errors: u64,
    /// 扫描后、删除前记录已不在台账中
    pub inconsistent: u64,
}

/// 单个源目录的报告；`None` 表示该阶段因源目录不可访问而跳过
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source_type: SourceType,
    pub path: PathBuf,
    pub upload: Option<UploadSummary>,
    pub deletion: Option<DeletionSummary>,
}

/// 一次运行的报告
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub dry_run: bool,
    pub start_time: i64,
    pub end_time: i64,
    pub sources: Vec<SourceReport>,
}

impl RunReport {
    pub fn total_uploaded(&self) -> u64 {
        self.sources.iter().filter_map(|s| s.upload.as_ref()).map(|u| u.uploaded).sum()
    }

    pub fn total_deleted(&self) -> u64 {
        self.sources.iter().filter_map(|s| s.deletion.as_ref()).map(|d| d.deleted).sum()
    }

    pub fn total_errors(&self) -> u64 {
        self.sources
            .iter()
            .map(|s| {
                s.upload.as_ref().map_or(0, |u| u.errors) + s.deletion.as_ref().map_or(0, |d| d.errors)
            })
            .sum()
    }
}

/// 单个候选文件的处理结果
enum FileOutcome {
    Uploaded(u64),
    Skipped,
    Failed,
    Aborted,
}

/// 上传统计
#[derive(Debug, Default)]
struct UploadStats {
    uploaded: AtomicU64,
    skipped: AtomicU64,
    errors: AtomicU64,
    bytes: AtomicU64,
}

impl UploadStats {
    fn record(&self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Uploaded(bytes) => {
                self.uploaded.fetch_add(1, Ordering::Relaxed);
                self.bytes.fetch_add(*bytes, Ordering::Relaxed);
            }
            FileOutcome::Skipped => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
            }
            FileOutcome::Failed => {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
            FileOutcome::Aborted => {}
        }
    }

    fn summary(&self) -> UploadSummary {
        UploadSummary {
            uploaded: self.uploaded.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

/// 上传任务共享的上下文
struct UploadContext {
    ledger: Ledger,
    store: Arc<dyn ObjectStore>,
    source_type: SourceType,
    root: PathBuf,
    dry_run: bool,
    max_retries: u32,
    retry_base_delay_ms: u64,
    verify_remote: bool,
    aborted: Arc<AtomicBool>,
    fatal: Arc<Mutex<Option<StoreError>>>,
}

/// 同步引擎：把本地源目录归档到对象存储，并维护台账
///
/// 同一台账上的多次运行不能重叠，需要调用方用外部锁保证；
/// 单条记录的写入是原子的，但整次运行的统计不跨文件成事务。
pub struct SyncEngine {
    pub(crate) ledger: Ledger,
    pub(crate) store: Arc<dyn ObjectStore>,
    pub(crate) sources: Vec<SourceConfig>,
    scan_config: ScanConfig,
    config: SyncConfig,
    pub(crate) dry_run: bool,
    aborted: Arc<AtomicBool>,
}

impl SyncEngine {
    pub fn new(ledger: Ledger, store: Arc<dyn ObjectStore>, config: &BackupConfig) -> Self {
        Self {
            ledger,
            store,
            sources: config.sources.clone(),
            scan_config: config.scan.clone(),
            config: config.sync.clone(),
            dry_run: false,
            aborted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// 运行一次完整备份：先上传所有源目录，再逐个同步删除
    pub async fn run(&self) -> SyncResult<RunReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("run", run_id = %run_id, dry_run = self.dry_run);

        async move {
            let start_time = chrono::Utc::now().timestamp();
            self.aborted.store(false, Ordering::SeqCst);

            info!("{}", "=".repeat(60));
            if self.dry_run {
                info!("DRY RUN 模式 - 不会上传或删除任何文件");
                info!("{}", "=".repeat(60));
            }
            info!("开始备份: {}", self.store.name());
            info!("{}", "=".repeat(60));

            // dry-run 也校验凭证，提前暴露认证问题
            if let Err(e) = self.store.verify().await {
                error!("对象存储校验失败: {}", e);
                return Err(SyncError::from(e));
            }

            let mut reports: Vec<SourceReport> = self
                .sources
                .iter()
                .map(|s| SourceReport {
                    source_type: s.source_type,
                    path: s.path.clone(),
                    upload: None,
                    deletion: None,
                })
                .collect();

            for (source, report) in self.sources.iter().zip(reports.iter_mut()) {
                report.upload = self.upload_source(source).await?;
            }

            // 删除同步必须在全部上传结束之后
            for (source, report) in self.sources.iter().zip(reports.iter_mut()) {
                report.deletion = self.prune_source(source).await?;
            }

            let report = RunReport {
                run_id: run_id.clone(),
                dry_run: self.dry_run,
                start_time,
                end_time: chrono::Utc::now().timestamp(),
                sources: reports,
            };

            info!("{}", "=".repeat(60));
            if self.dry_run {
                info!(
                    "Dry run 完成 - 将上传 {}, 将删除 {}, 失败 {}",
                    report.total_uploaded(),
                    report.total_deleted(),
                    report.total_errors()
                );
            } else {
                info!(
                    "备份完成 - 上传 {}, 删除 {}, 失败 {}",
                    report.total_uploaded(),
                    report.total_deleted(),
                    report.total_errors()
                );
            }
            info!("{}", "=".repeat(60));

            Ok(report)
        }
        .instrument(span)
        .await
    }

    /// 上传单个源目录中尚未归档的文件
    ///
    /// 源目录不存在（例如未挂载）时返回 `Ok(None)`；只有认证/配置错误会中止运行。
    pub async fn upload_source(&self, source: &SourceConfig) -> SyncResult<Option<UploadSummary>> {
        let source_type = source.source_type;

        if !is_source_accessible(&source.path, source.mount_point.as_deref()) {
            info!("源目录不存在或未挂载（跳过）: {}", source.path.display());
            return Ok(None);
        }
        let Some(root) = resolve_root(&source.path) else {
            info!("源目录无法解析（跳过）: {}", source.path.display());
            return Ok(None);
        };

        info!("扫描 {}: {}", source_type, source.path.display());

        let scanner = FileScanner::new(&self.scan_config);
        let walk_root = root.clone();
        // 使用 spawn_blocking 避免阻塞 async runtime
        let candidates = tokio::task::spawn_blocking(move || scanner.scan(&walk_root).collect::<Vec<_>>())
            .await
            .unwrap_or_else(|e| {
                error!("扫描任务失败: {} - {}", root.display(), e);
                Vec::new()
            });
        debug!("{} 个候选文件", candidates.len());

        let ctx = Arc::new(UploadContext {
            ledger: self.ledger.clone(),
            store: self.store.clone(),
            source_type,
            root,
            dry_run: self.dry_run,
            max_retries: self.config.max_retries,
            retry_base_delay_ms: self.config.retry_base_delay_ms,
            verify_remote: self.config.verify_remote,
            aborted: self.aborted.clone(),
            fatal: Arc::new(Mutex::new(None)),
        });

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_uploads.max(1)));
        let stats = Arc::new(UploadStats::default());
        let mut handles = Vec::new();

        for path in candidates {
            if self.aborted.load(Ordering::SeqCst) {
                break;
            }

            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let ctx = ctx.clone();
            let stats = stats.clone();

            let handle = tokio::spawn(
                async move {
                    let outcome = Self::handle_candidate(&ctx, &path).await;
                    stats.record(&outcome);
                    drop(permit);
                }
                .in_current_span(),
            );
            handles.push(handle);
        }

        // 等待所有任务完成
        for handle in handles {
            if let Err(e) = handle.await {
                error!("上传任务异常退出: {}", e);
                stats.errors.fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Some(e) = ctx.fatal.lock().await.take() {
            error!("{} 上传中止: {}", source_type, e);
            return Err(SyncError::from(e));
        }

        let summary = stats.summary();
        if self.dry_run {
            info!(
                "完成 {}: {} 将上传, {} 跳过, {} 失败",
                source_type, summary.uploaded, summary.skipped, summary.errors
            );
        } else {
            info!(
                "完成 {}: {} 上传, {} 跳过, {} 失败 ({} 字节)",
                source_type, summary.uploaded, summary.skipped, summary.errors, summary.bytes
            );
        }

        Ok(Some(summary))
    }

    /// 处理单个候选文件，把错误归类为单文件失败或致命中止
    async fn handle_candidate(ctx: &UploadContext, path: &Path) -> FileOutcome {
        if ctx.aborted.load(Ordering::SeqCst) {
            return FileOutcome::Aborted;
        }

        match Self::process_candidate(ctx, path).await {
            Ok(outcome) => outcome,
            Err(FileError::Store(e)) if e.is_fatal() => {
                // 凭证失效：中止整次运行，不记录为单文件错误
                error!("对象存储认证失败，中止运行: {} - {}", path.display(), e);
                ctx.aborted.store(true, Ordering::SeqCst);
                let mut fatal = ctx.fatal.lock().await;
                if fatal.is_none() {
                    *fatal = Some(e);
                }
                FileOutcome::Aborted
            }
            Err(e) => {
                error!("处理文件出错: {} - {}", path.display(), e);
                if !ctx.dry_run {
                    // 非 UTF-8 路径只能有损记录；error 记录不参与删除同步
                    let local_path = path.to_string_lossy();
                    let key = remote_key(path, &ctx.root, ctx.source_type);
                    // 标记失败本身出错只记录日志，不影响其它文件
                    if let Err(mark_err) = ctx.ledger.record_failure(&local_path, &key, ctx.source_type).await {
                        error!("记录失败状态出错: {} - {}", local_path, mark_err);
                    }
                }
                FileOutcome::Failed
            }
        }
    }

    async fn process_candidate(ctx: &UploadContext, path: &Path) -> Result<FileOutcome, FileError> {
        // 有损转换后的路径在磁盘上不存在，删除同步会误删归档
        let Some(local_path) = path.to_str().map(str::to_owned) else {
            return Err(FileError::NonUtf8Path(path.to_path_buf()));
        };

        if let Some(record) = ctx.ledger.find(&local_path).await? {
            if record.is_archived() {
                if !ctx.verify_remote {
                    debug!("已归档，跳过: {}", local_path);
                    return Ok(FileOutcome::Skipped);
                }
                if ctx.store.exists(&record.remote_key).await? {
                    debug!("已归档且远端存在，跳过: {}", local_path);
                    return Ok(FileOutcome::Skipped);
                }
                warn!(
                    "台账显示已上传但远端对象缺失，重新上传: {} -> {}",
                    local_path,
                    ctx.store.address(&record.remote_key)
                );
            }
        }

        let key = remote_key(path, &ctx.root, ctx.source_type);
        let size = tokio::fs::metadata(path).await?.len();
        let checksum = fingerprint_file(path).await;

        let attributes = ObjectAttributes {
            source_type: ctx.source_type,
            upload_date: chrono::Utc::now(),
            size,
            original_path: local_path.clone(),
            checksum,
        };

        if ctx.dry_run {
            info!(
                "[DRY RUN] 将上传: {} -> {} (大小: {}, md5: {})",
                local_path,
                ctx.store.address(&key),
                size,
                attributes.checksum.as_deref().unwrap_or("不可用")
            );
            return Ok(FileOutcome::Uploaded(size));
        }

        let receipt = Self::upload_with_retry(ctx, path, &key, &attributes).await?;
        let record = BackupRecord::uploaded(
            local_path.as_str(),
            key.as_str(),
            ctx.source_type,
            receipt.size,
            receipt.checksum,
        );
        ctx.ledger.upsert(&record).await?;

        info!("已上传: {} -> {}", local_path, ctx.store.address(&key));
        Ok(FileOutcome::Uploaded(receipt.size))
    }

    /// 带重试的上传（指数退避）；认证错误和本地读错误不重试
    async fn upload_with_retry(
        ctx: &UploadContext,
        path: &Path,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> Result<UploadReceipt, StoreError> {
        let mut attempt = 0u32;

        loop {
            match ctx.store.upload(path, key, attributes).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) if !e.is_retryable() || attempt >= ctx.max_retries => return Err(e),
                Err(e) => {
                    let delay = ctx.retry_base_delay_ms.saturating_mul(2_u64.saturating_pow(attempt));
                    warn!(
                        "上传失败，{}ms 后重试 ({}/{}): {} - {}",
                        delay,
                        attempt + 1,
                        ctx.max_retries,
                        key,
                        e
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    attempt += 1;
                }
            }
        }
    }
}
