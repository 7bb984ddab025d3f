//! Common test utilities and fixtures.

#![allow(dead_code)]

use async_trait::async_trait;
use coldsync::config::{BackupConfig, SourceConfig, StoreConfig, StoreType};
use coldsync::core::SyncConfig;
use coldsync::error::StoreError;
use coldsync::storage::{self, ObjectAttributes, ObjectStore, UploadReceipt};
use coldsync::{Ledger, SourceType, SyncEngine};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// 一个临时源目录 + 本地目录对象存储 + 内存台账
pub struct TestEnv {
    pub dir: TempDir,
    pub source_root: PathBuf,
    pub store_root: PathBuf,
    pub ledger: Ledger,
    pub store: Arc<FlakyStore>,
}

impl TestEnv {
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let source_root = dir.path().join("images");
        let store_root = dir.path().join("bucket");
        std::fs::create_dir_all(&source_root).unwrap();

        let inner = storage::local::build(&store_root).unwrap();
        let store = Arc::new(FlakyStore::new(Arc::new(inner)));
        let ledger = Ledger::in_memory().await.unwrap();

        Self {
            dir,
            source_root,
            store_root,
            ledger,
            store,
        }
    }

    /// 源目录的规范化路径（台账中保存的是规范化后的路径）
    pub fn canonical_root(&self) -> PathBuf {
        std::fs::canonicalize(&self.source_root).unwrap()
    }

    pub fn local_path(&self, rel: &str) -> String {
        self.canonical_root().join(rel).to_string_lossy().into_owned()
    }

    pub fn write_image(&self, rel: &str, data: &[u8]) -> PathBuf {
        write_file(&self.source_root, rel, data)
    }

    pub fn remove_image(&self, rel: &str) {
        std::fs::remove_file(self.source_root.join(rel)).unwrap();
    }

    pub fn remote_exists(&self, key: &str) -> bool {
        self.store_root.join(key).exists()
    }

    pub fn config(&self) -> BackupConfig {
        test_config(vec![SourceConfig {
            source_type: SourceType::Internal,
            path: self.source_root.clone(),
            mount_point: None,
        }])
    }

    pub fn engine(&self, config: &BackupConfig) -> SyncEngine {
        let store: Arc<dyn ObjectStore> = self.store.clone();
        SyncEngine::new(self.ledger.clone(), store, config)
    }
}

pub fn write_file(root: &Path, rel: &str, data: &[u8]) -> PathBuf {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, data).unwrap();
    path
}

/// 快速失败、不重试的测试配置
pub fn test_config(sources: Vec<SourceConfig>) -> BackupConfig {
    BackupConfig {
        store: StoreConfig {
            typ: StoreType::Local,
            path: Some(PathBuf::from("/unused")),
            ..StoreConfig::default()
        },
        sources,
        sync: SyncConfig {
            max_concurrent_uploads: 4,
            max_retries: 0,
            retry_base_delay_ms: 1,
            verify_remote: false,
        },
        ..BackupConfig::default()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Fault {
    Transfer,
    Auth,
}

impl Fault {
    fn error(&self, what: &str) -> StoreError {
        match self {
            Fault::Transfer => StoreError::Transfer(format!("injected failure: {}", what)),
            Fault::Auth => StoreError::Auth(format!("injected auth failure: {}", what)),
        }
    }
}

type AddressHook = Box<dyn FnOnce(&str) + Send>;

/// 可注入故障并统计调用次数的存储包装
pub struct FlakyStore {
    inner: Arc<dyn ObjectStore>,
    address_hook: Mutex<Option<AddressHook>>,
    upload_faults: Mutex<HashMap<String, (Fault, u32)>>,
    delete_fault: Mutex<Option<Fault>>,
    verify_fault: Mutex<Option<Fault>>,
    pub uploads: AtomicU32,
    pub upload_attempts: AtomicU32,
    pub deletes: AtomicU32,
    pub verifies: AtomicU32,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Self {
        Self {
            inner,
            address_hook: Mutex::new(None),
            upload_faults: Mutex::new(HashMap::new()),
            delete_fault: Mutex::new(None),
            verify_fault: Mutex::new(None),
            uploads: AtomicU32::new(0),
            upload_attempts: AtomicU32::new(0),
            deletes: AtomicU32::new(0),
            verifies: AtomicU32::new(0),
        }
    }

    /// 对指定文件名的上传注入 `times` 次故障
    pub fn fail_upload(&self, file_name: &str, fault: Fault, times: u32) {
        self.upload_faults
            .lock()
            .unwrap()
            .insert(file_name.to_string(), (fault, times));
    }

    pub fn fail_deletes(&self, fault: Option<Fault>) {
        *self.delete_fault.lock().unwrap() = fault;
    }

    pub fn fail_verify(&self, fault: Option<Fault>) {
        *self.verify_fault.lock().unwrap() = fault;
    }

    /// 下一次 `address` 调用时执行一次 hook（删除同步在开启删除事务前调用 `address`）
    pub fn on_next_address(&self, hook: impl FnOnce(&str) + Send + 'static) {
        *self.address_hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn uploads(&self) -> u32 {
        self.uploads.load(Ordering::SeqCst)
    }

    fn take_upload_fault(&self, path: &Path) -> Option<Fault> {
        let name = path.file_name()?.to_str()?;
        let mut faults = self.upload_faults.lock().unwrap();
        let (fault, remaining) = faults.get_mut(name)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(*fault)
    }
}

#[async_trait]
impl ObjectStore for FlakyStore {
    async fn verify(&self) -> Result<(), StoreError> {
        self.verifies.fetch_add(1, Ordering::SeqCst);
        let fault = *self.verify_fault.lock().unwrap();
        match fault {
            Some(f) => Err(f.error("verify")),
            None => self.inner.verify().await,
        }
    }

    async fn upload(
        &self,
        path: &Path,
        key: &str,
        attributes: &ObjectAttributes,
    ) -> Result<UploadReceipt, StoreError> {
        self.upload_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(fault) = self.take_upload_fault(path) {
            return Err(fault.error(key));
        }
        let receipt = self.inner.upload(path, key, attributes).await?;
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(receipt)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let fault = *self.delete_fault.lock().unwrap();
        if let Some(f) = fault {
            return Err(f.error(key));
        }
        self.inner.delete(key).await?;
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.inner.exists(key).await
    }

    fn address(&self, key: &str) -> String {
        let hook = self.address_hook.lock().unwrap().take();
        if let Some(hook) = hook {
            hook(key);
        }
        self.inner.address(key)
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}
