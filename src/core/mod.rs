pub mod engine;
pub mod fingerprint;
pub mod prune;
pub mod scanner;

pub use engine::{DeletionSummary, RunReport, SourceReport, SyncConfig, SyncEngine, UploadSummary};
pub use fingerprint::{fingerprint_bytes, fingerprint_file};
pub use scanner::{is_source_accessible, remote_key, resolve_root, FileScanner, ScanConfig};
