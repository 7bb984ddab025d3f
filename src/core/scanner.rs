//! 路径分类：筛选可备份的文件，并从本地路径推导远端 key

use crate::db::SourceType;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// 需要备份的图片扩展名（比较时忽略大小写）
pub const IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "raw", "cr2", "nef", "arw", "dng", "tif", "tiff", "png", "raf",
];

fn default_extensions() -> Vec<String> {
    IMAGE_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

/// 上传扫描排除的生成内容目录（`upload` 不排除，UI 上传的文件就在其中）
fn default_exclude_dirs() -> Vec<String> {
    ["thumbs", "encoded-video", "profiles", "backups"]
        .iter()
        .map(|d| d.to_string())
        .collect()
}

/// 文件扫描器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanConfig {
    /// 允许的扩展名（不带点）
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// 排除的目录名（精确匹配任一路径组件）
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            exclude_dirs: default_exclude_dirs(),
        }
    }
}

/// 文件扫描器
#[derive(Debug, Clone)]
pub struct FileScanner {
    extensions: Vec<String>,
    exclude_dirs: Vec<String>,
}

impl FileScanner {
    pub fn new(config: &ScanConfig) -> Self {
        Self {
            extensions: config
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_dirs: config.exclude_dirs.clone(),
        }
    }

    /// 扩展名是否在允许列表中
    pub fn has_allowed_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .map_or(false, |ext| self.extensions.iter().any(|allowed| *allowed == ext))
    }

    /// 相对根目录的任一组件命中排除列表
    pub fn is_excluded(&self, path: &Path, root: &Path) -> bool {
        let relative = path.strip_prefix(root).unwrap_or(path);
        relative.components().any(|c| match c {
            Component::Normal(name) => name
                .to_str()
                .map_or(false, |n| self.exclude_dirs.iter().any(|d| d == n)),
            _ => false,
        })
    }

    /// 惰性遍历 root 下的候选文件；每次调用都从头遍历
    pub fn scan<'a>(&'a self, root: &'a Path) -> impl Iterator<Item = PathBuf> + 'a {
        WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(move |entry| entry.depth() == 0 || !self.is_excluded(entry.path(), root))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("遍历目录出错（跳过）: {}", e);
                    None
                }
            })
            // 指向文件的符号链接按其目标判断；不进入指向目录的链接
            .filter(|entry| entry.path().is_file())
            .filter(move |entry| {
                let keep = self.has_allowed_extension(entry.path());
                if !keep {
                    debug!("跳过非图片文件: {}", entry.path().display());
                }
                keep
            })
            .map(|entry| entry.into_path())
    }
}

/// 解析源目录为绝对、无符号链接的路径；不存在时返回 None
pub fn resolve_root(root: &Path) -> Option<PathBuf> {
    std::fs::canonicalize(root).ok()
}

/// 推导远端 key：`{source_type}/{相对源目录的路径}`
///
/// 文件不在源目录内、无法求相对路径或相对路径越出源目录时，退回只用文件名。
/// 这种退回会丢失目录信息，不同子目录下的同名文件会得到相同的 key。
pub fn remote_key(path: &Path, source_root: &Path, source_type: SourceType) -> String {
    let resolved_root = resolve_root(source_root).unwrap_or_else(|| source_root.to_path_buf());
    let resolved_path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

    let relative = resolved_path
        .strip_prefix(&resolved_root)
        .ok()
        .filter(|rel| {
            !rel.as_os_str().is_empty()
                && !matches!(rel.components().next(), Some(Component::ParentDir))
        })
        .map(normalize_separators)
        .unwrap_or_else(|| base_name(path));

    format!("{}/{}", source_type, relative)
}

/// 用 `/` 连接路径组件
fn normalize_separators(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn base_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().replace('\\', "/"))
}

/// 源目录当前是否可访问
///
/// 配置了挂载点时，挂载点必须真正挂载（设备号与父目录不同），
/// 否则空的挂载目录会被误认为“文件全部被删除”。
pub fn is_source_accessible(root: &Path, mount_point: Option<&Path>) -> bool {
    if let Some(mount) = mount_point {
        if !is_mount_point(mount) {
            return false;
        }
    }
    root.is_dir()
}

#[cfg(unix)]
fn is_mount_point(path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    let Some(parent) = path.parent() else {
        // 文件系统根
        return true;
    };
    match std::fs::metadata(parent) {
        Ok(parent_meta) => parent_meta.dev() != meta.dev() || parent_meta.ino() == meta.ino(),
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_mount_point(path: &Path) -> bool {
    path.is_dir()
}
