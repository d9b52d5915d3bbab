//! 文件夹遍历模块
//!
//! 负责:
//! - 按遍历策略决定每个条目是进入、剪枝、跳过还是调度上传
//! - 以先序方式异步遍历目录树（逐个返回条目，调用方可在条目之间检查取消）
//! - 计算带分区前缀、`/` 分隔的对象 key

use crate::config::{IgnoredKeys, ScannerConfig};
use crate::error::SyncError;
use chrono::{DateTime, Utc};
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs::{self, DirEntry, ReadDir};
use tracing::{debug, info};

/// 条目处理决定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryDecision {
    /// 进入目录继续遍历
    Descend,
    /// 整个子树不再访问
    Prune,
    /// 跳过该文件
    Skip,
    /// 调度上传检查
    Schedule,
}

/// 是否为隐藏条目（以 `.` 开头，`.` 本身除外）
pub fn is_hidden(name: &str) -> bool {
    name != "." && name.starts_with('.')
}

/// 遍历策略
#[derive(Debug, Clone)]
pub struct TraversalPolicy {
    read_hidden: bool,
    deep_traversing: bool,
    ignored: IgnoredKeys,
}

impl TraversalPolicy {
    pub fn from_config(config: &ScannerConfig) -> Self {
        Self {
            read_hidden: config.read_hidden,
            deep_traversing: config.deep_traversing,
            ignored: config.ignored_matcher(),
        }
    }

    /// 根目录以下的子目录如何处理
    pub fn decide_dir(&self, name: &str) -> EntryDecision {
        if is_hidden(name) || self.ignored.matches(name) {
            return EntryDecision::Prune;
        }
        if !self.deep_traversing {
            return EntryDecision::Prune;
        }
        EntryDecision::Descend
    }

    /// 文件如何处理
    pub fn decide_file(&self, name: &str) -> EntryDecision {
        if is_hidden(name) && !self.read_hidden {
            return EntryDecision::Skip;
        }
        if self.ignored.matches(name) {
            return EntryDecision::Skip;
        }
        EntryDecision::Schedule
    }
}

/// 计算对象 key
///
/// 相对根目录的路径，分隔符统一为 `/`，配置了分区 ID 时加上 `<partition_id>/` 前缀。
pub fn object_key(root: &Path, path: &Path, partition_id: &str) -> io::Result<String> {
    let relative = path.strip_prefix(root).map_err(|e| {
        io::Error::other(format!(
            "计算相对路径失败: {} (root: {}): {}",
            path.display(),
            root.display(),
            e
        ))
    })?;

    let mut segments: Vec<String> = Vec::new();
    if !partition_id.is_empty() {
        segments.push(partition_id.to_string());
    }
    for component in relative.components() {
        if let Component::Normal(part) = component {
            segments.push(part.to_string_lossy().into_owned());
        }
    }
    Ok(segments.join("/").replace('\\', "/"))
}

/// 遍历到的待检查文件
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// 本地文件路径
    pub path: PathBuf,
    /// 对象 key
    pub key: String,
    /// 文件大小（字节）
    pub size: u64,
    /// 修改时间
    pub modified: DateTime<Utc>,
}

/// 遍历事件
#[derive(Debug)]
pub enum WalkEvent {
    /// 需要调度的文件
    File(DiscoveredFile),
    /// 遍历 I/O 错误，对应子树被跳过
    Error { path: PathBuf, error: io::Error },
}

/// 异步目录遍历器
///
/// 使用目录栈实现先序深度优先遍历，每次 [`FolderWalker::next_event`] 返回一个事件。
#[derive(Debug)]
pub struct FolderWalker {
    root: PathBuf,
    policy: TraversalPolicy,
    partition_id: String,
    /// 正在读取的目录栈
    pending_dirs: Vec<(PathBuf, ReadDir)>,
    /// 已返回的文件数
    total_discovered: u64,
}

impl FolderWalker {
    /// 打开根目录
    ///
    /// 根目录本身不受隐藏/忽略规则影响。
    pub async fn open<P: AsRef<Path>>(root: P, config: &ScannerConfig) -> Result<Self, SyncError> {
        let root = root.as_ref().to_path_buf();
        let invalid = |reason: String| SyncError::InvalidRoot {
            path: root.clone(),
            reason,
        };

        let metadata = fs::metadata(&root)
            .await
            .map_err(|e| invalid(format!("扫描路径不存在或无法访问: {}", e)))?;
        if !metadata.is_dir() {
            return Err(invalid("扫描路径不是文件夹".to_string()));
        }
        let read_dir = fs::read_dir(&root)
            .await
            .map_err(|e| invalid(format!("读取目录失败: {}", e)))?;

        info!("开始遍历文件夹: {}", root.display());

        Ok(Self {
            pending_dirs: vec![(root.clone(), read_dir)],
            root,
            policy: TraversalPolicy::from_config(config),
            partition_id: config.partition_id.clone(),
            total_discovered: 0,
        })
    }

    /// 获取下一个事件，返回 None 表示遍历完成
    pub async fn next_event(&mut self) -> Option<WalkEvent> {
        loop {
            let (_, read_dir) = self.pending_dirs.last_mut()?;
            let next = read_dir.next_entry().await;

            match next {
                Ok(Some(entry)) => {
                    if let Some(event) = self.visit(entry).await {
                        return Some(event);
                    }
                }
                Ok(None) => {
                    self.pending_dirs.pop();
                }
                Err(error) => {
                    // 目录读取中途失败，放弃该目录剩余条目
                    if let Some((path, _)) = self.pending_dirs.pop() {
                        return Some(WalkEvent::Error { path, error });
                    }
                }
            }
        }
    }

    /// 已返回的文件数
    pub fn total_discovered(&self) -> u64 {
        self.total_discovered
    }

    async fn visit(&mut self, entry: DirEntry) -> Option<WalkEvent> {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();

        let file_type = match entry.file_type().await {
            Ok(t) => t,
            Err(error) => return Some(WalkEvent::Error { path, error }),
        };

        if file_type.is_dir() {
            match self.policy.decide_dir(&name) {
                EntryDecision::Descend => match fs::read_dir(&path).await {
                    Ok(read_dir) => self.pending_dirs.push((path, read_dir)),
                    Err(error) => return Some(WalkEvent::Error { path, error }),
                },
                _ => debug!("跳过目录: {}", path.display()),
            }
            return None;
        }

        if !file_type.is_file() {
            debug!("跳过非常规文件: {}", path.display());
            return None;
        }

        if self.policy.decide_file(&name) != EntryDecision::Schedule {
            debug!("跳过文件: {}", path.display());
            return None;
        }

        let metadata = match entry.metadata().await {
            Ok(m) => m,
            Err(error) => return Some(WalkEvent::Error { path, error }),
        };
        let modified = match metadata.modified() {
            Ok(t) => DateTime::<Utc>::from(t),
            Err(error) => return Some(WalkEvent::Error { path, error }),
        };
        let key = match object_key(&self.root, &path, &self.partition_id) {
            Ok(k) => k,
            Err(error) => return Some(WalkEvent::Error { path, error }),
        };

        debug!("扫描到文件: {} ({})", key, format_bytes(metadata.len()));
        self.total_discovered += 1;

        Some(WalkEvent::File(DiscoveredFile {
            path,
            key,
            size: metadata.len(),
            modified,
        }))
    }
}

/// 辅助函数：格式化字节大小
pub(crate) fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
