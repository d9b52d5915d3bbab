// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;

/// 默认配置目录名（位于用户主目录下）
pub const DEFAULT_CONFIG_DIR: &str = ".cloudsync";

/// 默认配置文件名
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 云存储配置
    #[serde(default)]
    pub cloud: CloudConfig,
    /// 扫描器配置
    #[serde(default)]
    pub scanner: ScannerConfig,

    /// 配置文件路径（运行时字段，不写入文件）
    #[serde(skip)]
    pub file_path: Option<PathBuf>,
    /// 扫描根目录（来自命令行）
    #[serde(skip)]
    pub root_directory: PathBuf,
    /// 分区 ID 是否在加载时自动生成（关闭时需要回写）
    #[serde(skip)]
    pub partition_generated: bool,
}

/// 云存储配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// 区域
    pub region: String,
    /// 存储桶
    pub bucket: String,
    /// 访问密钥（为空时使用默认凭证链）
    pub access_key: String,
    /// 私有密钥
    pub secret_key: String,
    /// 自定义 S3 兼容端点（如 MinIO），为空表示官方端点
    pub endpoint: String,
    /// LOCAL_FS 驱动的目标目录
    pub local_directory: PathBuf,
}

/// 扫描器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// 逻辑分区 ID，所有上传的 key 都会带上 `<partition_id>/` 前缀
    ///
    /// 多台机器可以借此共用一个存储桶。为空时加载配置会自动生成。
    pub partition_id: String,
    /// 是否读取隐藏文件（以 `.` 开头）
    pub read_hidden: bool,
    /// 是否递归遍历子目录，为 false 时只处理根目录下的文件
    pub deep_traversing: bool,
    /// 忽略列表：精确文件/目录名，或 `*.ext` 形式的扩展名
    pub ignored_keys: Vec<String>,
    /// 是否记录单个文件失败的错误日志
    pub log_errors: bool,
    /// 上传工作池宽度（同时上传的文件数）
    pub max_concurrent_uploads: usize,
    /// 同时进行修改检查（CheckMod）的文件数
    pub max_concurrent_checks: usize,
    /// 上传队列与失败队列的容量
    pub queue_capacity: usize,

    #[serde(skip)]
    pub(crate) ignored: Option<IgnoredKeys>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            partition_id: String::new(),
            read_hidden: false,
            deep_traversing: true,
            ignored_keys: Vec::new(),
            log_errors: false,
            max_concurrent_uploads: 16,
            max_concurrent_checks: 32,
            queue_capacity: 1,
            ignored: None,
        }
    }
}

impl ScannerConfig {
    /// 判断文件或目录名是否在忽略列表中
    ///
    /// - `*.ext` 匹配扩展名等于 `ext` 的名字（扩展名取最后一个 `.` 之后的部分）
    /// - 其他条目按名字精确匹配
    pub fn is_ignored(&self, name: &str) -> bool {
        match &self.ignored {
            Some(ignored) => ignored.matches(name),
            None => IgnoredKeys::new(&self.ignored_keys).matches(name),
        }
    }

    /// 忽略匹配器（已预先构建时直接复用）
    pub fn ignored_matcher(&self) -> IgnoredKeys {
        match &self.ignored {
            Some(ignored) => ignored.clone(),
            None => IgnoredKeys::new(&self.ignored_keys),
        }
    }

    /// 预先构建忽略匹配器，避免每个条目都重新解析忽略列表
    pub fn compile_ignored_keys(&mut self) {
        self.ignored = Some(IgnoredKeys::new(&self.ignored_keys));
    }

    /// 验证并发与队列参数
    pub fn validate(&self) -> Result<(), String> {
        if self.max_concurrent_uploads == 0 {
            return Err("max_concurrent_uploads 必须大于 0".to_string());
        }
        if self.max_concurrent_checks == 0 {
            return Err("max_concurrent_checks 必须大于 0".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("queue_capacity 必须大于 0".to_string());
        }
        Ok(())
    }
}

/// 忽略列表匹配器
#[derive(Debug, Clone, Default)]
pub struct IgnoredKeys {
    names: HashSet<String>,
    extensions: HashSet<String>,
}

impl IgnoredKeys {
    pub fn new(keys: &[String]) -> Self {
        let mut ignored = Self::default();
        for key in keys {
            match key.strip_prefix("*.") {
                Some(ext) if !ext.is_empty() => {
                    ignored.extensions.insert(ext.to_string());
                }
                _ => {
                    ignored.names.insert(key.clone());
                }
            }
        }
        ignored
    }

    pub fn matches(&self, name: &str) -> bool {
        if self.names.contains(name) {
            return true;
        }
        match name.rsplit_once('.') {
            Some((_, ext)) => self.extensions.contains(ext),
            None => false,
        }
    }
}

/// 生成新的分区 ID
pub fn generate_partition_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// 默认配置目录（`~/.cloudsync`），无法获取主目录时返回 None
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(DEFAULT_CONFIG_DIR))
}

impl AppConfig {
    /// 加载配置
    ///
    /// # 参数
    /// * `dir` - 配置目录
    /// * `file` - 配置文件名
    /// * `root_directory` - 扫描根目录
    ///
    /// 分区 ID 为空时会自动生成，并标记 `partition_generated` 以便关闭时回写。
    pub async fn load(dir: &Path, file: &str, root_directory: impl Into<PathBuf>) -> Result<Self> {
        let path = dir.join(file);
        let mut config = Self::load_from_file(&path).await?;

        if config.scanner.partition_id.is_empty() {
            config.scanner.partition_id = generate_partition_id();
            config.partition_generated = true;
        }
        config.scanner.compile_ignored_keys();
        config.root_directory = root_directory.into();
        config.file_path = Some(path);
        Ok(config)
    }

    /// 从文件加载配置
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: AppConfig =
            toml::from_str(&content).context("Failed to parse config file")?;
        config.scanner.compile_ignored_keys();

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create config directory")?;
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        Ok(())
    }

    /// 配置文件不存在时创建默认配置（带新生成的分区 ID）
    ///
    /// 返回配置文件是否可用（已存在或创建成功）。重复调用是幂等的。
    pub async fn save_if_not_exists(dir: &Path, file: &str) -> Result<bool> {
        if dir.as_os_str().is_empty() || file.is_empty() {
            return Ok(false);
        }

        let path = dir.join(file);
        if fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(true);
        }

        let config = AppConfig {
            scanner: ScannerConfig {
                partition_id: generate_partition_id(),
                ..Default::default()
            },
            ..Default::default()
        };
        config.save_to_file(&path).await?;
        tracing::info!("已创建默认配置文件: {}", path.display());
        Ok(true)
    }

    /// 回写配置（关闭时调用，仅在分区 ID 为自动生成时写入）
    ///
    /// 返回是否实际写入了文件。
    pub async fn persist_generated_state(&self) -> Result<bool> {
        if !self.partition_generated {
            return Ok(false);
        }
        let Some(path) = &self.file_path else {
            return Ok(false);
        };
        tracing::debug!("回写配置文件: {}", path.display());
        self.save_to_file(path).await?;
        Ok(true)
    }
}
