//! 运行级错误

use crate::storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

/// 同步运行错误
#[derive(Debug, Error)]
pub enum SyncError {
    /// 扫描根目录不存在或不是文件夹
    #[error("扫描路径无效: {path}: {reason}")]
    InvalidRoot { path: PathBuf, reason: String },

    /// 远程存储不可用（权限不足、存储桶不存在等），本次运行中止
    #[error("存储不可用，运行中止: {0}")]
    FatalStorage(#[source] StorageError),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 存储驱动初始化失败
    #[error("存储驱动初始化失败: {0}")]
    Storage(String),

    /// 无法识别的存储驱动
    #[error("无效的存储驱动: {0}")]
    InvalidDriver(String),

    /// 已识别但尚未实现的存储驱动
    #[error("暂不支持的存储驱动: {0}")]
    UnsupportedDriver(String),

    /// 同一个扫描器上一次运行尚未结束
    #[error("扫描已在运行")]
    AlreadyRunning,
}

impl SyncError {
    pub fn is_fatal_storage(&self) -> bool {
        matches!(self, SyncError::FatalStorage(_))
    }
}
