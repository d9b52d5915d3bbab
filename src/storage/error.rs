//! 存储错误

use thiserror::Error;

/// 存储驱动返回的错误
#[derive(Debug, Error)]
pub enum StorageError {
    /// 远程存储在本次运行中不可用，不可恢复
    #[error("存储不可用: {0}")]
    Fatal(String),

    /// 本地 I/O 错误
    #[error("I/O 错误: {0}")]
    Io(#[from] std::io::Error),

    /// 后端返回的其他错误（单个文件级别，可忽略）
    #[error("存储后端错误: {0}")]
    Backend(String),
}

impl StorageError {
    /// 是否为致命错误
    pub fn is_fatal(&self) -> bool {
        matches!(self, StorageError::Fatal(_))
    }
}
