// Cloud Sync Rust Library
// 本地目录到对象存储的一次性同步核心库

// 配置管理模块
pub mod config;

// 运行错误
pub mod error;

// 运行统计
pub mod stats;

// 存储驱动模块
pub mod storage;

// 扫描与上传模块
pub mod uploader;

// 导出常用类型
pub use config::{AppConfig, CloudConfig, ScannerConfig};
pub use error::SyncError;
pub use stats::{Stats, StatsSnapshot};
pub use storage::{new_blob_storage, BlobStorage, BlobStoreType, StorageError};
pub use uploader::{RunSummary, Scanner, ShutdownOutcome, UploadFailure, UploadTask};
