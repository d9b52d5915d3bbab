//! 对象存储模块
//!
//! 调度核心只依赖 [`BlobStorage`] 能力，具体驱动在配置阶段选定：
//! - `s3`: Amazon S3（及兼容端点）
//! - `localfs`: 本地目录镜像
//! - `factory`: 根据驱动名创建具体实现

pub mod error;
pub mod factory;
pub mod localfs;
pub mod s3;

pub use error::StorageError;
pub use factory::{new_blob_storage, BlobStoreType};
pub use localfs::LocalFsStorage;
pub use s3::AmazonS3;

use crate::uploader::UploadTask;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// 二进制大对象（BLOB）持久化存储
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// 将任务数据写入远程存储的 `task.key`
    ///
    /// 调用方保留任务所有权，并在返回后负责清理。
    async fn upload(&self, task: &mut UploadTask) -> Result<(), StorageError>;

    /// 检查本地文件相对远程对象是否有变化
    ///
    /// 远程对象不存在、大小不同或比本地旧时返回 `true`。
    /// 远程存储不可用（权限不足、存储桶不存在）时返回 [`StorageError::Fatal`]。
    async fn check_mod(
        &self,
        key: &str,
        mod_time: DateTime<Utc>,
        size: u64,
    ) -> Result<bool, StorageError>;
}
