//! 存储驱动工厂

use crate::config::AppConfig;
use crate::error::SyncError;
use crate::storage::{AmazonS3, BlobStorage, LocalFsStorage};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

pub const AMAZON_S3_STR: &str = "AMAZON_S3";
pub const LOCAL_FS_STR: &str = "LOCAL_FS";
pub const GOOGLE_DRIVE_STR: &str = "GOOGLE_DRIVE";
pub const GOOGLE_CLOUD_STR: &str = "GCP_STORAGE";
pub const AZURE_BLOB_STR: &str = "MS_AZURE_BLOB";

/// 存储驱动类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobStoreType {
    /// Amazon Simple Storage Service (S3)
    AmazonS3,
    /// 本地目录
    LocalFs,
    /// Google Drive（未实现）
    GoogleDrive,
    /// Google Cloud Storage（未实现）
    GoogleCloud,
    /// Microsoft Azure Blob Storage（未实现）
    AzureBlob,
}

impl BlobStoreType {
    /// 所有驱动名（用于命令行帮助）
    pub const ALL: [&'static str; 5] = [
        AMAZON_S3_STR,
        LOCAL_FS_STR,
        GOOGLE_DRIVE_STR,
        GOOGLE_CLOUD_STR,
        AZURE_BLOB_STR,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BlobStoreType::AmazonS3 => AMAZON_S3_STR,
            BlobStoreType::LocalFs => LOCAL_FS_STR,
            BlobStoreType::GoogleDrive => GOOGLE_DRIVE_STR,
            BlobStoreType::GoogleCloud => GOOGLE_CLOUD_STR,
            BlobStoreType::AzureBlob => AZURE_BLOB_STR,
        }
    }
}

impl fmt::Display for BlobStoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlobStoreType {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            AMAZON_S3_STR => Ok(BlobStoreType::AmazonS3),
            LOCAL_FS_STR => Ok(BlobStoreType::LocalFs),
            GOOGLE_DRIVE_STR => Ok(BlobStoreType::GoogleDrive),
            GOOGLE_CLOUD_STR => Ok(BlobStoreType::GoogleCloud),
            AZURE_BLOB_STR => Ok(BlobStoreType::AzureBlob),
            other => Err(SyncError::InvalidDriver(other.to_string())),
        }
    }
}

/// 根据驱动类型创建存储实现
pub async fn new_blob_storage(
    config: &AppConfig,
    store_type: BlobStoreType,
) -> Result<Arc<dyn BlobStorage>, SyncError> {
    info!("初始化存储驱动: {}", store_type);
    match store_type {
        BlobStoreType::AmazonS3 => {
            let storage = AmazonS3::from_config(&config.cloud).await?;
            Ok(Arc::new(storage))
        }
        BlobStoreType::LocalFs => {
            let storage = LocalFsStorage::from_config(&config.cloud)?;
            Ok(Arc::new(storage))
        }
        // TODO: Google Drive / GCP Storage / Azure Blob 驱动
        BlobStoreType::GoogleDrive | BlobStoreType::GoogleCloud | BlobStoreType::AzureBlob => {
            Err(SyncError::UnsupportedDriver(store_type.to_string()))
        }
    }
}
