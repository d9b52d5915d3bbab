//! 本地目录存储：把对象镜像到另一个目录（`<root>/<key>`）

use crate::config::CloudConfig;
use crate::error::SyncError;
use crate::storage::{BlobStorage, StorageError};
use crate::uploader::UploadTask;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub struct LocalFsStorage {
    root: PathBuf,
}

impl LocalFsStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn from_config(cloud: &CloudConfig) -> Result<Self, SyncError> {
        if cloud.local_directory.as_os_str().is_empty() {
            return Err(SyncError::Config(
                "LOCAL_FS 驱动需要配置 cloud.local_directory".to_string(),
            ));
        }
        Ok(Self::new(&cloud.local_directory))
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        path.extend(key.split('/').filter(|s| !s.is_empty()));
        path
    }

    async fn ensure_root(&self) -> Result<(), StorageError> {
        match fs::metadata(&self.root).await {
            Ok(m) if m.is_dir() => Ok(()),
            Ok(_) => Err(StorageError::Fatal(format!(
                "目标不是文件夹: {}",
                self.root.display()
            ))),
            Err(e) => Err(StorageError::Fatal(format!(
                "目标目录不可用: {}: {}",
                self.root.display(),
                e
            ))),
        }
    }
}

#[async_trait]
impl BlobStorage for LocalFsStorage {
    async fn upload(&self, task: &mut UploadTask) -> Result<(), StorageError> {
        let path = self.path_for(&task.key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }

        task.rewind().await?;
        let mut file = fs::File::create(&path).await?;
        tokio::io::copy(&mut task.data, &mut file).await?;
        file.flush().await?;
        Ok(())
    }

    async fn check_mod(
        &self,
        key: &str,
        mod_time: DateTime<Utc>,
        size: u64,
    ) -> Result<bool, StorageError> {
        self.ensure_root().await?;

        let metadata = match fs::metadata(self.path_for(key)).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e.into()),
        };

        if metadata.len() != size {
            return Ok(true);
        }
        let remote_modified: DateTime<Utc> = metadata.modified()?.into();
        Ok(remote_modified < mod_time)
    }
}
