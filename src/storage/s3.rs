//! Amazon S3 存储：基于 aws-sdk-s3，小对象直接 PutObject，大对象走分段上传。

use crate::config::CloudConfig;
use crate::error::SyncError;
use crate::storage::{BlobStorage, StorageError};
use crate::uploader::UploadTask;
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::{ByteStream, DateTime as S3DateTime};
use aws_sdk_s3::types::{ChecksumAlgorithm, CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// 分段大小，同时也是单次 PutObject 的上限
pub const PART_SIZE: u64 = 10 * 1024 * 1024; // 10 MiB

/// Amazon S3 存储实现
#[derive(Debug, Clone)]
pub struct AmazonS3 {
    client: Client,
    bucket: String,
    part_size: u64,
}

impl AmazonS3 {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            part_size: PART_SIZE,
        }
    }

    /// 根据云存储配置创建客户端
    ///
    /// 同时配置了 access_key 和 secret_key 时使用静态凭证，否则走默认凭证链。
    pub async fn from_config(cloud: &CloudConfig) -> Result<Self, SyncError> {
        if cloud.bucket.is_empty() {
            return Err(SyncError::Config("cloud.bucket 不能为空".to_string()));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if !cloud.region.is_empty() {
            loader = loader.region(Region::new(cloud.region.clone()));
        }
        if !cloud.access_key.is_empty() && !cloud.secret_key.is_empty() {
            loader = loader.credentials_provider(Credentials::new(
                cloud.access_key.clone(),
                cloud.secret_key.clone(),
                None,
                None,
                "cloudsync-static",
            ));
        }
        let shared = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if !cloud.endpoint.is_empty() {
            builder = builder.endpoint_url(&cloud.endpoint).force_path_style(true);
        }

        let storage = Self::new(Client::from_conf(builder.build()), &cloud.bucket);
        storage.verify_bucket().await?;
        Ok(storage)
    }

    /// 启动前确认存储桶存在且可访问
    ///
    /// HeadObject 无法区分对象不存在和存储桶不存在，两者都是 404。
    pub async fn verify_bucket(&self) -> Result<(), SyncError> {
        match self.client.head_bucket().bucket(&self.bucket).send().await {
            Ok(_) => {
                debug!("存储桶可用: {}", self.bucket);
                Ok(())
            }
            Err(err) => match bucket_unavailable_reason(status_of(&err)) {
                Some(reason) => Err(SyncError::FatalStorage(StorageError::Fatal(format!(
                    "{}: bucket={}",
                    reason, self.bucket
                )))),
                None => Err(SyncError::Storage(format!(
                    "HeadBucket {} 失败: {}",
                    self.bucket,
                    DisplayErrorContext(&err)
                ))),
            },
        }
    }

    async fn put_small_object(&self, task: &mut UploadTask) -> Result<(), StorageError> {
        let body = task.read_all().await?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&task.key)
            .checksum_algorithm(ChecksumAlgorithm::Sha256)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| backend_error("PutObject", &task.key, &e))?;
        Ok(())
    }

    async fn put_multipart_object(&self, task: &mut UploadTask) -> Result<(), StorageError> {
        let create = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&task.key)
            .send()
            .await
            .map_err(|e| backend_error("CreateMultipartUpload", &task.key, &e))?;
        let upload_id = create
            .upload_id()
            .ok_or_else(|| StorageError::Backend(format!("{} 缺少 upload_id", task.key)))?
            .to_string();

        match self.upload_parts(task, &upload_id).await {
            Ok(parts) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(&task.key)
                    .upload_id(&upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(|e| backend_error("CompleteMultipartUpload", &task.key, &e))?;
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(&task.key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(
                        "取消分段上传失败: key={}, upload_id={}, error={}",
                        task.key,
                        upload_id,
                        DisplayErrorContext(&abort_err)
                    );
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        task: &mut UploadTask,
        upload_id: &str,
    ) -> Result<Vec<CompletedPart>, StorageError> {
        task.rewind().await?;

        let mut parts = Vec::new();
        let mut part_number = 1i32;
        loop {
            let chunk = task.read_chunk(self.part_size).await?;
            if chunk.is_empty() {
                break;
            }
            debug!(
                "上传分段: key={}, part={}, size={}",
                task.key,
                part_number,
                chunk.len()
            );

            let resp = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(&task.key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|e| backend_error("UploadPart", &task.key, &e))?;

            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(resp.e_tag().map(str::to_string))
                    .build(),
            );
            part_number += 1;
        }
        Ok(parts)
    }
}

#[async_trait]
impl BlobStorage for AmazonS3 {
    async fn upload(&self, task: &mut UploadTask) -> Result<(), StorageError> {
        if task.size <= self.part_size {
            self.put_small_object(task).await
        } else {
            self.put_multipart_object(task).await
        }
    }

    async fn check_mod(
        &self,
        key: &str,
        mod_time: DateTime<Utc>,
        size: u64,
    ) -> Result<bool, StorageError> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .if_unmodified_since(S3DateTime::from_secs(mod_time.timestamp()))
            .send()
            .await;

        match result {
            Ok(out) => {
                let remote_size = out.content_length().unwrap_or_default();
                let remote_modified = out.last_modified().map(|t| t.secs()).unwrap_or_default();
                Ok(remote_differs(remote_size, remote_modified, size, mod_time))
            }
            Err(err) => match classify_head_status(status_of(&err)) {
                HeadOutcome::Changed => Ok(true),
                HeadOutcome::Unchanged => Ok(false),
                HeadOutcome::Fatal => Err(StorageError::Fatal(format!(
                    "访问存储桶被拒绝: bucket={}, key={}",
                    self.bucket, key
                ))),
                HeadOutcome::Error => Err(backend_error("HeadObject", key, &err)),
            },
        }
    }
}

/// HeadObject 错误状态码的处理方式
#[derive(Debug, PartialEq, Eq)]
enum HeadOutcome {
    Changed,
    Unchanged,
    Fatal,
    Error,
}

fn classify_head_status(status: Option<u16>) -> HeadOutcome {
    match status {
        // 远程对象不存在，允许写入
        Some(404) => HeadOutcome::Changed,
        Some(403) => HeadOutcome::Fatal,
        // If-Unmodified-Since 不满足：远程对象更新
        Some(412) => HeadOutcome::Unchanged,
        _ => HeadOutcome::Error,
    }
}

/// HeadBucket 状态码对应的致命原因，其他状态不视为致命
fn bucket_unavailable_reason(status: Option<u16>) -> Option<&'static str> {
    match status {
        Some(404) => Some("存储桶不存在"),
        Some(403) => Some("访问存储桶被拒绝"),
        _ => None,
    }
}

fn remote_differs(remote_size: i64, remote_modified_secs: i64, size: u64, mod_time: DateTime<Utc>) -> bool {
    remote_size != size as i64 || remote_modified_secs < mod_time.timestamp()
}

fn status_of<E>(err: &SdkError<E, HttpResponse>) -> Option<u16> {
    err.raw_response().map(|r| r.status().as_u16())
}

fn backend_error<E>(op: &str, key: &str, err: &SdkError<E, HttpResponse>) -> StorageError
where
    E: std::error::Error + 'static,
{
    StorageError::Backend(format!("{} {} 失败: {}", op, key, DisplayErrorContext(err)))
}
