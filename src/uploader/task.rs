// 上传任务定义
//
// - UploadTask: 待上传对象（key + 可定位读取的数据句柄 + 清理函数）
// - UploadFailure: 单个文件失败记录，由调度器或工作池发送给错误监听器
// - UploadJob: 队列中的上传任务，携带计数屏障单元

use crate::storage::StorageError;
use std::fmt;
use std::io::{self, SeekFrom};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};
use tokio_util::task::task_tracker::TaskTrackerToken;

/// 可读、可定位的对象数据，存储驱动可以分段读取而不必一次载入整个文件
pub trait ObjectData: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> ObjectData for T {}

/// 清理函数（释放底层缓冲区等资源）
pub type CleanupFn = Box<dyn FnOnce() -> io::Result<()> + Send>;

/// 上传任务
pub struct UploadTask {
    /// 对象 key：带分区前缀、使用 `/` 分隔的相对路径
    pub key: String,
    /// 数据大小（字节）
    pub size: u64,
    /// 数据句柄
    pub data: Box<dyn ObjectData>,
    cleanup: Option<CleanupFn>,
}

impl UploadTask {
    pub fn new(key: impl Into<String>, size: u64, data: impl ObjectData + 'static) -> Self {
        Self {
            key: key.into(),
            size,
            data: Box::new(data),
            cleanup: None,
        }
    }

    /// 附加清理函数，在 [`UploadTask::cleanup`] 时调用
    pub fn with_cleanup<F>(mut self, f: F) -> Self
    where
        F: FnOnce() -> io::Result<()> + Send + 'static,
    {
        self.cleanup = Some(Box::new(f));
        self
    }

    /// 定位到数据开头
    pub async fn rewind(&mut self) -> io::Result<()> {
        self.data.seek(SeekFrom::Start(0)).await.map(|_| ())
    }

    /// 从头读取全部数据
    pub async fn read_all(&mut self) -> io::Result<Vec<u8>> {
        self.rewind().await?;
        let mut buf = Vec::with_capacity(self.size as usize);
        self.data.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    /// 从当前位置读取最多 `max` 字节，返回空表示已读完
    pub async fn read_chunk(&mut self, max: u64) -> io::Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(max.min(self.size) as usize);
        (&mut self.data).take(max).read_to_end(&mut buf).await?;
        Ok(buf)
    }

    /// 释放任务资源：关闭数据句柄并调用清理函数
    ///
    /// 消耗任务本身，因此每个任务只会清理一次。
    pub fn cleanup(self) -> io::Result<()> {
        let UploadTask { data, cleanup, .. } = self;
        drop(data);
        match cleanup {
            Some(f) => f(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for UploadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadTask")
            .field("key", &self.key)
            .field("size", &self.size)
            .field("has_cleanup", &self.cleanup.is_some())
            .finish()
    }
}

/// 失败发生的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// 修改检查（非致命错误）
    Check,
    /// 打开本地文件
    Open,
    /// 上传
    Upload,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureStage::Check => write!(f, "check"),
            FailureStage::Open => write!(f, "open"),
            FailureStage::Upload => write!(f, "upload"),
        }
    }
}

/// 单个文件的失败记录
#[derive(Debug)]
pub struct UploadFailure {
    pub key: String,
    pub stage: FailureStage,
    pub cause: StorageError,
}

impl UploadFailure {
    pub fn new(key: impl Into<String>, stage: FailureStage, cause: impl Into<StorageError>) -> Self {
        Self {
            key: key.into(),
            stage,
            cause: cause.into(),
        }
    }
}

impl fmt::Display for UploadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "文件 {} 处理失败 ({}): {}", self.key, self.stage, self.cause)
    }
}

/// 上传队列中的任务
///
/// `unit` 是扫描时获取的计数屏障单元，随任务转移给工作池，
/// 在上传结束（或任务被丢弃）时释放。
pub(crate) struct UploadJob {
    pub task: UploadTask,
    pub unit: TaskTrackerToken,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_read_all_rewinds() {
        let mut task = UploadTask::new("foo", 3, Cursor::new(b"foo".to_vec()));
        assert_eq!(task.read_all().await.unwrap(), b"foo");
        // 再次读取仍然从头开始
        assert_eq!(task.read_all().await.unwrap(), b"foo");
    }

    #[tokio::test]
    async fn test_read_chunks() {
        let mut task = UploadTask::new("foo", 10, Cursor::new(b"0123456789".to_vec()));
        task.rewind().await.unwrap();

        assert_eq!(task.read_chunk(4).await.unwrap(), b"0123");
        assert_eq!(task.read_chunk(4).await.unwrap(), b"4567");
        assert_eq!(task.read_chunk(4).await.unwrap(), b"89");
        assert!(task.read_chunk(4).await.unwrap().is_empty());
    }

    #[test]
    fn test_cleanup_runs_hook() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let task = UploadTask::new("foo", 0, Cursor::new(Vec::new())).with_cleanup(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        task.cleanup().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cleanup_error_is_returned() {
        let task = UploadTask::new("foo", 0, Cursor::new(Vec::new()))
            .with_cleanup(|| Err(io::Error::other("close failed")));
        assert!(task.cleanup().is_err());
    }

    #[test]
    fn test_failure_display() {
        let failure = UploadFailure::new(
            "123/a.txt",
            FailureStage::Upload,
            StorageError::Backend("bar error".to_string()),
        );
        let msg = failure.to_string();
        assert!(msg.contains("123/a.txt"));
        assert!(msg.contains("upload"));
        assert!(msg.contains("bar error"));
    }
}
