//! 上传工作池与错误监听器
//!
//! 工作池从上传队列接收任务，用信号量限制同时上传的数量；
//! 取消之后不再开始新的上传，队列中剩余的任务只做资源释放。

use crate::stats::Stats;
use crate::storage::BlobStorage;
use crate::uploader::scheduler::report_failure;
use crate::uploader::task::{FailureStage, UploadFailure, UploadJob};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 监听上传队列并执行上传，队列关闭且所有上传结束后返回
pub(crate) async fn listen_and_execute_upload_jobs(
    mut upload_rx: mpsc::Receiver<UploadJob>,
    failure_tx: mpsc::Sender<UploadFailure>,
    storage: Arc<dyn BlobStorage>,
    stats: Arc<Stats>,
    token: CancellationToken,
    max_concurrent_uploads: usize,
) {
    let slots = Arc::new(Semaphore::new(max_concurrent_uploads.max(1)));
    let mut running = JoinSet::new();

    while let Some(job) = upload_rx.recv().await {
        // 回收已结束的上传
        while let Some(result) = running.try_join_next() {
            log_join_result(result);
        }

        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            permit = slots.clone().acquire_owned() => permit.ok(),
        };

        match permit {
            Some(permit) => {
                running.spawn(execute_upload_job(
                    job,
                    permit,
                    storage.clone(),
                    stats.clone(),
                    failure_tx.clone(),
                ));
            }
            None => discard_upload_job(job, &stats),
        }
    }

    while let Some(result) = running.join_next().await {
        log_join_result(result);
    }
    debug!("上传工作池已退出");
}

/// 执行单个上传任务
///
/// 无论上传结果如何都会释放任务资源，并在最后释放计数屏障单元。
async fn execute_upload_job(
    job: UploadJob,
    _permit: OwnedSemaphorePermit,
    storage: Arc<dyn BlobStorage>,
    stats: Arc<Stats>,
    failure_tx: mpsc::Sender<UploadFailure>,
) {
    let UploadJob { mut task, unit } = job;
    let key = task.key.clone();
    let started = Instant::now();

    info!("开始上传: {}", key);
    let result = storage.upload(&mut task).await;

    if let Err(e) = task.cleanup() {
        warn!("释放上传任务资源失败: {}: {}", key, e);
    }

    match result {
        Ok(()) => {
            stats.decrease_upload_jobs();
            info!(
                "上传完成: {}, 耗时 {:?}, 已调度 {}, 剩余 {}",
                key,
                started.elapsed(),
                stats.total_scheduled(),
                stats.in_flight()
            );
        }
        Err(err) => {
            // 先计失败再减执行中，保证读取方看到的已调度数 >= 成功 + 失败
            stats.increase_failed_jobs();
            stats.decrease_upload_jobs();
            report_failure(&failure_tx, UploadFailure::new(key, FailureStage::Upload, err)).await;
        }
    }

    drop(unit);
}

/// 取消后丢弃队列中的任务：释放资源并撤销计数
fn discard_upload_job(job: UploadJob, stats: &Stats) {
    let UploadJob { task, unit } = job;
    debug!("运行已取消，丢弃上传任务: {}", task.key);

    let key = task.key.clone();
    if let Err(e) = task.cleanup() {
        warn!("释放上传任务资源失败: {}: {}", key, e);
    }
    stats.revert_upload_job();
    drop(unit);
}

fn log_join_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!("上传任务异常退出: {}", e);
    }
}

/// 监听失败队列，队列关闭后返回收到的失败记录数
pub(crate) async fn listen_upload_errors(
    mut failure_rx: mpsc::Receiver<UploadFailure>,
    log_errors: bool,
) -> u64 {
    let mut received = 0u64;
    while let Some(failure) = failure_rx.recv().await {
        received += 1;
        if log_errors {
            error!("{}", failure);
        }
    }
    received
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageError;
    use crate::uploader::testing::ScriptedStorage;
    use crate::uploader::UploadTask;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_util::task::TaskTracker;

    fn job(
        barrier: &TaskTracker,
        stats: &Stats,
        key: &str,
        body: &[u8],
        cleanups: &Arc<AtomicUsize>,
    ) -> UploadJob {
        let counter = cleanups.clone();
        let task = UploadTask::new(key, body.len() as u64, Cursor::new(body.to_vec())).with_cleanup(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        );
        stats.increase_upload_jobs();
        UploadJob {
            task,
            unit: barrier.token(),
        }
    }

    #[tokio::test]
    async fn test_uploads_and_failures() {
        let storage = Arc::new(ScriptedStorage::new().fail_upload("bad.txt"));
        let stats = Arc::new(Stats::new());
        let barrier = TaskTracker::new();
        let cleanups = Arc::new(AtomicUsize::new(0));
        let (upload_tx, upload_rx) = mpsc::channel(1);
        let (failure_tx, failure_rx) = mpsc::channel(1);

        let listener = tokio::spawn(listen_upload_errors(failure_rx, true));
        let dispatcher = tokio::spawn(listen_and_execute_upload_jobs(
            upload_rx,
            failure_tx,
            storage.clone(),
            stats.clone(),
            CancellationToken::new(),
            2,
        ));

        for key in ["a.txt", "bad.txt", "sub/b.txt"] {
            upload_tx
                .send(job(&barrier, &stats, key, key.as_bytes(), &cleanups))
                .await
                .unwrap();
        }
        drop(upload_tx);

        barrier.close();
        barrier.wait().await;
        dispatcher.await.unwrap();
        assert_eq!(listener.await.unwrap(), 1);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.total_scheduled, 3);
        assert_eq!(snapshot.in_flight, 0);
        assert_eq!(snapshot.total_failed, 1);
        assert_eq!(snapshot.succeeded(), 2);
        assert_eq!(cleanups.load(Ordering::SeqCst), 3);

        let mut uploaded: Vec<(String, Vec<u8>)> = storage.uploaded();
        uploaded.sort();
        assert_eq!(
            uploaded,
            vec![
                ("a.txt".to_string(), b"a.txt".to_vec()),
                ("sub/b.txt".to_string(), b"sub/b.txt".to_vec()),
            ]
        );
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let storage = Arc::new(ScriptedStorage::new().with_delay(Duration::from_millis(50)));
        let stats = Arc::new(Stats::new());
        let barrier = TaskTracker::new();
        let cleanups = Arc::new(AtomicUsize::new(0));
        let (upload_tx, upload_rx) = mpsc::channel(8);
        let (failure_tx, _failure_rx) = mpsc::channel(1);

        for i in 0..6 {
            upload_tx
                .send(job(&barrier, &stats, &format!("f{}", i), b"x", &cleanups))
                .await
                .unwrap();
        }
        drop(upload_tx);

        listen_and_execute_upload_jobs(
            upload_rx,
            failure_tx,
            storage.clone(),
            stats.clone(),
            CancellationToken::new(),
            2,
        )
        .await;

        assert_eq!(storage.max_concurrent_uploads(), 2);
        assert_eq!(cleanups.load(Ordering::SeqCst), 6);
        assert_eq!(stats.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_jobs_are_cleaned_up_not_uploaded() {
        let storage = Arc::new(ScriptedStorage::new());
        let stats = Arc::new(Stats::new());
        let barrier = TaskTracker::new();
        let cleanups = Arc::new(AtomicUsize::new(0));
        let token = CancellationToken::new();
        let (upload_tx, upload_rx) = mpsc::channel(4);
        let (failure_tx, failure_rx) = mpsc::channel(1);

        for key in ["a.txt", "b.txt"] {
            upload_tx
                .send(job(&barrier, &stats, key, b"x", &cleanups))
                .await
                .unwrap();
        }
        drop(upload_tx);
        token.cancel();

        listen_and_execute_upload_jobs(upload_rx, failure_tx, storage.clone(), stats.clone(), token, 2)
            .await;
        barrier.close();
        barrier.wait().await;

        assert!(storage.uploaded().is_empty());
        assert_eq!(cleanups.load(Ordering::SeqCst), 2);
        assert_eq!(stats.total_scheduled(), 0);
        assert_eq!(stats.in_flight(), 0);
        assert_eq!(listen_upload_errors(failure_rx, false).await, 0);
    }

    #[tokio::test]
    async fn test_cleanup_error_does_not_fail_upload() {
        let storage = Arc::new(ScriptedStorage::new());
        let stats = Arc::new(Stats::new());
        let barrier = TaskTracker::new();
        let (upload_tx, upload_rx) = mpsc::channel(1);
        let (failure_tx, failure_rx) = mpsc::channel(1);

        stats.increase_upload_jobs();
        let task = UploadTask::new("a.txt", 1, Cursor::new(b"a".to_vec()))
            .with_cleanup(|| Err(std::io::Error::other("close failed")));
        upload_tx
            .send(UploadJob {
                task,
                unit: barrier.token(),
            })
            .await
            .unwrap();
        drop(upload_tx);

        listen_and_execute_upload_jobs(
            upload_rx,
            failure_tx,
            storage,
            stats.clone(),
            CancellationToken::new(),
            1,
        )
        .await;

        assert_eq!(stats.total_failed(), 0);
        assert_eq!(stats.in_flight(), 0);
        assert_eq!(listen_upload_errors(failure_rx, false).await, 0);
    }

    #[tokio::test]
    async fn test_error_listener_counts_failures() {
        let (tx, rx) = mpsc::channel(4);
        for key in ["a", "b"] {
            tx.send(UploadFailure::new(
                key,
                FailureStage::Upload,
                StorageError::Backend("bar error".to_string()),
            ))
            .await
            .unwrap();
        }
        drop(tx);
        assert_eq!(listen_upload_errors(rx, false).await, 2);
    }

    /// 统计 ERROR 级别的日志事件
    #[derive(Clone, Default)]
    struct ErrorCounter(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for ErrorCounter {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            if *event.metadata().level() == tracing::Level::ERROR {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    async fn logged_errors(log_errors: bool) -> (u64, usize) {
        use tracing::instrument::WithSubscriber;
        use tracing_subscriber::layer::SubscriberExt;

        let (tx, rx) = mpsc::channel(4);
        for key in ["a", "b"] {
            tx.send(UploadFailure::new(
                key,
                FailureStage::Open,
                StorageError::Backend("bar error".to_string()),
            ))
            .await
            .unwrap();
        }
        drop(tx);

        let counter = ErrorCounter::default();
        let subscriber = tracing_subscriber::registry().with(counter.clone());
        let received = listen_upload_errors(rx, log_errors)
            .with_subscriber(subscriber)
            .await;
        (received, counter.0.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_error_listener_logs_only_when_enabled() {
        assert_eq!(logged_errors(true).await, (2, 2));
        assert_eq!(logged_errors(false).await, (2, 0));
    }
}
