//! 扫描器：一次完整的同步运行
//!
//! 每次 [`Scanner::start`] 都会重新创建队列、计数屏障和致命错误锁存，
//! 运行结束时全部销毁，多次运行之间不共享这些状态。
//!
//! 运行步骤：
//! 1. 校验配置与根目录
//! 2. 启动错误监听器、上传工作池和关闭协调器（登记在关闭屏障上）
//! 3. 遍历目录并调度检查，等待计数屏障清零
//! 4. 取消运行令牌，关闭队列，等待关闭屏障

use crate::config::AppConfig;
use crate::error::SyncError;
use crate::stats::{Stats, StatsSnapshot};
use crate::storage::BlobStorage;
use crate::uploader::folder::FolderWalker;
use crate::uploader::scheduler::{FatalLatch, Scheduler};
use crate::uploader::shutdown::{shutdown_upload_workers, wait_for_drain, QueueSenders, ShutdownOutcome};
use crate::uploader::worker::{listen_and_execute_upload_jobs, listen_upload_errors};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// 一次运行的结果
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// 运行结束时的计数器快照
    pub stats: StatsSnapshot,
    /// 是否被外部中断
    pub interrupted: bool,
    /// 遍历 I/O 错误数
    pub traversal_errors: u64,
    /// 错误监听器收到的失败记录数（包括检查和打开失败）
    pub reported_failures: u64,
    /// 取消后所有活动是否在期限内结束；为 false 时仍有上传或检查被放弃
    pub drained: bool,
    /// 耗时
    pub elapsed: Duration,
}

/// 扫描器
pub struct Scanner {
    config: Arc<AppConfig>,
    storage: Arc<dyn BlobStorage>,
    /// 根取消令牌，每次运行使用它的子令牌
    token: CancellationToken,
    stats: Arc<Stats>,
    /// 关闭屏障：登记工作池、错误监听器和关闭协调器
    shutdown: TaskTracker,
    /// 取消之后等待活动结束的期限
    drain_timeout: Duration,
    running: AtomicBool,
}

/// 默认的取消后等待期限
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(15);

impl Scanner {
    pub fn new(config: Arc<AppConfig>, storage: Arc<dyn BlobStorage>) -> Self {
        let shutdown = TaskTracker::new();
        // 未运行时关闭屏障处于关闭且为空的状态，等待立即返回
        shutdown.close();

        Self {
            config,
            storage,
            token: CancellationToken::new(),
            stats: Arc::new(Stats::new()),
            shutdown,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            running: AtomicBool::new(false),
        }
    }

    /// 设置取消（中断或致命错误）之后等待活动结束的期限
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// 根取消令牌，取消后当前及之后的运行都会被中断
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    pub fn shutdown_tracker(&self) -> TaskTracker {
        self.shutdown.clone()
    }

    /// 执行一次完整的同步运行
    pub async fn start(&self) -> Result<RunSummary, SyncError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SyncError::AlreadyRunning);
        }
        let result = self.run().await;
        self.running.store(false, Ordering::SeqCst);
        result
    }

    /// 触发取消并在限定时间内等待所有活动结束
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownOutcome {
        self.token.cancel();
        wait_for_drain(&self.shutdown, timeout).await
    }

    async fn run(&self) -> Result<RunSummary, SyncError> {
        let scanner = &self.config.scanner;
        scanner.validate().map_err(SyncError::Config)?;
        let mut walker = FolderWalker::open(&self.config.root_directory, scanner).await?;

        let started = Instant::now();
        self.stats.reset();

        let run_token = self.token.child_token();
        let barrier = TaskTracker::new();
        let fatal = Arc::new(FatalLatch::new(run_token.clone()));
        let (upload_tx, upload_rx) = mpsc::channel(scanner.queue_capacity);
        let (failure_tx, failure_rx) = mpsc::channel(scanner.queue_capacity);

        self.shutdown.reopen();
        let listener = self
            .shutdown
            .spawn(listen_upload_errors(failure_rx, scanner.log_errors));
        self.shutdown.spawn(listen_and_execute_upload_jobs(
            upload_rx,
            failure_tx.clone(),
            self.storage.clone(),
            self.stats.clone(),
            run_token.clone(),
            scanner.max_concurrent_uploads,
        ));
        self.shutdown.spawn(shutdown_upload_workers(
            run_token.clone(),
            QueueSenders::new(upload_tx.clone(), failure_tx.clone()),
            self.config.clone(),
        ));

        info!(
            "开始扫描: {} (分区: {})",
            self.config.root_directory.display(),
            scanner.partition_id
        );

        let scheduler = Scheduler::new(
            self.storage.clone(),
            self.stats.clone(),
            run_token.clone(),
            barrier.clone(),
            upload_tx,
            failure_tx,
            fatal.clone(),
            scanner.max_concurrent_checks,
        );
        let traversal_errors = scheduler.schedule_file_uploads(&mut walker).await;
        drop(scheduler);
        drop(walker);

        // 等待所有检查与上传结束，取消之后最多再等 drain_timeout
        barrier.close();
        let mut drained = self.wait_after_cancel(barrier.wait(), &run_token).await;

        run_token.cancel();
        self.shutdown.close();
        if drained {
            drained = self
                .wait_after_cancel(self.shutdown.wait(), &run_token)
                .await;
        }

        let reported_failures = if drained {
            match listener.await {
                Ok(count) => count,
                Err(e) => {
                    error!("错误监听器异常退出: {}", e);
                    0
                }
            }
        } else {
            warn!(
                "等待上传活动结束超时 ({:?})，放弃剩余 {} 个上传",
                self.drain_timeout,
                self.stats.in_flight()
            );
            listener.abort();
            0
        };

        if let Some(err) = fatal.take() {
            return Err(SyncError::FatalStorage(err));
        }

        let summary = RunSummary {
            stats: self.stats.snapshot(),
            interrupted: self.token.is_cancelled(),
            traversal_errors,
            reported_failures,
            drained,
            elapsed: started.elapsed(),
        };
        info!(
            "扫描完成: 耗时 {:?}, 已调度 {}, 成功 {}, 失败 {}, 中断: {}",
            summary.elapsed,
            summary.stats.total_scheduled,
            summary.stats.succeeded(),
            summary.stats.total_failed,
            summary.interrupted
        );
        Ok(summary)
    }

    /// 等待 `fut` 完成；令牌取消后最多再等 `drain_timeout`，超时返回 false
    async fn wait_after_cancel<F>(&self, fut: F, token: &CancellationToken) -> bool
    where
        F: std::future::Future<Output = ()>,
    {
        let deadline = async {
            token.cancelled().await;
            tokio::time::sleep(self.drain_timeout).await;
        };
        tokio::select! {
            _ = fut => true,
            _ = deadline => false,
        }
    }
}
