// 关闭协调
//
// - 关闭协调器：取消后关闭上传队列和失败队列（只关闭一次），并回写配置
// - 系统中断桥接：收到 SIGINT/SIGTERM 后触发取消，并在限定时间内等待所有活动结束

use crate::config::AppConfig;
use crate::stats::Stats;
use crate::uploader::task::{UploadFailure, UploadJob};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// 队列的根发送端
///
/// 扫描器和工作池只持有克隆，根发送端被丢弃且克隆全部释放后，接收方才会看到队列关闭。
#[derive(Debug)]
pub(crate) struct QueueSenders {
    upload: Option<mpsc::Sender<UploadJob>>,
    failure: Option<mpsc::Sender<UploadFailure>>,
}

impl QueueSenders {
    pub fn new(upload: mpsc::Sender<UploadJob>, failure: mpsc::Sender<UploadFailure>) -> Self {
        Self {
            upload: Some(upload),
            failure: Some(failure),
        }
    }

    /// 丢弃根发送端，重复调用无副作用；返回本次是否实际关闭
    pub fn close(&mut self) -> bool {
        let upload = self.upload.take();
        let failure = self.failure.take();
        upload.is_some() || failure.is_some()
    }
}

/// 关闭协调器
///
/// 等待取消令牌触发后关闭队列，再尽力回写自动生成的分区 ID。
pub(crate) async fn shutdown_upload_workers(
    token: CancellationToken,
    mut senders: QueueSenders,
    config: Arc<AppConfig>,
) {
    token.cancelled().await;

    if senders.close() {
        debug!("上传队列和失败队列已关闭");
    }

    match config.persist_generated_state().await {
        Ok(true) => info!("已保存自动生成的分区 ID: {}", config.scanner.partition_id),
        Ok(false) => {}
        Err(e) => warn!("保存配置失败: {:#}", e),
    }
}

/// 等待关闭的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// 所有活动都已结束
    Drained,
    /// 超时，仍有活动未结束
    TimedOut,
}

/// 在限定时间内等待关闭屏障
pub async fn wait_for_drain(tracker: &TaskTracker, timeout: Duration) -> ShutdownOutcome {
    match tokio::time::timeout(timeout, tracker.wait()).await {
        Ok(()) => ShutdownOutcome::Drained,
        Err(_) => ShutdownOutcome::TimedOut,
    }
}

/// 监听系统中断
///
/// `signal` 完成时触发取消并等待关闭屏障（最多 `grace`），返回等待结果；
/// 令牌被其他途径取消时直接返回 None。
pub fn listen_for_sys_interruption<S>(
    signal: S,
    token: CancellationToken,
    shutdown: TaskTracker,
    grace: Duration,
    stats: Arc<Stats>,
) -> JoinHandle<Option<ShutdownOutcome>>
where
    S: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            _ = signal => {
                let snapshot = stats.snapshot();
                warn!(
                    "收到中断信号，开始关闭: 已调度 {}, 执行中 {}, 失败 {}",
                    snapshot.total_scheduled, snapshot.in_flight, snapshot.total_failed
                );
                token.cancel();

                let outcome = wait_for_drain(&shutdown, grace).await;
                match outcome {
                    ShutdownOutcome::Drained => info!("所有上传活动已结束"),
                    ShutdownOutcome::TimedOut => {
                        warn!("等待上传活动结束超时 ({:?})", grace)
                    }
                }
                Some(outcome)
            }
            _ = token.cancelled() => None,
        }
    })
}

/// 等待 Ctrl+C 或 SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("监听 Ctrl+C 失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("监听 SIGTERM 失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
