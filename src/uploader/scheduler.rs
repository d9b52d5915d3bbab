// 上传调度器
//
// 功能：
// - 消费目录遍历事件，每个待检查文件获取一个计数屏障单元后并发执行检查
// - 检查并发受 max_concurrent_checks 信号量限制
// - 文件有变化时打开文件并投递到上传队列（屏障单元随任务转移给工作池）
// - 致命存储错误只记录第一个，并取消本次运行

use crate::stats::Stats;
use crate::storage::{BlobStorage, StorageError};
use crate::uploader::folder::{DiscoveredFile, FolderWalker, WalkEvent};
use crate::uploader::task::{FailureStage, UploadFailure, UploadJob, UploadTask};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::fs::File;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

// =====================================================
// 致命错误锁存
// =====================================================

/// 致命存储错误锁存器
///
/// 只保留第一个致命错误，触发时取消关联的运行令牌。
#[derive(Debug)]
pub(crate) struct FatalLatch {
    error: Mutex<Option<StorageError>>,
    token: CancellationToken,
}

impl FatalLatch {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            error: Mutex::new(None),
            token,
        }
    }

    /// 记录致命错误，返回是否为第一个
    pub fn trip(&self, err: StorageError) -> bool {
        let first = {
            let mut slot = self.error.lock();
            if slot.is_none() {
                *slot = Some(err);
                true
            } else {
                false
            }
        };
        self.token.cancel();
        first
    }

    pub fn is_tripped(&self) -> bool {
        self.error.lock().is_some()
    }

    pub fn take(&self) -> Option<StorageError> {
        self.error.lock().take()
    }
}

// =====================================================
// 调度器
// =====================================================

/// 单个文件检查任务需要的共享上下文
#[derive(Clone)]
struct CheckContext {
    storage: Arc<dyn BlobStorage>,
    stats: Arc<Stats>,
    token: CancellationToken,
    upload_tx: mpsc::Sender<UploadJob>,
    failure_tx: mpsc::Sender<UploadFailure>,
    fatal: Arc<FatalLatch>,
}

/// 运行级调度器，遍历结束后即被丢弃（连带释放它持有的队列发送端）
pub(crate) struct Scheduler {
    ctx: CheckContext,
    barrier: TaskTracker,
    checks: Arc<Semaphore>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<dyn BlobStorage>,
        stats: Arc<Stats>,
        token: CancellationToken,
        barrier: TaskTracker,
        upload_tx: mpsc::Sender<UploadJob>,
        failure_tx: mpsc::Sender<UploadFailure>,
        fatal: Arc<FatalLatch>,
        max_concurrent_checks: usize,
    ) -> Self {
        Self {
            ctx: CheckContext {
                storage,
                stats,
                token,
                upload_tx,
                failure_tx,
                fatal,
            },
            barrier,
            checks: Arc::new(Semaphore::new(max_concurrent_checks.max(1))),
        }
    }

    /// 遍历目录并调度所有待检查文件
    ///
    /// 每个条目之间检查取消令牌。返回遍历过程中遇到的 I/O 错误数。
    pub async fn schedule_file_uploads(&self, walker: &mut FolderWalker) -> u64 {
        let mut traversal_errors = 0u64;

        loop {
            let event = tokio::select! {
                biased;
                _ = self.ctx.token.cancelled() => {
                    info!("扫描已取消，停止遍历");
                    break;
                }
                event = walker.next_event() => event,
            };

            let Some(event) = event else {
                break;
            };

            match event {
                WalkEvent::Error { path, error } => {
                    traversal_errors += 1;
                    warn!("遍历目录出错，跳过: {}: {}", path.display(), error);
                }
                WalkEvent::File(file) => {
                    let permit = tokio::select! {
                        biased;
                        _ = self.ctx.token.cancelled() => None,
                        permit = self.checks.clone().acquire_owned() => permit.ok(),
                    };
                    let Some(permit) = permit else {
                        info!("扫描已取消，停止遍历");
                        break;
                    };

                    // 先获取屏障单元再派生，保证等待方不会提前放行
                    let unit = self.barrier.token();
                    let ctx = self.ctx.clone();
                    tokio::spawn(check_and_schedule(ctx, file, unit, permit));
                }
            }
        }

        info!(
            "目录遍历结束: 发现 {} 个文件, {} 个遍历错误",
            walker.total_discovered(),
            traversal_errors
        );
        traversal_errors
    }
}

/// 单个文件的检查与投递
///
/// `unit` 在投递成功时转移给上传任务，其他所有路径上随函数返回释放。
async fn check_and_schedule(
    ctx: CheckContext,
    file: DiscoveredFile,
    unit: TaskTrackerToken,
    _permit: OwnedSemaphorePermit,
) {
    if ctx.token.is_cancelled() {
        return;
    }

    let changed = match ctx
        .storage
        .check_mod(&file.key, file.modified, file.size)
        .await
    {
        Ok(changed) => changed,
        Err(err) if err.is_fatal() => {
            error!("存储不可用，中止本次运行: {}: {}", file.key, err);
            ctx.fatal.trip(err);
            return;
        }
        Err(err) => {
            // 非致命检查错误：跳过该文件
            report_failure(&ctx.failure_tx, UploadFailure::new(&file.key, FailureStage::Check, err))
                .await;
            return;
        }
    };

    if !changed {
        debug!("文件未变化，跳过: {}", file.key);
        return;
    }
    if ctx.token.is_cancelled() {
        return;
    }

    let handle = match File::open(&file.path).await {
        Ok(handle) => handle,
        Err(err) => {
            report_failure(&ctx.failure_tx, UploadFailure::new(&file.key, FailureStage::Open, err))
                .await;
            return;
        }
    };

    let task = UploadTask::new(file.key, file.size, handle);

    let slot = tokio::select! {
        biased;
        _ = ctx.token.cancelled() => None,
        slot = ctx.upload_tx.reserve() => slot.ok(),
    };

    match slot {
        Some(slot) => {
            // 入队时计数
            ctx.stats.increase_upload_jobs();
            slot.send(UploadJob { task, unit });
        }
        None => {
            debug!("上传队列已关闭，丢弃任务: {}", task.key);
            let key = task.key.clone();
            if let Err(e) = task.cleanup() {
                warn!("释放上传任务资源失败: {}: {}", key, e);
            }
        }
    }
}

/// 向失败队列发送记录，队列已关闭时只记录调试日志
pub(crate) async fn report_failure(failure_tx: &mpsc::Sender<UploadFailure>, failure: UploadFailure) {
    if let Err(mpsc::error::SendError(failure)) = failure_tx.send(failure).await {
        debug!("失败队列已关闭，丢弃记录: {}", failure);
    }
}
