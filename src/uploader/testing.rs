//! 测试用的可编排存储实现

use crate::storage::{BlobStorage, StorageError};
use crate::uploader::UploadTask;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// 预设的检查结果（StorageError 不可克隆，按类型保存后每次重新构造）
#[derive(Debug, Clone)]
enum CheckOutcome {
    Changed(bool),
    Fatal(String),
    Backend(String),
}

impl CheckOutcome {
    fn from_result(result: Result<bool, StorageError>) -> Self {
        match result {
            Ok(changed) => CheckOutcome::Changed(changed),
            Err(StorageError::Fatal(msg)) => CheckOutcome::Fatal(msg),
            Err(other) => CheckOutcome::Backend(other.to_string()),
        }
    }

    fn to_result(&self) -> Result<bool, StorageError> {
        match self {
            CheckOutcome::Changed(changed) => Ok(*changed),
            CheckOutcome::Fatal(msg) => Err(StorageError::Fatal(msg.clone())),
            CheckOutcome::Backend(msg) => Err(StorageError::Backend(msg.clone())),
        }
    }
}

#[derive(Debug)]
pub(crate) struct ScriptedStorage {
    default_check: CheckOutcome,
    checks: HashMap<String, CheckOutcome>,
    failing_uploads: HashSet<String>,
    hanging_uploads: HashSet<String>,
    check_delays: HashMap<String, Duration>,
    delay: Option<Duration>,
    checked: Mutex<Vec<String>>,
    uploaded: Mutex<Vec<(String, Vec<u8>)>>,
    active_uploads: AtomicUsize,
    max_active_uploads: AtomicUsize,
}

impl ScriptedStorage {
    /// 默认所有文件都有变化、所有上传都成功
    pub fn new() -> Self {
        Self {
            default_check: CheckOutcome::Changed(true),
            checks: HashMap::new(),
            failing_uploads: HashSet::new(),
            hanging_uploads: HashSet::new(),
            check_delays: HashMap::new(),
            delay: None,
            checked: Mutex::new(Vec::new()),
            uploaded: Mutex::new(Vec::new()),
            active_uploads: AtomicUsize::new(0),
            max_active_uploads: AtomicUsize::new(0),
        }
    }

    pub fn default_changed(self, changed: bool) -> Self {
        self.default_check(Ok(changed))
    }

    pub fn default_check(mut self, result: Result<bool, StorageError>) -> Self {
        self.default_check = CheckOutcome::from_result(result);
        self
    }

    pub fn check_result(mut self, key: &str, result: Result<bool, StorageError>) -> Self {
        self.checks
            .insert(key.to_string(), CheckOutcome::from_result(result));
        self
    }

    pub fn fail_upload(mut self, key: &str) -> Self {
        self.failing_uploads.insert(key.to_string());
        self
    }

    /// 该文件的上传永远不会结束
    pub fn hang_upload(mut self, key: &str) -> Self {
        self.hanging_uploads.insert(key.to_string());
        self
    }

    /// 检查该文件前额外等待
    pub fn delay_check(mut self, key: &str, delay: Duration) -> Self {
        self.check_delays.insert(key.to_string(), delay);
        self
    }

    /// 每次检查与上传前等待
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn checked_keys(&self) -> Vec<String> {
        self.checked.lock().clone()
    }

    pub fn uploaded(&self) -> Vec<(String, Vec<u8>)> {
        self.uploaded.lock().clone()
    }

    pub fn uploaded_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.uploaded.lock().iter().map(|(k, _)| k.clone()).collect();
        keys.sort();
        keys
    }

    /// 当前正在执行的上传数
    pub fn active_uploads(&self) -> usize {
        self.active_uploads.load(Ordering::SeqCst)
    }

    /// 观测到的最大同时上传数
    pub fn max_concurrent_uploads(&self) -> usize {
        self.max_active_uploads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStorage for ScriptedStorage {
    async fn upload(&self, task: &mut UploadTask) -> Result<(), StorageError> {
        let active = self.active_uploads.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_uploads.fetch_max(active, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.hanging_uploads.contains(&task.key) {
            std::future::pending::<()>().await;
        }
        let result = if self.failing_uploads.contains(&task.key) {
            Err(StorageError::Backend("bar error".to_string()))
        } else {
            match task.read_all().await {
                Ok(body) => {
                    self.uploaded.lock().push((task.key.clone(), body));
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        };

        self.active_uploads.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn check_mod(
        &self,
        key: &str,
        _mod_time: DateTime<Utc>,
        _size: u64,
    ) -> Result<bool, StorageError> {
        self.checked.lock().push(key.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(delay) = self.check_delays.get(key) {
            tokio::time::sleep(*delay).await;
        }
        self.checks
            .get(key)
            .unwrap_or(&self.default_check)
            .to_result()
    }
}
