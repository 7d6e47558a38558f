//! 批次服务 - 对外门面
//!
//! 在 `BatchCoordinator` 之上补充：
//! - 同一批次 ID 同时只能运行一次
//! - 按批次取消
//! - 进度查询与订阅
//! - 读取已存储的输出、压缩包和输出列表

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{BatchError, CoreResult};
use crate::models::{BatchRequest, BatchResult};
use crate::orchestrator::batch_coordinator::BatchCoordinator;
use crate::services::{ProgressReporter, ProgressSnapshot, ProgressSubscription, StoredOutput};
use crate::utils::naming;

/// 批次服务
pub struct BatchService {
    coordinator: Arc<BatchCoordinator>,
    reporter: ProgressReporter,
    in_flight: Arc<DashMap<String, CancellationToken>>,
}

/// 批次结束（包括 future 被丢弃）时注销运行登记
struct InFlightGuard {
    batch_id: String,
    in_flight: Arc<DashMap<String, CancellationToken>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.remove(&self.batch_id);
    }
}

impl BatchService {
    /// 创建服务，协调器与服务共用同一个进度上报器
    pub fn new(coordinator: BatchCoordinator, reporter: ProgressReporter) -> Self {
        Self {
            coordinator: Arc::new(coordinator.with_reporter(reporter.clone())),
            reporter,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// 提交并等待批次完成
    ///
    /// 同一批次 ID 正在运行时返回 `Conflict`
    pub async fn submit(&self, request: BatchRequest) -> CoreResult<BatchResult> {
        let batch_id = request.batch_id.clone();
        let cancel = CancellationToken::new();

        match self.in_flight.entry(batch_id.clone()) {
            Entry::Occupied(_) => return Err(BatchError::Conflict { batch_id }),
            Entry::Vacant(slot) => {
                slot.insert(cancel.clone());
            }
        }
        let _guard = InFlightGuard {
            batch_id: batch_id.clone(),
            in_flight: self.in_flight.clone(),
        };

        self.coordinator.submit_with_cancel(request, cancel).await
    }

    /// 查询批次进度
    pub fn progress(&self, batch_id: &str) -> Option<ProgressSnapshot> {
        self.reporter.snapshot(batch_id)
    }

    /// 订阅批次进度事件（需在提交前或运行中订阅）
    pub fn subscribe(&self, batch_id: &str) -> ProgressSubscription {
        self.reporter.subscribe_batch(batch_id)
    }

    pub fn is_running(&self, batch_id: &str) -> bool {
        self.in_flight.contains_key(batch_id)
    }

    /// 取消正在运行的批次，返回该批次是否在运行
    pub fn cancel(&self, batch_id: &str) -> bool {
        match self.in_flight.get(batch_id) {
            Some(token) => {
                info!("[批次 {}] 🛑 收到取消请求", batch_id);
                token.cancel();
                true
            }
            None => {
                debug!("[批次 {}] 未在运行，忽略取消", batch_id);
                false
            }
        }
    }

    /// 取消所有正在运行的批次，返回取消的数量
    pub fn cancel_all(&self) -> usize {
        let mut count = 0;
        for entry in self.in_flight.iter() {
            entry.value().cancel();
            count += 1;
        }
        if count > 0 {
            info!("🛑 已取消 {} 个运行中的批次", count);
        }
        count
    }

    /// 读取单个输出文件
    pub async fn fetch_output(&self, batch_id: &str, filename: &str) -> CoreResult<Vec<u8>> {
        check_batch_id(batch_id)?;
        if !naming::is_safe_filename(filename) {
            return Err(BatchError::validation(format!("文件名不合法: {}", filename)));
        }

        let sink = self.coordinator.sink();
        let handle = sink.open(batch_id).await?;
        Ok(sink.read(&handle, filename).await?)
    }

    /// 读取批次压缩包
    pub async fn fetch_archive(&self, batch_id: &str) -> CoreResult<Vec<u8>> {
        check_batch_id(batch_id)?;

        let sink = self.coordinator.sink();
        let handle = sink.open(batch_id).await?;
        Ok(sink.read_archive(&handle).await?)
    }

    /// 列出批次已存储的输出
    pub async fn list_outputs(&self, batch_id: &str) -> CoreResult<Vec<StoredOutput>> {
        check_batch_id(batch_id)?;

        let sink = self.coordinator.sink();
        let handle = sink.open(batch_id).await?;
        Ok(sink.list(&handle).await?)
    }
}

fn check_batch_id(batch_id: &str) -> CoreResult<()> {
    if naming::is_valid_batch_id(batch_id) {
        Ok(())
    } else {
        Err(BatchError::validation(format!("批次 ID 不合法: {}", batch_id)))
    }
}
