//! 批次协调器 - 编排层
//!
//! ## 职责
//!
//! 1. **校验**：请求不合法时直接返回 `Validation`，不触碰存储和执行器
//! 2. **准备**：让 ResultSink 创建以批次 ID 命名的输出区域
//! 3. **执行**：把绑定了背景图、提示词、画质和输出区域的操作交给 BatchExecutor
//! 4. **收尾**：至少一个成功时打包；写清单；汇总 BatchResult
//!
//! 单个任务的失败永远不会变成错误返回，只有准备阶段的错误和输出区域完全不可写会

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{BatchError, CoreResult, ItemError};
use crate::infrastructure::{Compositor, ImageResizer, ResizedImage};
use crate::models::{
    BatchRequest, BatchResult, ErrorKind, ItemOutcome, ItemStatus, OutputRef, Quality, WorkItem,
};
use crate::orchestrator::batch_executor::{BatchExecutor, ItemOperation};
use crate::services::{ProgressEvent, ProgressReporter, ResultSink, SinkHandle};
use crate::utils::naming;

/// 绑定了批次共享数据的单任务操作
struct BoundOperation {
    compositor: Arc<dyn Compositor>,
    sink: Arc<dyn ResultSink>,
    handle: SinkHandle,
    background: Arc<[u8]>,
    prompt: Arc<str>,
    quality: Quality,
}

#[async_trait]
impl ItemOperation for BoundOperation {
    async fn composite(&self, item: &WorkItem) -> Result<Vec<u8>, ItemError> {
        self.compositor
            .composite(&item.object_payload, &self.background, &self.prompt, self.quality)
            .await
            .map_err(ItemError::from)
    }

    async fn persist(&self, item: &WorkItem, image: ResizedImage) -> Result<OutputRef, ItemError> {
        let filename = naming::output_filename(&self.handle.batch_id, &item.id);
        self.sink
            .store(&self.handle, &filename, image.bytes)
            .await
            .map_err(ItemError::from)
    }
}

/// 批次协调器
pub struct BatchCoordinator {
    compositor: Arc<dyn Compositor>,
    sink: Arc<dyn ResultSink>,
    executor: BatchExecutor,
    reporter: Option<ProgressReporter>,
}

impl BatchCoordinator {
    pub fn new(
        compositor: Arc<dyn Compositor>,
        resizer: Arc<dyn ImageResizer>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            compositor,
            sink,
            executor: BatchExecutor::new(resizer),
            reporter: None,
        }
    }

    /// 附加进度上报器（执行器共用同一个）
    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.executor = self.executor.with_reporter(reporter.clone());
        self.reporter = Some(reporter);
        self
    }

    pub fn sink(&self) -> &Arc<dyn ResultSink> {
        &self.sink
    }

    /// 提交批次（不可取消）
    pub async fn submit(&self, request: BatchRequest) -> CoreResult<BatchResult> {
        self.submit_with_cancel(request, CancellationToken::new()).await
    }

    /// 提交批次
    ///
    /// # 返回
    /// - `Err(Validation)`: 请求不合法，没有任何工作被执行
    /// - `Err(Conflict)`: 输出区域已存在且非空
    /// - `Err(Storage)`: 输出区域完全不可写
    /// - `Ok(BatchResult)`: 其余所有情况，包括全部任务失败
    pub async fn submit_with_cancel(
        &self,
        request: BatchRequest,
        cancel: CancellationToken,
    ) -> CoreResult<BatchResult> {
        request.validate()?;

        let handle = self.sink.prepare(&request.batch_id).await?;
        let batch_id = request.batch_id.clone();
        let total = request.total();

        log_batch_start(&request);
        if let Some(reporter) = &self.reporter {
            reporter.begin(&batch_id, total);
        }

        let operation = Arc::new(BoundOperation {
            compositor: self.compositor.clone(),
            sink: self.sink.clone(),
            handle: handle.clone(),
            background: request.background_payload.clone(),
            prompt: Arc::from(request.prompt.as_str()),
            quality: request.quality,
        });

        let outcomes = self
            .executor
            .run(
                &batch_id,
                &request.items,
                request.concurrency_limit,
                request.quality.dimensions(),
                operation,
                cancel,
            )
            .await;

        if let Some(message) = total_storage_failure(&outcomes) {
            self.publish_finished(&batch_id, 0, total);
            return Err(BatchError::Storage {
                path: handle.location.clone(),
                source: std::io::Error::other(message),
            });
        }

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        let (archive_ref, archive_error) = if succeeded >= 1 {
            match self.sink.finalize(&handle).await {
                Ok(archive_ref) => {
                    info!("[批次 {}] 📦 已打包: {}", batch_id, archive_ref.as_str());
                    (Some(archive_ref), None)
                }
                Err(e) => {
                    warn!("[批次 {}] ⚠️ 打包失败: {}", batch_id, e);
                    (None, Some(e.to_string()))
                }
            }
        } else {
            warn!("[批次 {}] ⚠️ 没有成功的任务，跳过打包", batch_id);
            (None, None)
        };

        let result = BatchResult::assemble(batch_id.clone(), outcomes, archive_ref, archive_error);

        let manifest = serde_json::to_vec_pretty(&result)?;
        self.sink.write_manifest(&handle, manifest).await?;

        self.publish_finished(&batch_id, result.succeeded, result.failed);
        log_batch_complete(&result);

        Ok(result)
    }

    fn publish_finished(&self, batch_id: &str, succeeded: usize, failed: usize) {
        if let Some(reporter) = &self.reporter {
            reporter.publish(ProgressEvent::BatchFinished {
                batch_id: batch_id.to_string(),
                succeeded,
                failed,
            });
        }
    }
}

/// 所有实际执行过的任务都因为写入失败而失败时，视为输出区域不可写
fn total_storage_failure(outcomes: &[ItemOutcome]) -> Option<String> {
    let attempted: Vec<&ItemOutcome> = outcomes
        .iter()
        .filter(|o| o.status != ItemStatus::Cancelled)
        .collect();

    if attempted.is_empty() {
        return None;
    }

    let all_storage = attempted
        .iter()
        .all(|o| o.error_kind == Some(ErrorKind::Storage));

    if all_storage {
        attempted.first().and_then(|o| o.error.clone())
    } else {
        None
    }
}

// ========== 日志辅助函数 ==========

fn log_batch_start(request: &BatchRequest) {
    info!("{}", "=".repeat(60));
    info!("[批次 {}] 🚀 开始处理", request.batch_id);
    info!(
        "[批次 {}] 任务数: {}，并发数: {}，画质: {}",
        request.batch_id,
        request.total(),
        request.concurrency_limit,
        request.quality
    );
    info!("{}", "=".repeat(60));
}

fn log_batch_complete(result: &BatchResult) {
    info!("\n{}", "─".repeat(60));
    info!(
        "[批次 {}] ✓ 完成: 成功 {}/{}，失败 {}（其中取消 {}）",
        result.batch_id, result.succeeded, result.total, result.failed, result.cancelled
    );
    info!("{}", "─".repeat(60));
}
