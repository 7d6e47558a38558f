//! 批次执行器 - 编排层
//!
//! ## 职责
//!
//! 在并发上限内执行一组任务，每个任务得到且只得到一个 `ItemOutcome`。
//!
//! ## 执行模型
//!
//! 1. **按序准入**：按输入顺序申请 Semaphore 许可，拿到许可才 spawn，任何时刻最多 `limit` 个任务在执行
//! 2. **单任务流程**：合成 → 缩放/编码 → 持久化，任一步失败都只记为该任务失败
//! 3. **汇总**：所有 worker 通过 mpsc 把 `(序号, 结果)` 发给唯一的汇总方，由它计数、发进度事件并按序号归位
//! 4. **取消**：取消后不再准入新任务，已开始的任务自然结束，剩余任务记为 `Cancelled`
//!
//! 执行器本身没有超时，超时由外部合成能力自己负责

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::ItemError;
use crate::infrastructure::{ImageResizer, ResizedImage};
use crate::models::{Dimensions, ItemOutcome, OutputRef, WorkItem};
use crate::services::{ProgressEvent, ProgressReporter};

/// 单个任务的外部操作
///
/// 由调用方绑定批次共享的背景图、提示词、画质和输出区域
#[async_trait]
pub trait ItemOperation: Send + Sync {
    /// 调用外部合成服务
    async fn composite(&self, item: &WorkItem) -> Result<Vec<u8>, ItemError>;

    /// 保存缩放后的图片，返回输出引用
    async fn persist(&self, item: &WorkItem, image: ResizedImage) -> Result<OutputRef, ItemError>;
}

/// 批次执行器
pub struct BatchExecutor {
    resizer: Arc<dyn ImageResizer>,
    reporter: Option<ProgressReporter>,
}

impl BatchExecutor {
    pub fn new(resizer: Arc<dyn ImageResizer>) -> Self {
        Self {
            resizer,
            reporter: None,
        }
    }

    /// 附加进度上报器
    pub fn with_reporter(mut self, reporter: ProgressReporter) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// 执行所有任务
    ///
    /// # 参数
    /// - `batch_id`: 批次 ID（用于日志和进度事件）
    /// - `items`: 任务列表
    /// - `concurrency_limit`: 最大并发数
    /// - `target`: 缩放目标尺寸
    /// - `operation`: 绑定好的单任务操作
    /// - `cancel`: 取消信号
    ///
    /// # 返回
    /// 与 `items` 一一对应（按输入顺序）的结果列表
    pub async fn run(
        &self,
        batch_id: &str,
        items: &[WorkItem],
        concurrency_limit: usize,
        target: Dimensions,
        operation: Arc<dyn ItemOperation>,
        cancel: CancellationToken,
    ) -> Vec<ItemOutcome> {
        let total = items.len();
        // 许可数不超过任务数，也不超过 tokio 的上限
        let permits = concurrency_limit
            .min(total)
            .clamp(1, Semaphore::MAX_PERMITS);
        let semaphore = Arc::new(Semaphore::new(permits));
        let (tx, rx) = mpsc::unbounded_channel::<(usize, ItemOutcome)>();

        let admit = self.admit_all(batch_id, items, semaphore, target, operation, cancel, tx);
        let collect = self.collect(batch_id, total, rx);
        let ((), mut slots) = tokio::join!(admit, collect);

        items
            .iter()
            .zip(slots.iter_mut())
            .map(|(item, slot)| {
                slot.take().unwrap_or_else(|| {
                    error!("[批次 {}] 任务 {} 没有产生结果", batch_id, item.id);
                    ItemOutcome::failure(
                        item,
                        &ItemError::Internal {
                            message: "没有产生结果".to_string(),
                        },
                    )
                })
            })
            .collect()
    }

    /// 按输入顺序准入任务
    #[allow(clippy::too_many_arguments)]
    async fn admit_all(
        &self,
        batch_id: &str,
        items: &[WorkItem],
        semaphore: Arc<Semaphore>,
        target: Dimensions,
        operation: Arc<dyn ItemOperation>,
        cancel: CancellationToken,
        tx: mpsc::UnboundedSender<(usize, ItemOutcome)>,
    ) {
        let mut handles = Vec::with_capacity(items.len());

        for (index, item) in items.iter().enumerate() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            };

            let Some(permit) = permit else {
                warn!(
                    "[批次 {}] ⚠️ 批次已取消，剩余 {} 个任务不再执行",
                    batch_id,
                    items.len() - index
                );
                for (rest_index, rest) in items.iter().enumerate().skip(index) {
                    let _ = tx.send((rest_index, ItemOutcome::failure(rest, &ItemError::Cancelled)));
                }
                break;
            };

            let item_clone = item.clone();
            let operation = operation.clone();
            let resizer = self.resizer.clone();
            let tx = tx.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let outcome = process_item(&*operation, &*resizer, &item_clone, target).await;
                let _ = tx.send((index, outcome));
            });
            handles.push((index, handle));
        }

        // worker 异常退出时补发失败结果，保证每个任务都有结果
        for (index, handle) in handles {
            if let Err(e) = handle.await {
                error!("[批次 {}] 任务 {} 执行失败: {}", batch_id, items[index].id, e);
                let _ = tx.send((
                    index,
                    ItemOutcome::failure(
                        &items[index],
                        &ItemError::Internal {
                            message: e.to_string(),
                        },
                    ),
                ));
            }
        }
    }

    /// 唯一的汇总方：计数、发进度事件、按序号归位
    async fn collect(
        &self,
        batch_id: &str,
        total: usize,
        mut rx: mpsc::UnboundedReceiver<(usize, ItemOutcome)>,
    ) -> Vec<Option<ItemOutcome>> {
        let mut slots: Vec<Option<ItemOutcome>> = vec![None; total];
        let mut processed = 0;

        while let Some((index, outcome)) = rx.recv().await {
            if slots[index].is_some() {
                warn!("[批次 {}] 任务 {} 重复上报结果，已忽略", batch_id, outcome.item_id);
                continue;
            }

            processed += 1;
            log_item_settled(batch_id, processed, total, &outcome);

            if let Some(reporter) = &self.reporter {
                reporter.publish(ProgressEvent::ItemSettled {
                    batch_id: batch_id.to_string(),
                    processed,
                    total,
                    current_item_id: outcome.item_id.clone(),
                    status: outcome.status,
                });
            }

            slots[index] = Some(outcome);
        }

        slots
    }
}

/// 单个任务：合成 → 缩放/编码 → 持久化
async fn process_item(
    operation: &dyn ItemOperation,
    resizer: &dyn ImageResizer,
    item: &WorkItem,
    target: Dimensions,
) -> ItemOutcome {
    let result = async {
        let raw = operation.composite(item).await?;
        let resized = resizer.resize(raw, target).await?;
        let dimensions = resized.dimensions;
        let output_ref = operation.persist(item, resized).await?;
        Ok::<_, ItemError>((output_ref, dimensions))
    }
    .await;

    match result {
        Ok((output_ref, dimensions)) => ItemOutcome::success(item, output_ref, dimensions),
        Err(e) => ItemOutcome::failure(item, &e),
    }
}

// ========== 日志辅助函数 ==========

fn log_item_settled(batch_id: &str, processed: usize, total: usize, outcome: &ItemOutcome) {
    if outcome.is_success() {
        info!(
            "[批次 {}] [{}/{}] ✓ {} 完成 ({})",
            batch_id,
            processed,
            total,
            outcome.item_id,
            outcome.resolution.as_deref().unwrap_or("-")
        );
    } else {
        warn!(
            "[批次 {}] [{}/{}] ❌ {} 失败: {}",
            batch_id,
            processed,
            total,
            outcome.item_id,
            outcome.error.as_deref().unwrap_or("-")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EncodingError, ExternalError};
    use crate::models::ItemStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// 按名字决定成败，并记录最大并发数
    struct ScriptedOperation {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedOperation {
        fn new(delay_ms: u64) -> Self {
            Self {
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay: Duration::from_millis(delay_ms),
            }
        }
    }

    #[async_trait]
    impl ItemOperation for ScriptedOperation {
        async fn composite(&self, item: &WorkItem) -> Result<Vec<u8>, ItemError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            if item.original_name.starts_with("fail") {
                Err(ExternalError::new("scripted failure").into())
            } else {
                Ok(item.original_name.as_bytes().to_vec())
            }
        }

        async fn persist(&self, item: &WorkItem, _image: ResizedImage) -> Result<OutputRef, ItemError> {
            Ok(OutputRef(format!("{}.png", item.id)))
        }
    }

    struct PassThroughResizer;

    #[async_trait]
    impl ImageResizer for PassThroughResizer {
        async fn resize(&self, image: Vec<u8>, target: Dimensions) -> Result<ResizedImage, EncodingError> {
            if image.starts_with(b"bad") {
                return Err(EncodingError::new("cannot decode"));
            }
            Ok(ResizedImage {
                bytes: image,
                dimensions: target,
            })
        }
    }

    fn items(names: &[&str]) -> Vec<WorkItem> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| WorkItem::new(i, *n, vec![1u8]))
            .collect()
    }

    fn executor() -> BatchExecutor {
        BatchExecutor::new(Arc::new(PassThroughResizer))
    }

    #[tokio::test]
    async fn test_outcomes_are_index_aligned() {
        let items = items(&["a.png", "fail_b.png", "c.png", "bad_d.png"]);
        let outcomes = executor()
            .run(
                "b1",
                &items,
                4,
                Dimensions::new(8, 8),
                Arc::new(ScriptedOperation::new(5)),
                CancellationToken::new(),
            )
            .await;

        assert_eq!(outcomes.len(), 4);
        for (item, outcome) in items.iter().zip(&outcomes) {
            assert_eq!(item.id, outcome.item_id);
        }
        assert_eq!(outcomes[0].status, ItemStatus::Success);
        assert_eq!(outcomes[1].status, ItemStatus::Failure);
        assert_eq!(outcomes[2].status, ItemStatus::Success);
        assert_eq!(outcomes[3].status, ItemStatus::Failure);
        assert!(outcomes[3].error.as_deref().unwrap_or_default().contains("cannot decode"));
        assert_eq!(outcomes[0].resolution.as_deref(), Some("8x8"));
    }

    #[tokio::test]
    async fn test_concurrency_cap_is_respected() {
        let names: Vec<String> = (0..10).map(|i| format!("{}.png", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        let items = items(&refs);
        let operation = Arc::new(ScriptedOperation::new(10));

        let outcomes = executor()
            .run("b1", &items, 3, Dimensions::new(8, 8), operation.clone(), CancellationToken::new())
            .await;

        assert_eq!(outcomes.len(), 10);
        assert!(operation.peak.load(Ordering::SeqCst) <= 3);
        assert!(operation.peak.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_huge_concurrency_limit_is_clamped() {
        let items = items(&["a.png", "b.png", "c.png"]);
        let operation = Arc::new(ScriptedOperation::new(5));

        let outcomes = executor()
            .run(
                "b1",
                &items,
                usize::MAX,
                Dimensions::new(8, 8),
                operation.clone(),
                CancellationToken::new(),
            )
            .await;

        assert!(outcomes.iter().all(|o| o.status == ItemStatus::Success));
        assert!(operation.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_progress_events_per_item() {
        let reporter = ProgressReporter::default();
        let mut rx = reporter.subscribe();
        let items = items(&["a.png", "fail.png", "c.png"]);

        executor()
            .with_reporter(reporter.clone())
            .run(
                "b1",
                &items,
                2,
                Dimensions::new(8, 8),
                Arc::new(ScriptedOperation::new(1)),
                CancellationToken::new(),
            )
            .await;

        let mut processed = Vec::new();
        while let Ok(ProgressEvent::ItemSettled { processed: n, total, .. }) = rx.try_recv() {
            assert_eq!(total, 3);
            processed.push(n);
        }
        assert_eq!(processed, vec![1, 2, 3]);
        assert_eq!(reporter.snapshot("b1").map(|s| s.failed), Some(1));
    }

    #[tokio::test]
    async fn test_cancel_before_start_marks_everything_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let items = items(&["a.png", "b.png"]);
        let operation = Arc::new(ScriptedOperation::new(1));

        let outcomes = executor()
            .run("b1", &items, 1, Dimensions::new(8, 8), operation.clone(), cancel)
            .await;

        assert!(outcomes.iter().all(|o| o.status == ItemStatus::Cancelled));
        assert_eq!(operation.peak.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_batch_drains_in_flight() {
        let cancel = CancellationToken::new();
        let items = items(&["a.png", "b.png", "c.png", "d.png"]);
        let operation = Arc::new(ScriptedOperation::new(50));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcomes = executor()
            .run("b1", &items, 1, Dimensions::new(8, 8), operation, cancel)
            .await;

        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes[0].status, ItemStatus::Success);
        assert!(outcomes[1..].iter().all(|o| o.status == ItemStatus::Cancelled));
    }
}
