//! 进度上报 - 业务能力层
//!
//! 基于 `tokio::sync::broadcast` 的进度事件总线，同时保存每个批次的最新快照供轮询。
//! 发布永远不会阻塞：没有订阅者时事件直接丢弃，慢订阅者会收到 `Lagged` 并跳过旧事件。

use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::models::ItemStatus;

/// 默认的广播缓冲区大小
const DEFAULT_CAPACITY: usize = 256;

/// 进度事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// 一个任务结束（成功或失败），按完成顺序发出
    ItemSettled {
        batch_id: String,
        processed: usize,
        total: usize,
        current_item_id: String,
        status: ItemStatus,
    },
    /// 整个批次结束
    BatchFinished {
        batch_id: String,
        succeeded: usize,
        failed: usize,
    },
}

impl ProgressEvent {
    pub fn batch_id(&self) -> &str {
        match self {
            ProgressEvent::ItemSettled { batch_id, .. } | ProgressEvent::BatchFinished { batch_id, .. } => {
                batch_id
            }
        }
    }
}

/// 某个批次的最新进度
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub processed: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub current_item_id: Option<String>,
    pub finished: bool,
}

/// 进度上报器
///
/// 可以廉价克隆，所有克隆共享同一条总线和快照表
#[derive(Clone)]
pub struct ProgressReporter {
    sender: broadcast::Sender<ProgressEvent>,
    snapshots: Arc<DashMap<String, ProgressSnapshot>>,
}

impl ProgressReporter {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            snapshots: Arc::new(DashMap::new()),
        }
    }

    /// 登记一个新批次
    pub fn begin(&self, batch_id: &str, total: usize) {
        self.snapshots.insert(
            batch_id.to_string(),
            ProgressSnapshot {
                total,
                ..Default::default()
            },
        );
    }

    /// 发布事件，尽力送达，不等待任何订阅者
    pub fn publish(&self, event: ProgressEvent) {
        self.apply(&event);
        // 发送失败只说明当前没有订阅者
        let _ = self.sender.send(event);
    }

    fn apply(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::ItemSettled {
                batch_id,
                processed,
                total,
                current_item_id,
                status,
            } => {
                let mut snapshot = self.snapshots.entry(batch_id.clone()).or_default();
                snapshot.processed = *processed;
                snapshot.total = *total;
                snapshot.current_item_id = Some(current_item_id.clone());
                if status.is_success() {
                    snapshot.succeeded += 1;
                } else {
                    snapshot.failed += 1;
                }
            }
            ProgressEvent::BatchFinished {
                batch_id,
                succeeded,
                failed,
            } => {
                let mut snapshot = self.snapshots.entry(batch_id.clone()).or_default();
                snapshot.succeeded = *succeeded;
                snapshot.failed = *failed;
                snapshot.processed = succeeded + failed;
                snapshot.finished = true;
            }
        }
    }

    /// 查询某个批次的最新进度
    pub fn snapshot(&self, batch_id: &str) -> Option<ProgressSnapshot> {
        self.snapshots.get(batch_id).map(|s| s.clone())
    }

    /// 订阅所有批次的事件
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    /// 只订阅某个批次的事件
    pub fn subscribe_batch(&self, batch_id: impl Into<String>) -> ProgressSubscription {
        ProgressSubscription {
            batch_id: batch_id.into(),
            receiver: self.sender.subscribe(),
            done: false,
        }
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// 单个批次的事件订阅
pub struct ProgressSubscription {
    batch_id: String,
    receiver: broadcast::Receiver<ProgressEvent>,
    done: bool,
}

impl ProgressSubscription {
    /// 等待下一个事件；批次结束或总线关闭后返回 `None`
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        if self.done {
            return None;
        }

        loop {
            match self.receiver.recv().await {
                Ok(event) if event.batch_id() == self.batch_id => {
                    if matches!(event, ProgressEvent::BatchFinished { .. }) {
                        self.done = true;
                    }
                    return Some(event);
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("[批次 {}] 进度订阅落后，跳过 {} 个事件", self.batch_id, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("[批次 {}] 进度总线已关闭", self.batch_id);
                    self.done = true;
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settled(batch_id: &str, processed: usize, status: ItemStatus) -> ProgressEvent {
        ProgressEvent::ItemSettled {
            batch_id: batch_id.to_string(),
            processed,
            total: 2,
            current_item_id: format!("00{}_x", processed),
            status,
        }
    }

    #[test]
    fn test_publish_without_subscribers_does_not_panic() {
        let reporter = ProgressReporter::default();
        reporter.publish(settled("b1", 1, ItemStatus::Success));
        assert_eq!(reporter.snapshot("b1").map(|s| s.processed), Some(1));
    }

    #[test]
    fn test_snapshot_tracks_counts() {
        let reporter = ProgressReporter::default();
        reporter.begin("b1", 2);
        reporter.publish(settled("b1", 1, ItemStatus::Success));
        reporter.publish(settled("b1", 2, ItemStatus::Failure));

        let snapshot = reporter.snapshot("b1").unwrap();
        assert_eq!(snapshot.processed, 2);
        assert_eq!(snapshot.succeeded, 1);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.current_item_id.as_deref(), Some("002_x"));
        assert!(!snapshot.finished);

        reporter.publish(ProgressEvent::BatchFinished {
            batch_id: "b1".to_string(),
            succeeded: 1,
            failed: 1,
        });
        assert!(reporter.snapshot("b1").unwrap().finished);
    }

    #[tokio::test]
    async fn test_subscription_filters_by_batch() {
        let reporter = ProgressReporter::default();
        let mut sub = reporter.subscribe_batch("b1");

        reporter.publish(settled("other", 1, ItemStatus::Success));
        reporter.publish(settled("b1", 1, ItemStatus::Success));
        reporter.publish(ProgressEvent::BatchFinished {
            batch_id: "b1".to_string(),
            succeeded: 1,
            failed: 0,
        });

        assert_eq!(sub.next().await, Some(settled("b1", 1, ItemStatus::Success)));
        assert!(matches!(sub.next().await, Some(ProgressEvent::BatchFinished { .. })));
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn test_lagged_subscriber_skips_ahead() {
        let reporter = ProgressReporter::new(2);
        let mut sub = reporter.subscribe_batch("b1");

        for i in 1..=5 {
            reporter.publish(settled("b1", i, ItemStatus::Success));
        }

        let first = sub.next().await.unwrap();
        assert!(matches!(first, ProgressEvent::ItemSettled { processed, .. } if processed >= 4));
    }
}
