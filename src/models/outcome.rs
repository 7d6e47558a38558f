//! 任务结果与批次结果

use serde::{Deserialize, Serialize};

use crate::error::ItemError;
use crate::models::batch::WorkItem;
use crate::models::quality::Dimensions;

/// 已存储输出的引用（批次目录内的文件名）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputRef(pub String);

/// 压缩包引用（批次目录内的文件名）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArchiveRef(pub String);

impl OutputRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ArchiveRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// 任务状态
///
/// `Cancelled` 在统计上算作失败
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Success,
    Failure,
    Cancelled,
}

impl ItemStatus {
    pub fn is_success(self) -> bool {
        matches!(self, ItemStatus::Success)
    }
}

/// 失败原因分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    External,
    Encoding,
    Conflict,
    Storage,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn of(error: &ItemError) -> Self {
        match error {
            ItemError::External(_) => ErrorKind::External,
            ItemError::Encoding(_) => ErrorKind::Encoding,
            ItemError::Conflict { .. } => ErrorKind::Conflict,
            ItemError::Storage { .. } => ErrorKind::Storage,
            ItemError::Cancelled => ErrorKind::Cancelled,
            ItemError::Internal { .. } => ErrorKind::Internal,
        }
    }
}

/// 单个任务的最终结果，由执行器在任务结束时创建一次
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub item_id: String,
    pub original_name: String,
    pub status: ItemStatus,
    /// 仅成功时存在
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<OutputRef>,
    /// 仅失败时存在
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// 仅失败时存在
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// 仅成功时存在，格式 `WxH`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
}

impl ItemOutcome {
    pub fn success(item: &WorkItem, output_ref: OutputRef, resolution: Dimensions) -> Self {
        Self {
            item_id: item.id.clone(),
            original_name: item.original_name.clone(),
            status: ItemStatus::Success,
            output_ref: Some(output_ref),
            error: None,
            error_kind: None,
            resolution: Some(resolution.to_string()),
        }
    }

    pub fn failure(item: &WorkItem, error: &ItemError) -> Self {
        let status = match error {
            ItemError::Cancelled => ItemStatus::Cancelled,
            _ => ItemStatus::Failure,
        };
        Self {
            item_id: item.id.clone(),
            original_name: item.original_name.clone(),
            status,
            output_ref: None,
            error: Some(error.to_string()),
            error_kind: Some(ErrorKind::of(error)),
            resolution: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// 批次结果（同时也是写入 manifest.json 的清单）
///
/// 不变量：`succeeded + failed == total == outcomes.len()`，
/// `archive_ref` 仅在 `succeeded >= 1` 且打包成功时存在
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    pub batch_id: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// 其中被取消的数量（已计入 `failed`）
    pub cancelled: usize,
    pub outcomes: Vec<ItemOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_ref: Option<ArchiveRef>,
    /// 打包失败原因（批次级警告）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_error: Option<String>,
}

impl BatchResult {
    /// 根据按输入顺序排列的任务结果汇总
    pub fn assemble(
        batch_id: impl Into<String>,
        outcomes: Vec<ItemOutcome>,
        archive_ref: Option<ArchiveRef>,
        archive_error: Option<String>,
    ) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        let cancelled = outcomes
            .iter()
            .filter(|o| o.status == ItemStatus::Cancelled)
            .count();
        let total = outcomes.len();

        Self {
            batch_id: batch_id.into(),
            total,
            succeeded,
            failed: total - succeeded,
            cancelled,
            outcomes,
            archive_ref,
            archive_error,
        }
    }
}
