use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{BatchError, CoreResult};
use crate::models::quality::Quality;
use crate::utils::naming;

/// 单个任务
///
/// 只保存每个任务不同的部分；背景图、提示词和画质属于整个批次
#[derive(Debug, Clone)]
pub struct WorkItem {
    /// 批次内唯一，由原始文件名派生
    pub id: String,
    pub object_payload: Arc<[u8]>,
    pub original_name: String,
}

impl WorkItem {
    /// 根据输入序号和原始文件名创建任务
    pub fn new(index: usize, original_name: impl Into<String>, payload: impl Into<Arc<[u8]>>) -> Self {
        let original_name = original_name.into();
        Self {
            id: naming::item_id(index, &original_name),
            object_payload: payload.into(),
            original_name,
        }
    }
}

/// 批次请求
///
/// 每次提交创建一次，之后只读
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub batch_id: String,
    pub background_payload: Arc<[u8]>,
    pub items: Vec<WorkItem>,
    pub prompt: String,
    pub quality: Quality,
    pub concurrency_limit: usize,
}

impl BatchRequest {
    /// 创建批次请求
    ///
    /// # 参数
    /// - `background`: 背景图字节
    /// - `objects`: `(原始文件名, 字节)` 列表，顺序即输出顺序
    /// - `prompt`: 提示词
    /// - `quality`: 画质
    /// - `concurrency_limit`: 最大并发数
    pub fn new(
        background: impl Into<Arc<[u8]>>,
        objects: Vec<(String, Vec<u8>)>,
        prompt: impl Into<String>,
        quality: Quality,
        concurrency_limit: usize,
    ) -> Self {
        let items = objects
            .into_iter()
            .enumerate()
            .map(|(index, (name, bytes))| WorkItem::new(index, name, bytes))
            .collect();

        Self {
            batch_id: naming::generate_batch_id(),
            background_payload: background.into(),
            items,
            prompt: prompt.into(),
            quality,
            concurrency_limit,
        }
    }

    /// 使用调用方指定的批次 ID
    pub fn with_batch_id(mut self, batch_id: impl Into<String>) -> Self {
        self.batch_id = batch_id.into();
        self
    }

    /// 结构校验，在任何工作开始前调用
    pub fn validate(&self) -> CoreResult<()> {
        if self.items.is_empty() {
            return Err(BatchError::validation("任务列表为空"));
        }
        if self.background_payload.is_empty() {
            return Err(BatchError::validation("缺少背景图"));
        }
        if self.concurrency_limit < 1 {
            return Err(BatchError::validation("并发数必须 >= 1"));
        }
        if !naming::is_valid_batch_id(&self.batch_id) {
            return Err(BatchError::validation(format!(
                "批次 ID 不合法: {:?}",
                self.batch_id
            )));
        }

        let mut seen = HashSet::with_capacity(self.items.len());
        for item in &self.items {
            if item.object_payload.is_empty() {
                return Err(BatchError::validation(format!(
                    "物体图片为空: {}",
                    item.original_name
                )));
            }
            if !seen.insert(item.id.as_str()) {
                return Err(BatchError::validation(format!("任务 ID 重复: {}", item.id)));
            }
        }

        Ok(())
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }
}
