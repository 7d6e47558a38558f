//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责单个批次的并发执行和收尾，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_executor` - 批次执行器
//! - 按输入顺序准入任务，Semaphore 控制并发上限
//! - 单任务流程：合成 → 缩放/编码 → 持久化
//! - 唯一汇总方负责计数和进度事件
//! - 响应取消信号
//!
//! ### `batch_coordinator` - 批次协调器
//! - 校验请求、准备输出区域
//! - 绑定单任务操作交给执行器
//! - 打包、写清单、汇总 BatchResult
//!
//! ### `batch_service` - 批次服务
//! - 防止同一批次 ID 并发运行
//! - 取消、进度查询、读取输出
//!
//! ## 层次关系
//!
//! ```text
//! app (处理 Vec<JobSpec>)
//!     ↓
//! batch_service (处理单个 BatchRequest)
//!     ↓
//! batch_coordinator → batch_executor (处理 Vec<WorkItem>)
//!     ↓
//! services (能力层：result_sink / progress)
//!     ↓
//! infrastructure (基础设施：compositor / image_resizer / archiver)
//! ```

pub mod batch_coordinator;
pub mod batch_executor;
pub mod batch_service;

// 重新导出主要类型
pub use batch_coordinator::BatchCoordinator;
pub use batch_executor::{BatchExecutor, ItemOperation};
pub use batch_service::BatchService;
