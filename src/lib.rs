//! # Batch Composite
//!
//! 把一组物体图片批量合成到同一张背景图上的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 持有外部能力，不认识批次和任务
//! - `GeminiCompositor` - 远程图片合成能力
//! - `ImageCrateResizer` - 缩放与 PNG 编码能力
//! - `archiver` - 确定性的 zip 打包能力
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `FsResultSink` - 批次输出区域（写文件、写清单、打包、读取）
//! - `ProgressReporter` - 进度事件总线与快照
//!
//! ### ③ 编排层（Orchestration）
//! - `orchestrator/batch_executor` - 并发上限内执行任务，汇总结果
//! - `orchestrator/batch_coordinator` - 校验、准备、执行、收尾
//! - `orchestrator/batch_service` - 运行登记、取消、进度、读取输出
//!
//! ### ④ 应用层（App）
//! - `app` - 加载任务文件，控制批次并发，Ctrl-C 取消，输出统计
//!
//! ## 模块结构

pub mod app;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;

// 重新导出常用类型
pub use app::App;
pub use config::Config;
pub use error::{BatchError, CoreResult, ItemError};
pub use infrastructure::{Compositor, GeminiCompositor, ImageCrateResizer, ImageResizer};
pub use models::{BatchRequest, BatchResult, ItemOutcome, ItemStatus, Quality, WorkItem};
pub use orchestrator::{BatchCoordinator, BatchService};
pub use services::{FsResultSink, ProgressEvent, ProgressReporter, ResultSink};
