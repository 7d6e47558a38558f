//! 错误类型
//!
//! 按照影响范围分为两类：
//! - `BatchError`：批次级错误，只在执行开始前（校验、准备输出目录）或写入失败时抛出
//! - `ItemError`：单个任务的错误，永远不会向上传播，而是被转换为 `ItemOutcome`

use std::path::PathBuf;
use thiserror::Error;

/// 批次级错误
#[derive(Debug, Error)]
pub enum BatchError {
    /// 请求结构不合法（空任务列表、缺少背景图、并发数 < 1 等）
    #[error("请求校验失败: {reason}")]
    Validation { reason: String },

    /// 批次输出目录已存在且非空，或同一批次 ID 正在运行
    #[error("批次 {batch_id} 已存在")]
    Conflict { batch_id: String },

    /// 无法写入输出目录
    #[error("写入输出目录失败 ({}): {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 清单序列化失败
    #[error("清单序列化失败: {0}")]
    Manifest(#[from] serde_json::Error),

    /// 批次或文件不存在
    #[error("未找到: {what}")]
    NotFound { what: String },
}

/// 单个任务的错误
///
/// 所有变体都只会记录在对应任务的 `ItemOutcome` 中
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ItemError {
    /// 外部合成服务失败或没有返回可用图片
    #[error("合成失败: {0}")]
    External(#[from] ExternalError),

    /// 合成成功后缩放/编码失败
    #[error("编码失败: {0}")]
    Encoding(#[from] EncodingError),

    /// 输出文件名冲突
    #[error("文件名冲突: {filename}")]
    Conflict { filename: String },

    /// 写入输出文件失败
    #[error("写入失败: {message}")]
    Storage { message: String },

    /// 批次被取消，任务未开始执行
    #[error("批次已取消，任务未执行")]
    Cancelled,

    /// 任务异常退出（panic 等）
    #[error("任务异常退出: {message}")]
    Internal { message: String },
}

/// 外部合成服务错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ExternalError {
    pub message: String,
}

/// 缩放/编码错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct EncodingError {
    pub message: String,
}

/// 打包错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct ArchiveError {
    pub message: String,
}

/// 结果存储错误
#[derive(Debug, Error)]
pub enum SinkError {
    /// 目录非空或文件名重复
    #[error("存储冲突: {target}")]
    Conflict { target: String },

    /// 文件系统错误
    #[error("文件操作失败 ({}): {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 打包失败
    #[error("打包失败: {0}")]
    Archive(#[from] ArchiveError),

    /// 目标不存在
    #[error("不存在: {target}")]
    NotFound { target: String },
}

// ========== 错误类型转换 ==========

impl From<SinkError> for ItemError {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::Conflict { target } => ItemError::Conflict { filename: target },
            other => ItemError::Storage {
                message: other.to_string(),
            },
        }
    }
}

impl From<SinkError> for BatchError {
    fn from(err: SinkError) -> Self {
        match err {
            SinkError::Conflict { target } => BatchError::Conflict { batch_id: target },
            SinkError::Io { path, source } => BatchError::Storage { path, source },
            SinkError::NotFound { target } => BatchError::NotFound { what: target },
            SinkError::Archive(e) => BatchError::Storage {
                path: PathBuf::new(),
                source: std::io::Error::other(e.message),
            },
        }
    }
}

// ========== 便捷构造函数 ==========

impl BatchError {
    /// 创建校验错误
    pub fn validation(reason: impl Into<String>) -> Self {
        BatchError::Validation {
            reason: reason.into(),
        }
    }
}

impl ExternalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl EncodingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl ArchiveError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl SinkError {
    /// 包装 IO 错误并附带路径
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        SinkError::Io {
            path: path.into(),
            source,
        }
    }
}

// ========== Result 类型别名 ==========

/// 批次级结果类型
pub type CoreResult<T> = Result<T, BatchError>;
