//! 结果存储 - 业务能力层
//!
//! 负责一个批次的输出目录：准备、写入成功的输出、写清单、打包、查询。
//! 对执行器来说是只写的。
//!
//! ## 目录结构
//!
//! ```text
//! <root>/<batch_id>/outputs/<filename>   成功任务的输出
//! <root>/<batch_id>/manifest.json        批次清单（最后写入）
//! <root>/<batch_id>/<batch_id>.zip       outputs/ 的压缩包
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::SinkError;
use crate::infrastructure::archiver;
use crate::models::{ArchiveRef, OutputRef};
use crate::utils::naming;

const OUTPUTS_DIR: &str = "outputs";
const MANIFEST_FILE: &str = "manifest.json";

/// 一个批次输出区域的句柄
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkHandle {
    pub batch_id: String,
    pub location: PathBuf,
}

/// 已存储的输出
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredOutput {
    pub filename: String,
    pub output_ref: OutputRef,
    pub size_bytes: u64,
}

/// 结果存储能力
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// 创建空的输出区域；区域已存在且非空时返回冲突
    async fn prepare(&self, batch_id: &str) -> Result<SinkHandle, SinkError>;

    /// 打开已有的输出区域（只用于查询）
    async fn open(&self, batch_id: &str) -> Result<SinkHandle, SinkError>;

    /// 写入一个成功任务的输出；文件名在区域内必须唯一
    async fn store(&self, handle: &SinkHandle, filename: &str, bytes: Vec<u8>) -> Result<OutputRef, SinkError>;

    /// 写入批次清单
    async fn write_manifest(&self, handle: &SinkHandle, manifest: Vec<u8>) -> Result<(), SinkError>;

    /// 把所有已存储的输出打成一个压缩包
    async fn finalize(&self, handle: &SinkHandle) -> Result<ArchiveRef, SinkError>;

    /// 列出已存储的输出（按文件名排序）
    async fn list(&self, handle: &SinkHandle) -> Result<Vec<StoredOutput>, SinkError>;

    /// 读取一个已存储的输出
    async fn read(&self, handle: &SinkHandle, filename: &str) -> Result<Vec<u8>, SinkError>;

    /// 读取压缩包
    async fn read_archive(&self, handle: &SinkHandle) -> Result<Vec<u8>, SinkError>;
}

/// 基于本地文件系统的结果存储
#[derive(Debug, Clone)]
pub struct FsResultSink {
    root: PathBuf,
}

impl FsResultSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn area(&self, batch_id: &str) -> PathBuf {
        self.root.join(batch_id)
    }

    fn outputs_dir(handle: &SinkHandle) -> PathBuf {
        handle.location.join(OUTPUTS_DIR)
    }

    fn archive_name(handle: &SinkHandle) -> String {
        format!("{}.zip", handle.batch_id)
    }

    fn check_filename(filename: &str) -> Result<(), SinkError> {
        if naming::is_safe_filename(filename) {
            Ok(())
        } else {
            Err(SinkError::io(
                filename,
                std::io::Error::new(ErrorKind::InvalidInput, "文件名不合法"),
            ))
        }
    }
}

/// 先写入 `.part` 临时文件，再用硬链接发布到目标路径
///
/// 硬链接在目标已存在时失败而不是覆盖，所以同名的并发写入只有一个能成功，
/// 其余返回 `Conflict`。完成的写入要么完整可见，要么不存在
async fn write_atomically(target: &Path, bytes: &[u8]) -> Result<(), SinkError> {
    let file_name = target
        .file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .to_string();
    let temp = target.with_file_name(format!(".{}.part", file_name));

    let mut file = match fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(SinkError::Conflict { target: file_name });
        }
        Err(e) => return Err(SinkError::io(&temp, e)),
    };

    let published = async {
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::hard_link(&temp, target).await
    }
    .await;

    if let Err(e) = fs::remove_file(&temp).await {
        // 残留的隐藏文件不会出现在列表和压缩包里
        warn!("无法删除临时文件 {}: {}", temp.display(), e);
    }

    match published {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(SinkError::Conflict { target: file_name }),
        Err(e) => Err(SinkError::io(target, e)),
    }
}

/// 删除文件，文件不存在不算错误
async fn remove_if_exists(path: &Path) -> Result<(), SinkError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SinkError::io(path, e)),
    }
}

async fn is_non_empty_dir(path: &Path) -> Result<bool, SinkError> {
    match fs::read_dir(path).await {
        Ok(mut entries) => Ok(entries
            .next_entry()
            .await
            .map_err(|e| SinkError::io(path, e))?
            .is_some()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(SinkError::io(path, e)),
    }
}

fn map_not_found(path: &Path, target: &str, e: std::io::Error) -> SinkError {
    if e.kind() == ErrorKind::NotFound {
        SinkError::NotFound {
            target: target.to_string(),
        }
    } else {
        SinkError::io(path, e)
    }
}

#[async_trait]
impl ResultSink for FsResultSink {
    async fn prepare(&self, batch_id: &str) -> Result<SinkHandle, SinkError> {
        let area = self.area(batch_id);

        if is_non_empty_dir(&area).await? {
            return Err(SinkError::Conflict {
                target: batch_id.to_string(),
            });
        }

        let outputs = area.join(OUTPUTS_DIR);
        fs::create_dir_all(&outputs)
            .await
            .map_err(|e| SinkError::io(&outputs, e))?;

        debug!("输出目录已准备: {}", area.display());

        Ok(SinkHandle {
            batch_id: batch_id.to_string(),
            location: area,
        })
    }

    async fn open(&self, batch_id: &str) -> Result<SinkHandle, SinkError> {
        let area = self.area(batch_id);
        match fs::metadata(&area).await {
            Ok(meta) if meta.is_dir() => Ok(SinkHandle {
                batch_id: batch_id.to_string(),
                location: area,
            }),
            Ok(_) => Err(SinkError::NotFound {
                target: batch_id.to_string(),
            }),
            Err(e) => Err(map_not_found(&area, batch_id, e)),
        }
    }

    async fn store(&self, handle: &SinkHandle, filename: &str, bytes: Vec<u8>) -> Result<OutputRef, SinkError> {
        Self::check_filename(filename)?;

        let target = Self::outputs_dir(handle).join(filename);
        if fs::try_exists(&target)
            .await
            .map_err(|e| SinkError::io(&target, e))?
        {
            return Err(SinkError::Conflict {
                target: filename.to_string(),
            });
        }

        write_atomically(&target, &bytes).await?;
        debug!("[批次 {}] 已写入 {} ({} 字节)", handle.batch_id, filename, bytes.len());

        Ok(OutputRef(filename.to_string()))
    }

    async fn write_manifest(&self, handle: &SinkHandle, manifest: Vec<u8>) -> Result<(), SinkError> {
        let target = handle.location.join(MANIFEST_FILE);
        // 清单可以重写
        remove_if_exists(&target).await?;
        write_atomically(&target, &manifest).await
    }

    async fn finalize(&self, handle: &SinkHandle) -> Result<ArchiveRef, SinkError> {
        let bytes = archiver::archive(Self::outputs_dir(handle)).await?;
        let name = Self::archive_name(handle);
        let target = handle.location.join(&name);

        remove_if_exists(&target).await?;
        write_atomically(&target, &bytes).await?;

        Ok(ArchiveRef(name))
    }

    async fn list(&self, handle: &SinkHandle) -> Result<Vec<StoredOutput>, SinkError> {
        let dir = Self::outputs_dir(handle);
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| map_not_found(&dir, &handle.batch_id, e))?;

        let mut outputs = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| SinkError::io(&dir, e))? {
            let filename = entry.file_name().to_string_lossy().to_string();
            if filename.starts_with('.') {
                continue;
            }
            let meta = entry
                .metadata()
                .await
                .map_err(|e| SinkError::io(entry.path(), e))?;
            if !meta.is_file() {
                continue;
            }
            outputs.push(StoredOutput {
                output_ref: OutputRef(filename.clone()),
                filename,
                size_bytes: meta.len(),
            });
        }
        outputs.sort_by(|a, b| a.filename.cmp(&b.filename));

        Ok(outputs)
    }

    async fn read(&self, handle: &SinkHandle, filename: &str) -> Result<Vec<u8>, SinkError> {
        Self::check_filename(filename)?;
        let path = Self::outputs_dir(handle).join(filename);
        fs::read(&path)
            .await
            .map_err(|e| map_not_found(&path, filename, e))
    }

    async fn read_archive(&self, handle: &SinkHandle) -> Result<Vec<u8>, SinkError> {
        let name = Self::archive_name(handle);
        let path = handle.location.join(&name);
        fs::read(&path).await.map_err(|e| map_not_found(&path, &name, e))
    }
}
