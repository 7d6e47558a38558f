use crate::models::batch::BatchRequest;
use crate::models::quality::Quality;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::fs;

/// 可作为物体图片的扩展名
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// 任务文件（TOML）
#[derive(Debug, Clone, Deserialize)]
pub struct JobSpec {
    #[serde(default)]
    pub batch_id: Option<String>,
    pub background: PathBuf,
    #[serde(default)]
    pub objects: Vec<PathBuf>,
    #[serde(default)]
    pub objects_dir: Option<PathBuf>,
    pub prompt: String,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(skip)]
    pub file_path: Option<PathBuf>,
}

impl JobSpec {
    /// 任务文件所在目录，相对路径以此为基准
    fn base_dir(&self) -> PathBuf {
        self.file_path
            .as_deref()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir().join(path)
        }
    }

    /// 展开物体图片列表：先是显式列出的文件，再是目录中的图片（按文件名排序）
    pub async fn object_paths(&self) -> Result<Vec<PathBuf>> {
        let mut paths: Vec<PathBuf> = self.objects.iter().map(|p| self.resolve(p)).collect();

        if let Some(dir) = &self.objects_dir {
            let dir = self.resolve(dir);
            let mut found = Vec::new();
            let mut entries = fs::read_dir(&dir)
                .await
                .with_context(|| format!("无法读取物体目录: {}", dir.display()))?;

            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if is_image_file(&path) {
                    found.push(path);
                }
            }
            found.sort();
            paths.extend(found);
        }

        Ok(paths)
    }

    /// 从磁盘读取图片并构建批次请求
    ///
    /// 缺省的画质和并发数使用传入的默认值
    pub async fn into_request(
        self,
        default_quality: Quality,
        default_concurrency: usize,
    ) -> Result<BatchRequest> {
        let background_path = self.resolve(&self.background);
        let background = fs::read(&background_path)
            .await
            .with_context(|| format!("无法读取背景图: {}", background_path.display()))?;

        let mut objects = Vec::new();
        for path in self.object_paths().await? {
            let bytes = fs::read(&path)
                .await
                .with_context(|| format!("无法读取物体图片: {}", path.display()))?;
            let name = path
                .file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .to_string();
            objects.push((name, bytes));
        }

        let quality = match self.quality.as_deref() {
            Some(q) => Quality::parse(Some(q)),
            None => default_quality,
        };

        let request = BatchRequest::new(
            background,
            objects,
            self.prompt,
            quality,
            self.concurrency.unwrap_or(default_concurrency),
        );

        Ok(match self.batch_id {
            Some(batch_id) => request.with_batch_id(batch_id),
            None => request,
        })
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// 从 TOML 文件加载任务
pub async fn load_job_file(job_file_path: &Path) -> Result<JobSpec> {
    let content = fs::read_to_string(job_file_path)
        .await
        .with_context(|| format!("无法读取任务文件: {}", job_file_path.display()))?;

    let mut job: JobSpec = toml::from_str(&content)
        .with_context(|| format!("无法解析任务文件: {}", job_file_path.display()))?;

    job.file_path = Some(job_file_path.to_path_buf());

    Ok(job)
}

/// 从文件夹中加载所有任务文件（按文件名排序），无法解析的文件会被跳过
pub async fn load_all_jobs(folder_path: &str) -> Result<Vec<JobSpec>> {
    let folder = PathBuf::from(folder_path);

    if !folder.exists() {
        anyhow::bail!("文件夹不存在: {}", folder_path);
    }

    let mut job_files = Vec::new();
    let mut entries = fs::read_dir(&folder)
        .await
        .with_context(|| format!("无法读取文件夹: {}", folder_path))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            job_files.push(path);
        }
    }
    job_files.sort();

    let mut jobs = Vec::new();
    for path in job_files {
        tracing::info!(
            "正在加载: {}",
            path.file_name().unwrap_or_default().to_string_lossy()
        );

        match load_job_file(&path).await {
            Ok(job) => jobs.push(job),
            Err(e) => {
                tracing::warn!("加载任务文件失败 {}: {:#}", path.display(), e);
            }
        }
    }

    Ok(jobs)
}
