//! 目录打包 - 基础设施层
//!
//! 把一个目录下的所有普通文件（不含隐藏文件）打成 zip。条目按文件名排序，修改时间固定为 DOS 纪元
//! (1980-01-01 00:00:00)，权限固定为 0644，因此相同的输入文件得到字节完全相同的压缩包

use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::error::ArchiveError;

/// 异步打包，实际工作在阻塞线程池中执行
pub async fn archive(source_dir: PathBuf) -> Result<Vec<u8>, ArchiveError> {
    tokio::task::spawn_blocking(move || archive_dir(&source_dir))
        .await
        .map_err(|e| ArchiveError::new(format!("打包任务异常退出: {}", e)))?
}

/// 同步打包目录
pub fn archive_dir(source_dir: &Path) -> Result<Vec<u8>, ArchiveError> {
    let mut files = Vec::new();
    let entries = std::fs::read_dir(source_dir)
        .map_err(|e| ArchiveError::new(format!("无法读取目录 {}: {}", source_dir.display(), e)))?;

    for entry in entries {
        let entry = entry.map_err(|e| ArchiveError::new(e.to_string()))?;
        let path = entry.path();
        // 跳过写入中的临时文件
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for path in &files {
        let name = path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .to_string();
        let contents = std::fs::read(path)
            .map_err(|e| ArchiveError::new(format!("无法读取文件 {}: {}", path.display(), e)))?;

        zip.start_file(name.as_str(), options)
            .map_err(|e| ArchiveError::new(format!("写入条目 {} 失败: {}", name, e)))?;
        zip.write_all(&contents)
            .map_err(|e| ArchiveError::new(format!("写入条目 {} 失败: {}", name, e)))?;
    }

    let cursor = zip
        .finish()
        .map_err(|e| ArchiveError::new(format!("完成压缩包失败: {}", e)))?;

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn test_archive_contains_every_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.png"), b"bbb").unwrap();
        std::fs::write(dir.path().join("a.png"), b"aa").unwrap();

        let bytes = archive_dir(dir.path()).unwrap();
        let mut zip = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(zip.len(), 2);
        assert_eq!(zip.by_index(0).unwrap().name(), "a.png");

        let mut contents = Vec::new();
        zip.by_name("b.png").unwrap().read_to_end(&mut contents).unwrap();
        assert_eq!(contents, b"bbb");
    }

    #[test]
    fn test_archive_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("x.png"), b"xyz").unwrap();

        let first = archive_dir(dir.path()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let second = archive_dir(dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_missing_dir_is_error() {
        assert!(archive_dir(Path::new("/no/such/dir")).is_err());
    }
}
