//! 命名工具
//!
//! 负责批次 ID、任务 ID 和输出文件名的生成与校验

use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static UNSAFE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}_-]+").expect("静态正则"));

static BATCH_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,127}$").expect("静态正则"));

/// 文件名主干的最大字符数
const MAX_STEM_CHARS: usize = 64;

/// 把原始文件名转换为安全的主干（去掉扩展名和特殊字符）
pub fn sanitize_stem(original_name: &str) -> String {
    let stem = Path::new(original_name)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let cleaned = UNSAFE_CHARS.replace_all(&stem, "_");
    let cleaned: String = cleaned
        .trim_matches('_')
        .chars()
        .take(MAX_STEM_CHARS)
        .collect();

    if cleaned.is_empty() {
        "item".to_string()
    } else {
        cleaned
    }
}

/// 生成任务 ID：`<序号>_<主干>`，序号从 1 开始，补齐 3 位
pub fn item_id(index: usize, original_name: &str) -> String {
    format!("{:03}_{}", index + 1, sanitize_stem(original_name))
}

/// 输出文件名：`<批次ID>_<任务ID>.png`
pub fn output_filename(batch_id: &str, item_id: &str) -> String {
    format!("{}_{}.png", batch_id, item_id)
}

/// 生成新的批次 ID
pub fn generate_batch_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "batch_{}_{}",
        chrono::Local::now().format("%Y%m%d%H%M%S"),
        &suffix[..8]
    )
}

/// 批次 ID 只允许字母、数字、下划线和连字符
pub fn is_valid_batch_id(batch_id: &str) -> bool {
    BATCH_ID_PATTERN.is_match(batch_id)
}

/// 文件名不能包含路径分隔符，也不能是隐藏文件或 `..`
pub fn is_safe_filename(filename: &str) -> bool {
    !filename.is_empty()
        && !filename.starts_with('.')
        && !filename.contains('/')
        && !filename.contains('\\')
        && !filename.contains("..")
}
