use anyhow::Result;
/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use std::fs;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// 初始化全局日志
///
/// 优先使用 `RUST_LOG`，否则默认 info；`verbose` 为真时默认 debug。
/// 重复调用不会报错（测试中会多次初始化）
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\n批量合成日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// 记录程序启动信息
///
/// # 参数
/// - `max_concurrent_jobs`: 同时处理的批次数
/// - `output_root`: 输出根目录
pub fn log_startup(max_concurrent_jobs: usize, output_root: &str) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 批量图片合成模式");
    info!("📊 同时处理批次数: {}", max_concurrent_jobs);
    info!("📁 输出目录: {}", output_root);
    info!("{}", "=".repeat(60));
}

/// 记录任务文件加载信息
pub fn log_jobs_loaded(total_jobs: usize, total_items: usize) {
    info!("✓ 找到 {} 个待处理的任务文件，共 {} 张物体图片", total_jobs, total_items);
}

/// 打印最终统计信息
///
/// # 参数
/// - `stats`: 汇总统计
/// - `log_file_path`: 日志文件路径
pub fn print_final_stats(stats: &RunStats, log_file_path: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("📦 批次: 完成 {}/{}，出错 {}", stats.batches_ok, stats.batches, stats.batches_failed);
    info!("✅ 成功图片: {}/{}", stats.succeeded, stats.items);
    info!("❌ 失败图片: {}（其中取消 {}）", stats.failed, stats.cancelled);
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path);
}

/// 整次运行的汇总统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub batches: usize,
    pub batches_ok: usize,
    pub batches_failed: usize,
    pub items: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度（按字符计）
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
