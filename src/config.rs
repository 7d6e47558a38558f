use crate::models::Quality;

/// 程序配置文件
#[derive(Clone, Debug)]
pub struct Config {
    /// 批次输出根目录
    pub output_root: String,
    /// 任务 TOML 文件存放目录
    pub jobs_folder: String,
    /// 同时处理的批次数量
    pub max_concurrent_jobs: usize,
    /// 任务文件未指定时的单批次并发数
    pub default_concurrency: usize,
    /// 任务文件未指定时的画质
    pub default_quality: String,
    /// 是否显示详细日志
    pub verbose_logging: bool,
    /// 输出日志文件
    pub output_log_file: String,
    // --- 图片合成服务配置 ---
    pub image_api_key: String,
    pub image_api_base_url: String,
    pub image_model_name: String,
    pub request_timeout_secs: u64,
    /// 进度事件广播缓冲区大小
    pub progress_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_root: "output".to_string(),
            jobs_folder: "jobs".to_string(),
            max_concurrent_jobs: 1,
            default_concurrency: 3,
            default_quality: "2k".to_string(),
            verbose_logging: false,
            output_log_file: "output.txt".to_string(),
            image_api_key: String::new(),
            image_api_base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            image_model_name: "gemini-2.5-flash-image".to_string(),
            request_timeout_secs: 180,
            progress_capacity: 256,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            output_root: std::env::var("OUTPUT_ROOT").unwrap_or(default.output_root),
            jobs_folder: std::env::var("JOBS_FOLDER").unwrap_or(default.jobs_folder),
            max_concurrent_jobs: std::env::var("MAX_CONCURRENT_JOBS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.max_concurrent_jobs),
            default_concurrency: std::env::var("DEFAULT_CONCURRENCY").ok().and_then(|v| v.parse().ok()).unwrap_or(default.default_concurrency),
            default_quality: std::env::var("DEFAULT_QUALITY").unwrap_or(default.default_quality),
            verbose_logging: std::env::var("VERBOSE_LOGGING").ok().and_then(|v| v.parse().ok()).unwrap_or(default.verbose_logging),
            output_log_file: std::env::var("OUTPUT_LOG_FILE").unwrap_or(default.output_log_file),
            image_api_key: std::env::var("IMAGE_API_KEY").unwrap_or(default.image_api_key),
            image_api_base_url: std::env::var("IMAGE_API_BASE_URL").unwrap_or(default.image_api_base_url),
            image_model_name: std::env::var("IMAGE_MODEL_NAME").unwrap_or(default.image_model_name),
            request_timeout_secs: std::env::var("REQUEST_TIMEOUT_SECS").ok().and_then(|v| v.parse().ok()).unwrap_or(default.request_timeout_secs),
            progress_capacity: std::env::var("PROGRESS_CAPACITY").ok().and_then(|v| v.parse().ok()).unwrap_or(default.progress_capacity),
        }
    }

    /// 解析后的默认画质，无法识别时回落到 2K
    pub fn default_quality(&self) -> Quality {
        Quality::parse(Some(&self.default_quality))
    }
}
