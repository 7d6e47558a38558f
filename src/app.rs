use crate::config::Config;
use crate::infrastructure::{GeminiCompositor, ImageCrateResizer};
use crate::models::{load_all_jobs, BatchRequest, BatchResult, JobSpec};
use crate::orchestrator::{BatchCoordinator, BatchService};
use crate::services::{FsResultSink, ProgressReporter};
use crate::utils::logging::{self, RunStats};
use anyhow::Result;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 应用主结构
pub struct App {
    config: Config,
    service: Arc<BatchService>,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        // 初始化日志文件
        logging::init_log_file(&config.output_log_file)?;

        logging::log_startup(config.max_concurrent_jobs, &config.output_root);

        let compositor = Arc::new(GeminiCompositor::new(&config)?);
        let resizer = Arc::new(ImageCrateResizer);
        let sink = Arc::new(FsResultSink::new(&config.output_root));
        let reporter = ProgressReporter::new(config.progress_capacity);

        let coordinator = BatchCoordinator::new(compositor, resizer, sink);
        let service = Arc::new(BatchService::new(coordinator, reporter));

        Ok(Self { config, service })
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<RunStats> {
        // 加载所有任务文件
        let jobs = load_jobs(&self.config).await?;

        if jobs.is_empty() {
            warn!("⚠️ 没有找到待处理的任务文件，程序结束");
            return Ok(RunStats::default());
        }

        let mut stats = RunStats {
            batches: jobs.len(),
            ..Default::default()
        };
        let requests = build_requests(jobs, &self.config, &mut stats).await;
        logging::log_jobs_loaded(stats.batches, stats.items);

        // Ctrl-C 取消所有运行中的批次，并停止启动新批次
        let shutdown = CancellationToken::new();
        let service = self.service.clone();
        let signal = shutdown.clone();
        let ctrl_c = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("⚠️ 收到 Ctrl-C，正在取消所有批次…");
                signal.cancel();
                service.cancel_all();
            }
        });

        process_all_jobs(
            &self.service,
            requests,
            self.config.max_concurrent_jobs,
            &shutdown,
            &mut stats,
        )
        .await;
        ctrl_c.abort();

        // 输出最终统计
        logging::print_final_stats(&stats, &self.config.output_log_file);

        Ok(stats)
    }
}

/// 加载任务文件
async fn load_jobs(config: &Config) -> Result<Vec<JobSpec>> {
    info!("\n📁 正在扫描待处理的任务文件...");
    load_all_jobs(&config.jobs_folder).await
}

/// 读取图片并构建请求，读取失败的任务记为出错批次
async fn build_requests(jobs: Vec<JobSpec>, config: &Config, stats: &mut RunStats) -> Vec<BatchRequest> {
    let mut requests = Vec::with_capacity(jobs.len());

    for job in jobs {
        let job_path = job
            .file_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        match job
            .into_request(config.default_quality(), config.default_concurrency)
            .await
        {
            Ok(request) => {
                stats.items += request.total();
                requests.push(request);
            }
            Err(e) => {
                error!("[{}] ❌ 无法构建批次: {:#}", job_path, e);
                stats.batches_failed += 1;
            }
        }
    }

    requests
}

/// 处理所有批次，最多同时运行 `max_concurrent` 个
async fn process_all_jobs(
    service: &Arc<BatchService>,
    requests: Vec<BatchRequest>,
    max_concurrent: usize,
    shutdown: &CancellationToken,
    stats: &mut RunStats,
) {
    let semaphore = Arc::new(Semaphore::new(max_concurrent.clamp(1, Semaphore::MAX_PERMITS)));
    let mut handles = Vec::with_capacity(requests.len());

    for request in requests {
        let batch_id = request.batch_id.clone();
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!("[批次 {}] 无法获取并发许可: {}", batch_id, e);
                stats.batches_failed += 1;
                continue;
            }
        };
        if shutdown.is_cancelled() {
            warn!("[批次 {}] ⏭️ 已停止，跳过", batch_id);
            stats.batches_failed += 1;
            continue;
        }
        let service = service.clone();

        let handle = tokio::spawn(async move {
            let _permit = permit;
            service.submit(request).await
        });
        handles.push((batch_id, handle));
    }

    let finished = join_all(
        handles
            .into_iter()
            .map(|(batch_id, handle)| async move { (batch_id, handle.await) }),
    )
    .await;

    for (batch_id, joined) in finished {
        match joined {
            Ok(Ok(result)) => record_result(stats, &result),
            Ok(Err(e)) => {
                error!("[批次 {}] ❌ 批次失败: {}", batch_id, e);
                stats.batches_failed += 1;
            }
            Err(e) => {
                error!("[批次 {}] 任务执行失败: {}", batch_id, e);
                stats.batches_failed += 1;
            }
        }
    }
}

fn record_result(stats: &mut RunStats, result: &BatchResult) {
    stats.batches_ok += 1;
    stats.succeeded += result.succeeded;
    stats.failed += result.failed;
    stats.cancelled += result.cancelled;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_huge_job_concurrency_is_clamped() {
        let root = tempfile::tempdir().unwrap();
        let config = Config {
            output_root: root.path().display().to_string(),
            ..Config::default()
        };
        let coordinator = BatchCoordinator::new(
            Arc::new(GeminiCompositor::new(&config).unwrap()),
            Arc::new(ImageCrateResizer),
            Arc::new(FsResultSink::new(root.path())),
        );
        let service = Arc::new(BatchService::new(coordinator, ProgressReporter::default()));
        let mut stats = RunStats::default();

        process_all_jobs(&service, Vec::new(), usize::MAX, &CancellationToken::new(), &mut stats).await;
        assert_eq!(stats, RunStats::default());
    }

    #[test]
    fn test_record_result_accumulates() {
        let mut stats = RunStats::default();
        let result = BatchResult::assemble("b", Vec::new(), None, None);
        record_result(&mut stats, &result);
        record_result(&mut stats, &result);
        assert_eq!(stats.batches_ok, 2);
        assert_eq!(stats.succeeded, 0);
    }
}
