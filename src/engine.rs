//! Composition root: wires config, logger, queue, pipeline, and metrics
//! into one handle and owns their background tasks' lifecycle.

use crate::advice::AdviceCache;
use crate::config::Config;
use crate::error::QerrorsResult;
use crate::http_client::HttpClient;
use crate::http_surface::HttpSurface;
use crate::logging::log_info;
use crate::metrics::Metrics;
use crate::middleware::{CapturedError, HttpErrorContext, MiddlewareResponse, QerrorsMiddleware};
use crate::pipeline::AnalysisPipeline;
use crate::queue::AnalysisQueue;
use crate::rate_limiter::ErrorRateLimiter;
use crate::structured_logger::StructuredLogger;
use std::sync::Arc;

/// A running qerrors instance: one `Config`, one of everything else, and
/// `CONCURRENCY_LIMIT` spawned queue workers.
///
/// Construct via [`QerrorsEngine::new`] or [`QerrorsEngine::from_env`];
/// call [`QerrorsEngine::handle_error`] from the caller's error-handling
/// path, and [`QerrorsEngine::shutdown`] during graceful process exit.
pub struct QerrorsEngine {
    config: Arc<Config>,
    middleware: QerrorsMiddleware,
    queue: Arc<AnalysisQueue>,
    logger: Arc<StructuredLogger>,
    metrics: Arc<Metrics>,
    http_surface: HttpSurface,
    worker_handles: Vec<tokio::task::JoinHandle<()>>,
}

impl QerrorsEngine {
    /// Build every component from `config` and spawn `concurrency_limit`
    /// queue workers.
    pub fn new(config: Config) -> std::io::Result<Self> {
        let config = Arc::new(config);
        let metrics = Arc::new(Metrics::new());

        let logger = StructuredLogger::new(
            config.log_level,
            config.log_queue_limit,
            &config.log_dir,
            config.log_max_days,
            metrics.clone(),
        )?;

        let advice_cache = Arc::new(AdviceCache::new(
            config.cache_limit,
            config.cache_ttl,
            64 * 1024 * 1024,
            config.max_advice_size,
        ));
        let http_client = Arc::new(HttpClient::new(config.clone(), metrics.clone()));
        let pipeline = Arc::new(AnalysisPipeline::new(
            advice_cache,
            http_client.clone(),
            metrics.clone(),
            config.concurrency_limit,
        ));
        let queue = Arc::new(AnalysisQueue::new(
            config.queue_limit,
            metrics.clone(),
            config.analysis_item_timeout,
        ));
        let error_rate_limiter = Arc::new(ErrorRateLimiter::new(
            config.error_rate_limit_per_min,
            config.error_rate_limit_burst,
        ));

        let mut worker_handles = Vec::with_capacity(config.concurrency_limit as usize);
        for _ in 0..config.concurrency_limit {
            let queue = queue.clone();
            let pipeline = pipeline.clone();
            worker_handles.push(tokio::spawn(async move { queue.run_worker(pipeline).await }));
        }

        let middleware = QerrorsMiddleware::new(
            logger.clone(),
            queue.clone(),
            error_rate_limiter,
            metrics.clone(),
            config.sanitiser_max_depth,
            config.sanitiser_max_properties,
            config.sanitiser_max_string_len,
        );

        let http_surface = HttpSurface::new(metrics.clone(), queue.clone(), http_client);

        log_info!(
            concurrency_limit = config.concurrency_limit,
            queue_limit = config.queue_limit,
            "qerrors engine started"
        );

        Ok(Self {
            config,
            middleware,
            queue,
            logger,
            metrics,
            http_surface,
            worker_handles,
        })
    }

    /// Build `Config` from the environment, then build the engine.
    pub fn from_env() -> QerrorsResult<Self> {
        let config = Config::from_env()?;
        Self::new(config).map_err(|e| crate::error::QerrorsError::internal(e.to_string()))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    pub fn http_surface(&self) -> &HttpSurface {
        &self.http_surface
    }

    /// Capture one error: sanitise, log, shape an HTTP response if
    /// `http` is present, and enqueue for background analysis.
    pub async fn handle_error(
        &self,
        error: CapturedError,
        http: Option<HttpErrorContext>,
    ) -> Option<MiddlewareResponse> {
        self.middleware.handle(error, http).await
    }

    /// Graceful shutdown: stop accepting new analysis work, wait (up to
    /// `shutdown_grace`) for the queue to drain and in-flight workers to
    /// finish, then flush the structured logger.
    pub async fn shutdown(self) {
        self.queue.close();
        self.queue.wait_until_empty(self.config.shutdown_grace).await;
        for handle in self.worker_handles {
            handle.abort();
        }
        self.logger.flush(self.config.shutdown_grace).await;
        log_info!("qerrors engine shut down");
    }
}
