//! Cron-triggered conversion batches bounded by an hour window.

use chrono::Local;
use cron::Schedule;
use std::{str::FromStr, time::Duration};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ScheduleWindow, TranscoderRegistry};
use crate::config::{ConversionConfig, defaults::DEFAULT_PROGRESS_LOG_INTERVAL};
use crate::errors::{AppError, AppResult};
use crate::transcoding::TranscodingCache;

/// Counters for one cache's batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub attempted: usize,
    pub converted: usize,
    /// Stopped by the stop signal or the window closing, with work left over
    pub stopped_early: bool,
    /// Another batch already held this cache
    pub already_running: bool,
}

pub struct BatchScheduler {
    registry: TranscoderRegistry,
    schedule: Schedule,
    window: ScheduleWindow,
    throttle: Duration,
}

impl BatchScheduler {
    pub fn new(
        registry: TranscoderRegistry,
        schedule: Schedule,
        window: ScheduleWindow,
        throttle: Duration,
    ) -> Self {
        Self {
            registry,
            schedule,
            window,
            throttle,
        }
    }

    pub fn from_config(registry: TranscoderRegistry, config: &ConversionConfig) -> AppResult<Self> {
        let cron = &config.schedule.cron;
        let schedule = Schedule::from_str(cron).map_err(|e| {
            AppError::configuration(format!("Invalid cron expression '{cron}': {e}"))
        })?;

        Ok(Self::new(
            registry,
            schedule,
            ScheduleWindow::from(&config.schedule),
            config.throttle,
        ))
    }

    /// Sleeps until each cron tick and runs a batch when the window is open.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!("Starting scheduled AVIF conversion service");

        loop {
            let Some(next) = self.schedule.upcoming(Local).next() else {
                warn!("Conversion schedule has no upcoming runs, stopping");
                break;
            };
            let wait = (next - Local::now()).to_std().unwrap_or_default();
            debug!("Next conversion batch check at {}", next.format("%Y-%m-%d %H:%M:%S"));

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.cancelled() => {
                    info!("Conversion scheduler received cancellation signal, shutting down");
                    break;
                }
            }

            if !self.window.is_open() {
                debug!("Outside the conversion window, skipping this tick");
                continue;
            }

            let converted = self.run_all(&shutdown).await;
            info!("AVIF conversion batch finished: {} images converted", converted);
        }

        info!("Scheduled AVIF conversion service stopped");
    }

    /// One batch over every registered cache. Returns the number converted.
    pub async fn run_all(&self, shutdown: &CancellationToken) -> usize {
        let mut total = 0;
        for cache in self.registry.caches().await {
            if shutdown.is_cancelled() {
                break;
            }
            if !self.window.is_open() {
                info!("AVIF conversion: time window ended");
                break;
            }
            total += drain_batch(&cache, &self.window, shutdown, self.throttle)
                .await
                .converted;
        }
        total
    }
}

/// Drains `cache`'s pending list until it is empty, the window closes or a
/// stop is requested. The pending list is saved when the batch ends.
pub async fn drain_batch(
    cache: &TranscodingCache,
    window: &ScheduleWindow,
    shutdown: &CancellationToken,
    throttle: Duration,
) -> BatchReport {
    let Some(run) = cache.begin_batch(shutdown).await else {
        return BatchReport {
            already_running: true,
            ..BatchReport::default()
        };
    };

    let id = cache.identifier();
    let started = Instant::now();
    let total_pending = cache.pending_count().await;
    info!(
        "AVIF cache [{}]: starting scheduled conversion of {} images",
        id, total_pending
    );

    let mut report = BatchReport::default();
    loop {
        if run.is_stopped() {
            info!(
                "AVIF cache [{}]: processing stopped early after {} conversions",
                id, report.converted
            );
            report.stopped_early = cache.pending_count().await > 0;
            break;
        }
        if !window.is_open() {
            info!(
                "AVIF cache [{}]: time window ended, processed {} of {} images",
                id, report.converted, total_pending
            );
            report.stopped_early = cache.pending_count().await > 0;
            break;
        }

        let Some(key) = cache.next_job().await else {
            break;
        };

        report.attempted += 1;
        if cache.process(&key).await.is_converted() {
            report.converted += 1;
            if report.converted % DEFAULT_PROGRESS_LOG_INTERVAL == 0 {
                info!(
                    "AVIF cache [{}]: processed {} images so far...",
                    id, report.converted
                );
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(throttle) => {}
            _ = run.stop_token().cancelled() => {}
        }
    }

    if let Err(e) = cache.flush_pending().await {
        warn!("AVIF cache [{}]: failed to save pending keys: {}", id, e);
    }

    info!(
        "AVIF cache [{}]: completed {} conversions in {:?}",
        id,
        report.converted,
        started.elapsed()
    );
    report
}
