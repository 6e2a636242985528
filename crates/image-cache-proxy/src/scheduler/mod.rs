//! Background AVIF conversion scheduling.
//!
//! Two strategies drive the pending queues of every registered
//! [`TranscodingCache`](crate::transcoding::TranscodingCache):
//!
//! - [`ContinuousWorker`]: one supervised worker per cache draining jobs as
//!   they arrive.
//! - [`BatchScheduler`]: cron-triggered batches that only run inside the
//!   configured hour window.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{ConversionConfig, ConversionMode};
use crate::errors::AppResult;

pub mod batch;
pub mod continuous;
pub mod registry;
pub mod window;

pub use batch::{BatchReport, BatchScheduler, drain_batch};
pub use continuous::ContinuousWorker;
pub use registry::TranscoderRegistry;
pub use window::ScheduleWindow;

/// Starts the background tasks selected by `config`. Every task stops when
/// `shutdown` is cancelled.
pub async fn spawn_conversion_scheduler(
    config: &ConversionConfig,
    registry: TranscoderRegistry,
    shutdown: CancellationToken,
) -> AppResult<Vec<JoinHandle<()>>> {
    if !config.enabled {
        info!("AVIF conversion disabled, originals are kept as-is");
        return Ok(Vec::new());
    }

    match config.mode {
        ConversionMode::Continuous => {
            let handles = registry
                .caches()
                .await
                .into_iter()
                .map(|cache| ContinuousWorker::new(cache, config.throttle).spawn(shutdown.clone()))
                .collect();
            Ok(handles)
        }
        ConversionMode::Scheduled => {
            if !config.schedule.enabled {
                info!("AVIF conversion schedule disabled, pending keys are only recorded");
                return Ok(Vec::new());
            }

            let scheduler = BatchScheduler::from_config(registry, config)?;
            info!(
                "AVIF conversion scheduled with cron '{}' (window {}: {}-{})",
                config.schedule.cron,
                if config.schedule.use_range { "on" } else { "off" },
                config.schedule.hour_start,
                config.schedule.hour_end
            );
            Ok(vec![tokio::spawn(async move {
                scheduler.run(shutdown).await
            })])
        }
    }
}
