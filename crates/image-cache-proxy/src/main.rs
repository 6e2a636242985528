use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use image_cache_proxy::{
    cache::{DiskCache, ImageCache},
    config::Config,
    fallback::{FallbackHandler, FallbackSettings},
    scheduler::{TranscoderRegistry, spawn_conversion_scheduler},
    transcoding::{TranscodingCache, TranscodingOptions},
    transport::{OutboundHeaderTransport, ReqwestTransport},
    upstream::ResizeProxy,
    web::{AppState, WebServer},
};

#[derive(Parser)]
#[command(name = "image-cache-proxy")]
#[command(version)]
#[command(about = "Caching image proxy with background AVIF transcoding and fallback fetching")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging with specified level
    let log_filter = if cli.log_level == "trace" {
        format!("image_cache_proxy={},tower_http=trace", cli.log_level)
    } else {
        format!("image_cache_proxy={}", cli.log_level)
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Image Cache Proxy v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load_from_file(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config);

    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }

    let shutdown = CancellationToken::new();

    // Persistent store
    let disk = DiskCache::open(
        &config.cache.directory,
        config.cache.retention,
        config.cache.cleanup_interval,
    )
    .await?;
    disk.spawn_cleanup(shutdown.child_token());
    info!("Image cache directory: {}", config.cache.directory.display());

    // Transcoding decorator, registered with the scheduler
    let registry = TranscoderRegistry::new();
    let cache: Arc<dyn ImageCache> = if config.conversion.enabled {
        let transcoding = TranscodingCache::open(
            Arc::new(disk),
            TranscodingOptions::from_config(&config.cache, &config.conversion),
        )
        .await?;
        registry.register(transcoding.clone()).await;
        transcoding
    } else {
        Arc::new(disk)
    };

    // Origin fetches go through the browser-header decorator
    let origin = ReqwestTransport::from_config(&config.upstream)?;
    let external = origin.clone().with_max_body_size(config.fallback.max_body_size);
    let outbound = OutboundHeaderTransport::new(
        Arc::new(origin),
        config.upstream.same_site_hosts.clone(),
    );
    let upstream = ResizeProxy::new(Arc::new(outbound), cache.clone());

    let handler = FallbackHandler::new(
        Arc::new(upstream),
        cache,
        Arc::new(external),
        FallbackSettings::from_config(&config)?,
    );

    let web_server = WebServer::new(
        &config,
        AppState {
            handler: Arc::new(handler),
            registry: registry.clone(),
        },
    )?;
    info!(
        "Web server configured to listen on {}:{}",
        web_server.host(),
        web_server.port()
    );

    let (server_ready_tx, server_ready_rx) = tokio::sync::oneshot::channel();
    let server_token = shutdown.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = web_server
            .serve_with_cancellation(server_ready_tx, server_token)
            .await
        {
            error!("Web server failed: {}", e);
        }
    });

    match server_ready_rx.await {
        Ok(Ok(())) => {
            info!("Web server is now listening, starting background services...");
        }
        Ok(Err(bind_error)) => {
            error!("Failed to bind web server: {}", bind_error);
            return Err(bind_error);
        }
        Err(_) => {
            error!("Web server task completed without signaling");
            return Err(anyhow::anyhow!("Web server failed to start"));
        }
    }

    let scheduler_handles =
        spawn_conversion_scheduler(&config.conversion, registry.clone(), shutdown.clone()).await?;

    info!("All services started successfully");

    shutdown_signal().await;

    // Stop running batches first so they save their progress
    registry.stop_all().await;
    shutdown.cancel();

    if let Err(e) = server_handle.await {
        warn!("Web server task ended abnormally: {}", e);
    }
    for handle in scheduler_handles {
        if let Err(e) = handle.await {
            warn!("Conversion task ended abnormally: {}", e);
        }
    }
    registry.flush_all().await;

    info!("Image Cache Proxy stopped");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT (Ctrl+C), shutting down gracefully"),
                }
                return;
            }
            Err(e) => warn!("Failed to install SIGTERM handler: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
    }
    info!("Received Ctrl+C, shutting down gracefully");
}
