mod routes;
mod stream;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::signal;
use tracing::{error, info, warn};
use watchpost_common::config::Config;
use watchpost_pipeline::alert::{notifier_from_config, AlertDispatcher};
use watchpost_pipeline::annotate::{placeholder_jpeg, PLACEHOLDER_TEXT};
use watchpost_pipeline::source::FrameSource;
use watchpost_pipeline::{detect, source, LifecycleManager, PipelineSettings};

use routes::AppState;
use stream::StreamPublisher;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let source: Arc<dyn FrameSource> = match source::from_config(&config.camera) {
        Ok(s) => Arc::from(s),
        Err(e) => {
            error!(error = %e, "invalid camera configuration");
            std::process::exit(1);
        }
    };
    let detector = match detect::from_config(&config.detection) {
        Ok(d) => Arc::new(Mutex::new(d)),
        Err(e) => {
            error!(error = %e, "failed to initialise detector");
            std::process::exit(1);
        }
    };
    let notifier = match notifier_from_config(&config.alert) {
        Ok(n) => n,
        Err(e) => {
            error!(error = %e, "failed to initialise alert transport");
            std::process::exit(1);
        }
    };
    let placeholder = match placeholder_jpeg(
        config.camera.width,
        config.camera.height,
        PLACEHOLDER_TEXT,
        config.pipeline.jpeg_quality,
    ) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "failed to render placeholder frame");
            std::process::exit(1);
        }
    };

    info!(
        source = source.name(),
        width = config.camera.width,
        height = config.camera.height,
        tracked = config.detection.tracked_label,
        cooldown_secs = config.alert.cooldown_secs,
        "watchpost starting"
    );

    let lifecycle = Arc::new(LifecycleManager::new(
        source,
        detector,
        AlertDispatcher::new(notifier, &config.alert),
        PipelineSettings::from(&config),
    ));
    let publisher = StreamPublisher::new(
        lifecycle.results(),
        placeholder,
        Duration::from_millis(config.server.frame_interval_ms),
    );

    if config.pipeline.start_on_boot {
        if let Err(e) = lifecycle.start().await {
            warn!(error = %e, "pipeline did not start, will retry on first viewer");
        }
    }

    let app = routes::router(AppState {
        lifecycle: Arc::clone(&lifecycle),
        publisher: Arc::clone(&publisher),
    });

    let addr = format!("{}:{}", config.server.host, config.server.port);
    info!(addr, "stream server starting");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    let shutdown_publisher = Arc::clone(&publisher);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_shutdown().await;
            // Open streams never end on their own.
            shutdown_publisher.close();
        })
        .await;
    if let Err(e) = served {
        error!(error = %e, "server error");
    }

    lifecycle.stop().await;
    info!("watchpost stopped");
}

async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
