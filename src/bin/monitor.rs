// ABOUTME: Process entrypoint: load configuration, wire the pipeline context, run until signalled

use std::path::PathBuf;

use sentrycam::config::Config;
use sentrycam::context::PipelineContext;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let config_path = std::env::var("SENTRYCAM_CONFIG").unwrap_or_else(|_| "config.json".to_string());
    let config = match Config::load(&config_path).await {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(%err, path = %config_path, "could not load config file, using defaults");
            Config::default()
        }
    };

    let results_root = std::env::var("SENTRYCAM_RESULTS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("results"));
    let session_id = uuid::Uuid::new_v4();

    info!(%session_id, host = %config.tcp.host, port = config.tcp.port, "starting sentrycam pipeline");

    let ctx = PipelineContext::new(config.clone(), results_root, session_id);
    ctx.spawn_sink_pump();
    ctx.spawn_background_tasks();

    let host = config.tcp.host.clone();
    let port = config.tcp.port;
    let ingest = tokio::spawn(async move {
        ctx.run_ingest(&host, port).await;
    });

    tokio::select! {
        _ = ingest => {}
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
    }

    Ok(())
}
