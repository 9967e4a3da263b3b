use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use song_consumer::{
    app_context::AppContext,
    config::Config,
    consumer::SongConsumerLoop,
    errors::{EXIT_CONFIG, EXIT_STORAGE},
    source::KafkaConnector,
};
use tokio::signal::unix::SignalKind;
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

fn setup_tracing() {
    let log_layer = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy()
            .add_directive("rdkafka=warn".parse().unwrap()),
    );
    tracing_subscriber::registry().with(log_layer).init();
}

fn install_metrics_exporter(bind: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("invalid METRICS_BIND '{bind}'"))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("failed to install prometheus exporter")?;
    info!(%addr, "Serving metrics");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())
        .expect("failed to install SIGTERM handler");

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
    }
}

#[tokio::main]
async fn main() {
    setup_tracing();
    info!("Starting song consumer...");

    let config = match Config::init_with_defaults() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to read configuration: {e}");
            std::process::exit(EXIT_CONFIG);
        }
    };

    info!(
        topic = %config.consumer.kafka_consumer_topic,
        group_id = %config.consumer.kafka_consumer_group,
        kafka_hosts = %config.kafka.kafka_hosts,
        database_url = %config.database_url,
        projections = ?config.tracked_projections.0,
        "Configuration loaded"
    );

    if let Some(bind) = &config.metrics_bind {
        if let Err(e) = install_metrics_exporter(bind) {
            error!("{e:#}");
            std::process::exit(EXIT_CONFIG);
        }
    }

    let context = match AppContext::from_config(&config) {
        Ok(context) => Arc::new(context),
        Err(e) => {
            error!("Failed to set up song store: {e}");
            std::process::exit(EXIT_STORAGE);
        }
    };

    let connector = Arc::new(KafkaConnector::new(
        config.kafka.clone(),
        config.consumer.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let consumer_loop = SongConsumerLoop::new(context, connector);
    if let Err(e) = consumer_loop.run(shutdown_rx).await {
        error!(exit_code = e.exit_code(), "Consumer shutting down: {e}");
        std::process::exit(e.exit_code());
    }

    info!("Consumer shut down");
}
