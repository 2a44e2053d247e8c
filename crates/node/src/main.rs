//! pstore-node: entry point for the pstore replication router.
//!
//! Loads config, connects every configured backend, wires the router,
//! split policy and shadow write queue, then serves the caller-facing
//! gRPC service on the configured listen address.

use pstore_config::{FanoutMode as ConfiguredMode, RouterConfig};
use pstore_metrics::RouterMetrics;
use pstore_router::split::WeightedSplit;
use pstore_router::write_queue::{spawn_write_queue_worker, WriteQueueConfig};
use pstore_router::{Backends, DispatchConfig, FanoutMode, Router, WriteQueue};
use std::sync::Arc;
use tokio::time::Duration;

fn dispatch_config(config: &RouterConfig) -> DispatchConfig {
    DispatchConfig {
        mode: match config.dispatch.mode {
            ConfiguredMode::Parallel => FanoutMode::Parallel,
            ConfiguredMode::Sequential => FanoutMode::Sequential,
        },
        short_circuit: config.dispatch.short_circuit,
        default_timeout: Duration::from_millis(config.dispatch.default_timeout_ms),
        read_repair: config.write_queue.read_repair,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pstore_metrics::init_tracing();

    // Load config: first CLI arg is the YAML config path
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    let config = match pstore_config::load_from_file(std::path::Path::new(&config_path)) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("failed to load config from {}: {}", config_path, e);
            return Err(e.into());
        }
    };

    let metrics = Arc::new(RouterMetrics::new());

    // Connect backends in configured order; index 0 is the default primary
    let mut adapters = Vec::with_capacity(config.backends.len());
    for backend in &config.backends {
        adapters.push(pstore_net::connect_backend(
            backend,
            config.max_message_bytes,
        )?);
    }
    let backends = Backends::new(adapters);
    tracing::info!("routing across {:?}", backends);

    // Shadow write queue with its single delivery worker
    let (queue, queue_rx) = WriteQueue::bounded(config.write_queue.capacity, metrics.clone());
    let worker = spawn_write_queue_worker(
        backends.clone(),
        queue_rx,
        metrics.clone(),
        WriteQueueConfig {
            delivery_timeout: Duration::from_millis(config.write_queue.delivery_timeout_ms),
        },
    );

    let router = Router::new(backends, metrics.clone(), dispatch_config(&config))
        .with_split_policy(Arc::new(WeightedSplit::new(config.dispatch.split_weight)))
        .with_write_queue(queue);

    // Spawn metrics HTTP server if configured
    if let Some(metrics_port) = config.metrics_port {
        let metrics_addr = std::net::SocketAddr::from(([0, 0, 0, 0], metrics_port));
        let metrics = metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = pstore_metrics::serve_metrics(metrics_addr, metrics).await {
                tracing::warn!("metrics server failed: {}", e);
            }
        });
    }

    let server = pstore_net::build_server(router, config.max_message_bytes);

    // Serve with graceful shutdown on Ctrl+C
    tracing::info!("serving gRPC on {}", config.listen);
    tokio::select! {
        result = server.serve(config.listen) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C, shutting down");
        }
    }

    // Pending shadow writes are best-effort; don't wait on them
    worker.abort();
    Ok(())
}
