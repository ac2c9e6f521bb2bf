//! Skala agent: wires the keyed store, the config ingestor and the
//! reconcile loop. The config transport and the object watch plug in from
//! the outside; seed files let the agent bootstrap through the same ingest
//! path they would use.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{debug, info, warn};

use skala_core::AutoscalerInternal;
use skala_ingest::{ApplyStatus, ConfigIngestor, ConfigUpdate, Product, RawConfig, StaticLeadership};
use skala_reconcile::{HorizontalReconciler, KubeScaleClient, Worker};
use skala_store::KeyedStore;

#[derive(Parser, Debug)]
#[command(name = "skala-agent", version, about = "Workload autoscaling agent")]
struct Args {
    /// Reconcile interval in seconds
    #[arg(long = "interval", env = "SKALA_INTERVAL", default_value_t = 10)]
    interval: u64,

    /// Run as a follower: receive config updates but never write
    #[arg(long = "follower", env = "SKALA_FOLLOWER")]
    follower: bool,

    /// Settings payload (wire JSON) applied through the ingest path at boot
    #[arg(long = "seed-settings")]
    seed_settings: Option<PathBuf>,

    /// Values payload (wire JSON) applied through the ingest path at boot
    #[arg(long = "seed-values")]
    seed_values: Option<PathBuf>,
}

fn init_tracing() {
    let env = std::env::var("SKALA_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("SKALA_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid SKALA_METRICS_ADDR; expected host:port");
        }
    }
}

async fn seed(ingestor: &ConfigIngestor, product: Product, path: &Path) -> Result<()> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let mut configs = HashMap::new();
    configs.insert(
        "seed".to_string(),
        RawConfig { id: format!("seed:{}", path.display()), version: 1, data },
    );
    let update = ConfigUpdate {
        configs,
        apply_status: Box::new(move |key, status| match status {
            ApplyStatus::Error(err) => warn!(key, error = %err, "seed config rejected"),
            status => info!(key, ?status, "seed config processed"),
        }),
    };
    ingestor.handle_update(product, chrono::Utc::now(), update).await;
    Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let args = Args::parse();

    let store: KeyedStore<AutoscalerInternal> = KeyedStore::new();
    let leadership = Arc::new(StaticLeadership(!args.follower));
    let ingestor = ConfigIngestor::new(store.clone(), leadership);

    if let Some(path) = &args.seed_settings {
        seed(&ingestor, Product::AutoscalingSettings, path).await?;
    }
    if let Some(path) = &args.seed_values {
        seed(&ingestor, Product::AutoscalingValues, path).await?;
    }

    let scaler = Arc::new(KubeScaleClient::try_default().await?);
    let worker = Worker::new(store.clone(), HorizontalReconciler::new(scaler));

    info!(
        interval = args.interval,
        leader = !args.follower,
        autoscalers = store.len(),
        "agent started"
    );
    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let requeue = worker.reconcile_all().await;
                if !requeue.is_empty() {
                    // Retry cadence is this loop's: pending autoscalers are
                    // picked up again on the next tick.
                    debug!(count = requeue.len(), "autoscalers pending requeue");
                }
            }
            _ = signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }
    Ok(())
}
