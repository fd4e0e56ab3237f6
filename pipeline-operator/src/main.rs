use std::sync::Arc;

use axum::Router;
use config_check::{ConfigCheck, KubeCheckRuntime};
use envconfig::Envconfig;
use eyre::Result;
use operator_common::kube::{KubeClient, KubeConfig};
use operator_common::store::ResourceStore;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use pipeline_operator::applier::KubeApplier;
use pipeline_operator::config::{Config, LogFormat};
use pipeline_operator::controller::{resync_loop, Controller};
use pipeline_operator::handlers;
use pipeline_operator::health::HealthRegistry;
use pipeline_operator::metrics::setup_metrics_recorder;
use pipeline_operator::reconciler::Reconciler;

const TRIGGER_QUEUE_SIZE: usize = 1024;

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!("listening on {}", bind);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())?;
    let mut interrupt = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

    tokio::select! {
        _ = term.recv() => {},
        _ = interrupt.recv() => {},
    };

    tracing::info!("shutting down gracefully...");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::init_from_env()?;
    init_tracing(config.log_format);

    let client = KubeClient::new(KubeConfig::in_cluster(
        &config.kube_api_url,
        &config.kube_token_path,
        &config.kube_ca_path,
        config.kube_insecure_tls,
    )?)?;
    let store: Arc<dyn ResourceStore> = Arc::new(client.clone());
    let check = ConfigCheck::new(
        Arc::new(KubeCheckRuntime::new(client.clone())),
        config.config_check.settings(),
    );
    let reconciler = Reconciler::new(
        store.clone(),
        check,
        Arc::new(KubeApplier::new(client)),
        &config.operator_namespace,
    );

    let liveness = HealthRegistry::new("liveness");
    let readiness = HealthRegistry::new("readiness");
    let deadline = config.resync_interval.0 * 2;
    let resync_liveness = liveness.register("resync-loop", deadline).await;
    let resync_readiness = readiness.register("store", deadline).await;

    let recorder_handle = setup_metrics_recorder()?;
    let app = handlers::app(liveness, readiness, Some(recorder_handle));

    let shutdown = CancellationToken::new();
    let (sender, receiver) = mpsc::channel(TRIGGER_QUEUE_SIZE);
    let controller = Controller::new(
        reconciler,
        sender.clone(),
        config.max_concurrent_reconciles,
        config.retry_backoff.0,
    );
    let controller_task = tokio::spawn(controller.run(receiver, shutdown.clone()));
    let resync_task = tokio::spawn(resync_loop(
        store,
        sender,
        config.resync_interval.0,
        resync_liveness,
        resync_readiness,
        shutdown.clone(),
    ));

    tracing::info!(
        namespace = %config.operator_namespace,
        workers = config.max_concurrent_reconciles,
        "pipeline operator started"
    );

    tokio::select! {
        result = listen(app, config.bind()) => {
            if let Err(e) = result {
                tracing::error!("failed to serve http: {}", e);
            }
        }
        result = shutdown_signal() => result?,
    }

    shutdown.cancel();
    controller_task.await?;
    resync_task.await?;

    Ok(())
}
