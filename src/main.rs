//! Port K8s Exporter
//!
//! Main entry point for the exporter. Loads the configuration, builds one
//! controller per configured kind, and runs them until a shutdown signal.

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use port_k8s_exporter::{
    adapters::{
        CatalogClient, Credentials, DiscoveryResolver, JqEvaluator, PortClient, PortClientConfig,
        QueryEvaluator, SharedInformerFactory,
    },
    config::{aggregate_resources, ExporterArgs, ExporterConfig},
    controllers::{Context, ControllerSetBuilder, ControllersHandler, HandlerSettings},
    mapping::EntityMapper,
    metrics,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    let args = ExporterArgs::parse();
    let config = ExporterConfig::load(&args)?;

    info!(
        state_key = %config.state_key,
        resources = config.resources.len(),
        "Starting Port K8s Exporter"
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let credentials = Credentials {
        client_id: args.port_client_id.clone(),
        client_secret: args.port_client_secret.clone(),
    };
    let catalog: Arc<dyn CatalogClient> = Arc::new(PortClient::new(PortClientConfig {
        base_url: args.port_base_url.clone(),
        credentials: credentials.clone(),
        state_key: config.state_key.clone(),
        delete_dependents: config.delete_dependents,
        create_missing_related_entities: config.create_missing_related_entities,
    })?);

    let evaluator: Arc<dyn QueryEvaluator> = Arc::new(JqEvaluator::new());
    let mapper = EntityMapper::new(evaluator.clone(), &args.cluster_name);
    let informers = Arc::new(SharedInformerFactory::new(
        client.clone(),
        config.resync_interval,
    ));
    let context = Context::new(informers.clone(), catalog.clone(), mapper, evaluator);
    let resolver = DiscoveryResolver::new(client);

    let set = ControllerSetBuilder::new(&resolver, &context)
        .build(aggregate_resources(&config.resources))
        .await?;
    for skipped in &set.skipped {
        warn!(kind = %skipped.kind, error = %skipped.error, "Kind will not be exported");
    }

    // Start metrics server
    let metrics_handle = tokio::spawn(metrics::serve(args.metrics_port));
    info!("Metrics server starting on port {}", args.metrics_port);

    let handler = ControllersHandler::new(
        set.controllers,
        informers,
        catalog,
        HandlerSettings {
            state_key: config.state_key.clone(),
            credentials,
            workers: args.workers,
        },
    );

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            info!("Received shutdown signal, stopping exporter");
            cancel.cancel();
        }
    });
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            match metrics_handle.await {
                Ok(Err(e)) => error!(error = %e, "Metrics server failed"),
                Err(e) => error!(error = %e, "Metrics server task panicked"),
                Ok(Ok(())) => error!("Metrics server exited unexpectedly"),
            }
            cancel.cancel();
        }
    });

    handler.handle(cancel).await?;

    info!("Port K8s Exporter stopped");
    Ok(())
}

/// Initialize tracing subscriber
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,kube=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for CTRL+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
