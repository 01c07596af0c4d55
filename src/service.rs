use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::Router;
use axum_server::Handle;
use blob_store::BlobStorage;
use metrics::{api_io_stats, init_provider};
use tokio::{self, signal, sync::watch};
use tracing::{error, info, warn};

use crate::{
    catalog::{self, MetadataCatalog},
    config::{ListingMode, Profile, ServerConfig},
    gc::StagingSweeper,
    routes::{create_routes, RouteState},
};

#[derive(Clone)]
pub struct Service {
    pub config: Arc<ServerConfig>,
    pub shutdown_tx: watch::Sender<()>,
    pub shutdown_rx: watch::Receiver<()>,
    pub blob_storage: Arc<BlobStorage>,
    pub catalog: Option<Arc<dyn MetadataCatalog>>,
    pub metrics: Arc<api_io_stats::Metrics>,
}

impl Service {
    pub async fn new(config: ServerConfig) -> Result<Self> {
        let catalog = config
            .catalog
            .as_ref()
            .map(catalog::from_config)
            .transpose()
            .context("error initializing metadata catalog")?;
        Self::new_with_catalog(config, catalog)
    }

    pub fn new_with_catalog(
        mut config: ServerConfig,
        catalog: Option<Arc<dyn MetadataCatalog>>,
    ) -> Result<Self> {
        config.validate()?;
        // Pin the instance id so every log line and metric agrees on it.
        config.telemetry.instance_id = Some(config.instance_id());

        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let blob_storage = Arc::new(BlobStorage::new(config.blob_storage.clone()));

        Ok(Self {
            config: Arc::new(config),
            shutdown_tx,
            shutdown_rx,
            blob_storage,
            catalog,
            metrics: Arc::new(api_io_stats::Metrics::new()),
        })
    }

    pub fn route_state(&self) -> RouteState {
        RouteState {
            config: self.config.clone(),
            blob_storage: self.blob_storage.clone(),
            catalog: self.catalog.clone(),
            metrics: self.metrics.clone(),
        }
    }

    pub fn router(&self) -> Router {
        create_routes(self.route_state())
    }

    pub async fn start(&mut self) -> Result<()> {
        init_provider(
            self.config.telemetry.enable_metrics,
            self.config.telemetry.endpoint.as_ref(),
            self.config.telemetry.metrics_interval,
            &self.config.instance_id(),
            env!("CARGO_PKG_VERSION"),
        )?;
        // Instruments must be created after the provider is installed.
        self.metrics = Arc::new(api_io_stats::Metrics::new());

        if self.config.profile == Profile::Full &&
            self.config.listing_mode == ListingMode::Directory
        {
            warn!(
                "listing mode is `directory`: every stored document is reported as belonging \
                 to whichever owner is requested"
            );
        }
        if self.catalog.is_none() {
            info!("no metadata catalog configured, catalog routes answer 503");
        }

        let mut sweeper = StagingSweeper::new(
            self.blob_storage.clone(),
            &self.config.gc,
            self.shutdown_rx.clone(),
        );
        tokio::spawn(async move {
            sweeper.start().await;
        });

        let handle = Handle::new();
        let handle_sh = handle.clone();
        let shutdown_tx = self.shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown_signal(handle_sh, shutdown_tx).await;
            info!("graceful shutdown signal received, shutting down server gracefully");
        });

        let listen_addr = self.config.listen_addr();
        let addr: SocketAddr = listen_addr.parse()?;
        info!(
            profile = ?self.config.profile,
            root = %self.blob_storage.root().display(),
            "document server listening on {}",
            listen_addr
        );
        axum_server::bind(addr)
            .handle(handle)
            .serve(self.router().into_make_service())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal(handle: Handle, shutdown_tx: watch::Sender<()>) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {:?}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!("failed to install signal handler: {:?}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
        },
        _ = terminate => {
        },
    }
    handle.graceful_shutdown(None);
    if shutdown_tx.send(()).is_err() {
        warn!("no background task was listening for shutdown");
    }
    info!("signal received, shutting down server gracefully");
}
