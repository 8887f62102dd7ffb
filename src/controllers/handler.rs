//! Lifecycle of the controller set
//!
//! Startup is one linear sequence: start informers, wait for every cache,
//! remove stale entities once, then run every controller until cancelled.

use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::adapters::{CatalogClient, Credentials, InformerFactory};
use crate::error::Result;
use crate::metrics;
use crate::reconcilers::stale_entities::{delete_stale_entities, StaleEntitiesReport};

use super::ResourceController;

/// Lifecycle phase of the handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Created,
    InformersStarted,
    CacheSynced,
    StaleReconciled,
    Running,
    ShuttingDown,
    Stopped,
}

/// Settings shared by every controller
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub state_key: String,
    pub credentials: Credentials,
    pub workers: usize,
}

/// Owns the controllers and drives them through their lifecycle
pub struct ControllersHandler {
    controllers: Vec<Arc<dyn ResourceController>>,
    informers: Arc<dyn InformerFactory>,
    catalog: Arc<dyn CatalogClient>,
    settings: HandlerSettings,
    phase: Mutex<Phase>,
}

impl ControllersHandler {
    pub fn new(
        controllers: Vec<Arc<dyn ResourceController>>,
        informers: Arc<dyn InformerFactory>,
        catalog: Arc<dyn CatalogClient>,
        settings: HandlerSettings,
    ) -> Self {
        Self {
            controllers,
            informers,
            catalog,
            settings,
            phase: Mutex::new(Phase::Created),
        }
    }

    pub fn phase(&self) -> Phase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    /// Run the exporter until `cancel` fires
    ///
    /// A cache that fails to sync is fatal and returned before any entity is
    /// deleted or synced.
    pub async fn handle(&self, cancel: CancellationToken) -> Result<()> {
        info!(controllers = self.controllers.len(), "Starting informers");
        self.informers.start(cancel.clone());
        self.set_phase(Phase::InformersStarted);

        for controller in &self.controllers {
            info!(kind = %controller.kind(), "Waiting for cache sync");
            controller
                .wait_for_cache_sync(cancel.clone())
                .await
                .inspect_err(|e| error!(kind = %controller.kind(), error = %e, "Cache sync failed"))?;
        }
        self.set_phase(Phase::CacheSynced);

        match self.run_delete_stale_entities().await {
            Ok(report) => info!(
                retained = report.retained.len(),
                failed_controllers = ?report.failed_controllers,
                "Stale entity pass finished"
            ),
            Err(e) => warn!(error = %e, "Stale entity pass aborted, starting controllers anyway"),
        }
        self.set_phase(Phase::StaleReconciled);

        for controller in &self.controllers {
            controller.run(self.settings.workers, cancel.clone());
        }
        self.set_phase(Phase::Running);
        metrics::EXPORTER_READY.set(1.0);
        info!("Exporter is running");

        cancel.cancelled().await;

        self.set_phase(Phase::ShuttingDown);
        metrics::EXPORTER_READY.set(0.0);
        info!("Shutting down controllers");
        for controller in &self.controllers {
            controller.shutdown();
        }
        self.set_phase(Phase::Stopped);

        Ok(())
    }

    /// One stale entity pass over every controller's cache
    pub async fn run_delete_stale_entities(&self) -> Result<StaleEntitiesReport> {
        delete_stale_entities(
            &self.controllers,
            self.catalog.as_ref(),
            &self.settings.credentials,
            &self.settings.state_key,
        )
        .await
    }
}
