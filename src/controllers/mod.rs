//! Kubernetes controllers exporting resources to Port
//!
//! One controller runs per configured kind. The handler owns them all and
//! drives their startup, the stale entity pass and shutdown.

mod builder;
mod handler;
mod kind_controller;

pub use builder::{ControllerSet, ControllerSetBuilder, SkippedKind};
pub use handler::{ControllersHandler, HandlerSettings, Phase};
pub use kind_controller::KindController;

use std::sync::Arc;

use async_trait::async_trait;
use kube::discovery::ApiResource;
#[cfg(test)]
use mockall::automock;
use tokio_util::sync::CancellationToken;

use crate::adapters::{CatalogClient, QueryEvaluator, SharedInformerFactory};
use crate::config::AggregatedResource;
use crate::entity::LiveSet;
use crate::error::Result;
use crate::mapping::EntityMapper;
use crate::reconcilers::entity_sync::EntitySyncer;

/// Controller watching one resource kind
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceController: Send + Sync {
    /// Configured kind this controller watches
    fn kind(&self) -> String;

    /// Wait until the initial cache is loaded or `cancel` fires
    async fn wait_for_cache_sync(&self, cancel: CancellationToken) -> Result<()>;

    /// Start processing events with `workers` workers. Does not block.
    fn run(&self, workers: usize, cancel: CancellationToken);

    /// Ask the controller to stop; in-flight work is not awaited
    fn shutdown(&self);

    /// Keys of the entities the cached objects map to
    fn live_set(&self) -> Result<LiveSet>;
}

/// Builds the controller for one resolved kind
#[cfg_attr(test, automock)]
pub trait ControllerFactory: Send + Sync {
    fn build(
        &self,
        resource: AggregatedResource,
        api_resource: ApiResource,
    ) -> Arc<dyn ResourceController>;
}

/// Shared context for all controllers
pub struct Context {
    /// Process-wide informer factory
    pub informers: Arc<SharedInformerFactory>,
    /// Port API client
    pub catalog: Arc<dyn CatalogClient>,
    /// Entity mapper
    pub mapper: EntityMapper,
    /// Selector evaluator
    pub evaluator: Arc<dyn QueryEvaluator>,
}

impl Context {
    /// Create a new context
    pub fn new(
        informers: Arc<SharedInformerFactory>,
        catalog: Arc<dyn CatalogClient>,
        mapper: EntityMapper,
        evaluator: Arc<dyn QueryEvaluator>,
    ) -> Self {
        Self {
            informers,
            catalog,
            mapper,
            evaluator,
        }
    }
}

impl ControllerFactory for Context {
    fn build(
        &self,
        resource: AggregatedResource,
        api_resource: ApiResource,
    ) -> Arc<dyn ResourceController> {
        let informer = self.informers.for_resource(&api_resource);
        let syncer = EntitySyncer::new(
            resource,
            self.mapper.clone(),
            self.evaluator.clone(),
            self.catalog.clone(),
        );
        Arc::new(KindController::new(syncer, informer))
    }
}
