//! Builds one controller per resolvable kind

use std::sync::Arc;

use tracing::{error, info};

use crate::adapters::KindResolver;
use crate::config::AggregatedResource;
use crate::error::{Error, Result};
use crate::metrics;

use super::{ControllerFactory, ResourceController};

/// Kind that was left out because it could not be resolved
#[derive(Debug)]
pub struct SkippedKind {
    pub kind: String,
    pub error: Error,
}

/// Controllers built for a configuration
pub struct ControllerSet {
    pub controllers: Vec<Arc<dyn ResourceController>>,
    pub skipped: Vec<SkippedKind>,
}

/// Turns aggregated resources into controllers
pub struct ControllerSetBuilder<'a> {
    resolver: &'a dyn KindResolver,
    factory: &'a dyn ControllerFactory,
}

impl<'a> ControllerSetBuilder<'a> {
    pub fn new(resolver: &'a dyn KindResolver, factory: &'a dyn ControllerFactory) -> Self {
        Self { resolver, factory }
    }

    /// Build a controller for every kind the cluster serves
    ///
    /// Kinds that fail to resolve are logged and skipped. Fails only when no
    /// controller could be built at all.
    pub async fn build(&self, resources: Vec<AggregatedResource>) -> Result<ControllerSet> {
        let mut controllers = Vec::with_capacity(resources.len());
        let mut skipped = Vec::new();

        for resource in resources {
            match self.resolver.resolve(&resource.kind).await {
                Ok(api_resource) => {
                    info!(kind = %resource.kind, configs = resource.kind_configs.len(), "Creating controller");
                    controllers.push(self.factory.build(resource, api_resource));
                }
                Err(e) => {
                    error!(kind = %resource.kind, error = %e, "Failed to resolve kind, skipping");
                    skipped.push(SkippedKind {
                        kind: resource.kind,
                        error: e,
                    });
                }
            }
        }

        metrics::CONTROLLERS.set(controllers.len() as f64);
        metrics::SKIPPED_KINDS.set(skipped.len() as f64);

        if controllers.is_empty() {
            return Err(Error::NoControllers);
        }

        Ok(ControllerSet {
            controllers,
            skipped,
        })
    }
}
