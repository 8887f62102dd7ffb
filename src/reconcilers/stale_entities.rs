//! Stale entity reconciliation
//!
//! Merges the live sets of all controllers and asks Port to delete every
//! entity owned by the state key that no live object maps to. A controller
//! whose live set cannot be built contributes nothing, so the entities of
//! its kind are missing from the retention set and may be deleted by the
//! pass. The controller recreates them once it runs.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::adapters::{CatalogClient, Credentials};
use crate::controllers::ResourceController;
use crate::entity::LiveSet;
use crate::error::Result;

/// Outcome of a stale entity pass
#[derive(Debug, Default)]
pub struct StaleEntitiesReport {
    /// Keys kept in Port
    pub retained: LiveSet,
    /// Kinds whose live set could not be built
    pub failed_controllers: Vec<String>,
}

/// Union of every controller's live set
pub fn collect_live_sets(controllers: &[Arc<dyn ResourceController>]) -> StaleEntitiesReport {
    let mut report = StaleEntitiesReport::default();

    for controller in controllers {
        match controller.live_set() {
            Ok(live) => report.retained.merge(live),
            Err(e) => {
                let kind = controller.kind();
                warn!(kind = %kind, error = %e, "Failed to build live set, entities of this kind are not retained and may be deleted");
                report.failed_controllers.push(kind);
            }
        }
    }

    report
}

/// Delete the entities under `state_key` that no controller's objects map to
///
/// Always re-authenticates first. An authentication failure aborts the pass
/// before anything is deleted. Deletion errors are logged and the report is
/// still returned.
pub async fn delete_stale_entities(
    controllers: &[Arc<dyn ResourceController>],
    catalog: &dyn CatalogClient,
    credentials: &Credentials,
    state_key: &str,
) -> Result<StaleEntitiesReport> {
    let report = collect_live_sets(controllers);

    catalog
        .authenticate(&credentials.client_id, &credentials.client_secret)
        .await
        .inspect_err(|e| error!(error = %e, "Failed to authenticate with Port, skipping stale entity deletion"))?;

    info!(
        state_key = %state_key,
        retained = report.retained.len(),
        failed_controllers = report.failed_controllers.len(),
        "Deleting stale entities"
    );

    if let Err(e) = catalog
        .delete_stale_entities(state_key, &report.retained)
        .await
    {
        error!(state_key = %state_key, error = %e, "Failed to delete stale entities");
    }

    Ok(report)
}
