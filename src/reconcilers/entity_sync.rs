//! Per-object entity sync
//!
//! Handles the business logic for a single object event:
//! - Selector evaluation
//! - Entity mapping
//! - Upsert or delete in Port

use std::sync::Arc;

use kube::api::DynamicObject;
use kube::ResourceExt;
use serde_json::Value;
use tracing::{debug, warn};

use crate::adapters::{CatalogClient, ObjectEvent, QueryEvaluator};
use crate::config::{AggregatedResource, Selector};
use crate::entity::{Entity, LiveSet};
use crate::error::{Error, Result};
use crate::mapping::EntityMapper;
use crate::metrics;

/// Syncs the objects of one kind to Port
pub struct EntitySyncer {
    resource: AggregatedResource,
    mapper: EntityMapper,
    evaluator: Arc<dyn QueryEvaluator>,
    catalog: Arc<dyn CatalogClient>,
}

impl EntitySyncer {
    pub fn new(
        resource: AggregatedResource,
        mapper: EntityMapper,
        evaluator: Arc<dyn QueryEvaluator>,
        catalog: Arc<dyn CatalogClient>,
    ) -> Self {
        Self {
            resource,
            mapper,
            evaluator,
            catalog,
        }
    }

    pub fn kind(&self) -> &str {
        &self.resource.kind
    }

    fn passes_selector(&self, selector: &Selector, obj: &Value) -> Result<bool> {
        if selector.query.is_empty() {
            return Ok(true);
        }
        self.evaluator.evaluate_to_bool(&selector.query, obj)
    }

    /// Every entity the object maps to under this kind's configuration
    pub fn entities_for(&self, obj: &Value) -> Result<Vec<Entity>> {
        let mut entities = Vec::new();

        for kind_config in &self.resource.kind_configs {
            if !self.passes_selector(&kind_config.selector, obj)? {
                continue;
            }
            for mapping in &kind_config.port.entity.mappings {
                entities.push(self.mapper.new_entity(obj, mapping)?);
            }
        }

        Ok(entities)
    }

    fn mapped_entities(&self, obj: &Value) -> Result<Vec<Entity>> {
        self.entities_for(obj).inspect_err(|_| {
            metrics::MAPPING_FAILURES
                .with_label_values(&[&self.resource.kind])
                .inc();
        })
    }

    /// Upsert every entity the object maps to
    pub async fn apply(&self, obj: &Value) -> Result<()> {
        let entities = self.mapped_entities(obj)?;
        let mut failures = 0usize;

        for entity in &entities {
            match self.catalog.upsert_entity(entity).await {
                Ok(()) => {
                    metrics::ENTITY_UPSERTS
                        .with_label_values(&[&self.resource.kind, "success"])
                        .inc();
                }
                Err(e) => {
                    failures += 1;
                    metrics::ENTITY_UPSERTS
                        .with_label_values(&[&self.resource.kind, "failure"])
                        .inc();
                    warn!(
                        kind = %self.resource.kind,
                        blueprint = %entity.blueprint,
                        identifier = %entity.identifier,
                        error = %e,
                        "Failed to upsert entity"
                    );
                }
            }
        }

        if failures > 0 {
            return Err(Error::catalog(format!(
                "{} of {} entity upserts failed",
                failures,
                entities.len()
            )));
        }
        Ok(())
    }

    /// Delete every entity the object maps to
    pub async fn delete(&self, obj: &Value) -> Result<()> {
        let entities = self.mapped_entities(obj)?;
        let mut failures = 0usize;

        for entity in &entities {
            match self
                .catalog
                .delete_entity(&entity.blueprint, &entity.identifier)
                .await
            {
                Ok(()) => {
                    metrics::ENTITY_DELETIONS
                        .with_label_values(&[&self.resource.kind, "success"])
                        .inc();
                }
                Err(e) => {
                    failures += 1;
                    metrics::ENTITY_DELETIONS
                        .with_label_values(&[&self.resource.kind, "failure"])
                        .inc();
                    warn!(
                        kind = %self.resource.kind,
                        blueprint = %entity.blueprint,
                        identifier = %entity.identifier,
                        error = %e,
                        "Failed to delete entity"
                    );
                }
            }
        }

        if failures > 0 {
            return Err(Error::catalog(format!(
                "{} of {} entity deletions failed",
                failures,
                entities.len()
            )));
        }
        Ok(())
    }

    /// Process one informer event
    pub async fn handle(&self, event: &ObjectEvent) -> Result<()> {
        let _timer = metrics::SYNC_DURATION
            .with_label_values(&[&self.resource.kind])
            .start_timer();

        let obj = event.object();
        debug!(kind = %self.resource.kind, name = %obj.name_any(), namespace = ?obj.namespace(), "Syncing object");

        let value = object_value(obj)?;
        match event {
            ObjectEvent::Applied(_) => self.apply(&value).await,
            ObjectEvent::Deleted(_) => self.delete(&value).await,
        }
    }

    /// Keys of every entity the given objects map to
    ///
    /// Fails as a whole if any object cannot be mapped.
    pub fn live_set<'a>(&self, objects: impl IntoIterator<Item = &'a Value>) -> Result<LiveSet> {
        let mut live = LiveSet::new();
        for obj in objects {
            for entity in self.entities_for(obj)? {
                live.insert_entity(&entity);
            }
        }
        Ok(live)
    }
}

/// JSON form of a dynamic object, as seen by mapping expressions
pub fn object_value(obj: &DynamicObject) -> Result<Value> {
    Ok(serde_json::to_value(obj)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{JqEvaluator, MockCatalogClient};
    use crate::config::{EntityMapping, EntityMappings, KindConfig, PortMapping};
    use mockall::predicate::*;
    use serde_json::json;

    fn kind_config(query: &str, blueprint: &str) -> KindConfig {
        KindConfig {
            selector: Selector {
                query: query.to_string(),
            },
            port: PortMapping {
                entity: EntityMappings {
                    mappings: vec![EntityMapping {
                        identifier: ".metadata.name".to_string(),
                        blueprint: format!("\"{}\"", blueprint),
                        ..Default::default()
                    }],
                },
            },
        }
    }

    fn syncer(kind_configs: Vec<KindConfig>, catalog: MockCatalogClient) -> EntitySyncer {
        let evaluator: Arc<dyn QueryEvaluator> = Arc::new(JqEvaluator::new());
        EntitySyncer::new(
            AggregatedResource {
                kind: "v1/pods".to_string(),
                kind_configs,
            },
            EntityMapper::new(evaluator.clone(), "test"),
            evaluator,
            Arc::new(catalog),
        )
    }

    fn pod(name: &str, namespace: &str) -> Value {
        json!({"metadata": {"name": name, "namespace": namespace}})
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let syncer = syncer(vec![kind_config("", "pod")], MockCatalogClient::new());
        let entities = syncer.entities_for(&pod("web", "prod")).unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].identifier, "web");
    }

    #[test]
    fn test_selector_filters_per_kind_config() {
        let syncer = syncer(
            vec![
                kind_config(r#".metadata.namespace == "prod""#, "prod-pod"),
                kind_config(r#".metadata.namespace == "dev""#, "dev-pod"),
            ],
            MockCatalogClient::new(),
        );

        let entities = syncer.entities_for(&pod("web", "prod")).unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].blueprint, "prod-pod");
    }

    #[test]
    fn test_non_boolean_selector_is_an_error() {
        let syncer = syncer(
            vec![kind_config(".metadata.name", "pod")],
            MockCatalogClient::new(),
        );
        assert!(syncer.entities_for(&pod("web", "prod")).is_err());
    }

    #[test]
    fn test_live_set_covers_all_objects() {
        let syncer = syncer(vec![kind_config("", "pod")], MockCatalogClient::new());
        let objects = vec![pod("a", "prod"), pod("b", "dev")];

        let live = syncer.live_set(&objects).unwrap();

        let expected: LiveSet = [("pod", "a"), ("pod", "b")].into_iter().collect();
        assert_eq!(live, expected);
    }

    #[test]
    fn test_live_set_fails_when_an_object_cannot_be_mapped() {
        let syncer = syncer(vec![kind_config("", "pod")], MockCatalogClient::new());
        let objects = vec![pod("a", "prod"), json!({"metadata": {}})];

        assert!(syncer.live_set(&objects).is_err());
    }

    #[tokio::test]
    async fn test_apply_upserts_mapped_entities() {
        let mut catalog = MockCatalogClient::new();
        catalog
            .expect_upsert_entity()
            .withf(|e| e.blueprint == "pod" && e.identifier == "web")
            .times(1)
            .returning(|_| Ok(()));

        let syncer = syncer(vec![kind_config("", "pod")], catalog);
        syncer.apply(&pod("web", "prod")).await.unwrap();
    }

    #[tokio::test]
    async fn test_apply_skips_unselected_objects() {
        let mut catalog = MockCatalogClient::new();
        catalog.expect_upsert_entity().never();

        let syncer = syncer(vec![kind_config("false", "pod")], catalog);
        syncer.apply(&pod("web", "prod")).await.unwrap();
    }

    #[tokio::test]
    async fn test_mapping_failure_does_not_reach_catalog() {
        let mut catalog = MockCatalogClient::new();
        catalog.expect_upsert_entity().never();

        let syncer = syncer(vec![kind_config("", "pod")], catalog);
        let result = syncer.apply(&json!({"metadata": {"name": 42}})).await;

        assert!(matches!(result, Err(Error::Mapping(_))));
    }

    #[tokio::test]
    async fn test_delete_removes_mapped_entities() {
        let mut catalog = MockCatalogClient::new();
        catalog
            .expect_delete_entity()
            .with(eq("pod"), eq("web"))
            .times(1)
            .returning(|_, _| Ok(()));

        let syncer = syncer(vec![kind_config("", "pod")], catalog);
        syncer.delete(&pod("web", "prod")).await.unwrap();
    }

    #[tokio::test]
    async fn test_upsert_failure_is_reported() {
        let mut catalog = MockCatalogClient::new();
        catalog
            .expect_upsert_entity()
            .returning(|_| Err(Error::catalog("503")));

        let syncer = syncer(vec![kind_config("", "pod")], catalog);
        let err = syncer.apply(&pod("web", "prod")).await.unwrap_err();
        assert!(err.to_string().contains("1 of 1"));
    }
}
