//! Integration tests for configuration loading and entity mapping
//!
//! These tests drive the public API with the real jq evaluator, from a
//! resources file down to the entities sent to Port.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use port_k8s_exporter::adapters::{JqEvaluator, QueryEvaluator};
use port_k8s_exporter::config::{
    aggregate_resources, ConfigFile, EntityMapping, EntityMappings, PortMapping, ResourceConfig,
    Selector,
};
use port_k8s_exporter::mapping::EntityMapper;
use port_k8s_exporter::Error;

// ============================================================================
// Test Helpers
// ============================================================================

fn mapper(cluster_name: &str) -> EntityMapper {
    let evaluator: Arc<dyn QueryEvaluator> = Arc::new(JqEvaluator::new());
    EntityMapper::new(evaluator, cluster_name)
}

fn resource(kind: &str, query: &str) -> ResourceConfig {
    ResourceConfig {
        kind: kind.to_string(),
        selector: Selector {
            query: query.to_string(),
        },
        port: PortMapping {
            entity: EntityMappings {
                mappings: vec![EntityMapping {
                    identifier: ".metadata.name".to_string(),
                    blueprint: r#""workload""#.to_string(),
                    ..Default::default()
                }],
            },
        },
    }
}

const CONFIG_YAML: &str = r#"
deleteDependents: true
createMissingRelatedEntities: true
resources:
  - kind: apps/v1/deployments
    selector:
      query: .metadata.namespace | startswith("kube") | not
    port:
      entity:
        mappings:
          - identifier: '.metadata.name + "-" + {CLUSTER_NAME}'
            title: .metadata.name
            blueprint: '"deployment"'
            team: .metadata.labels.team
            properties:
              replicas: .spec.replicas
              cluster: '{CLUSTER_NAME}'
            relations:
              namespace: .metadata.namespace
  - kind: v1/namespaces
    port:
      entity:
        mappings:
          - identifier: .metadata.name
            blueprint: '"namespace"'
"#;

// ============================================================================
// Configuration Tests
// ============================================================================

#[test]
fn test_config_file_loads_camel_case_keys() {
    let config = ConfigFile::from_yaml(CONFIG_YAML).unwrap();

    assert!(config.delete_dependents);
    assert!(config.create_missing_related_entities);
    assert_eq!(config.resources.len(), 2);
    assert_eq!(config.resources[1].selector.query, "");

    let mapping = &config.resources[0].port.entity.mappings[0];
    assert_eq!(mapping.title, ".metadata.name");
    assert_eq!(mapping.properties.len(), 2);
    assert_eq!(mapping.relations["namespace"], ".metadata.namespace");
}

#[test]
fn test_config_file_without_identifier_fails_validation() {
    let yaml = r#"
resources:
  - kind: v1/pods
    port:
      entity:
        mappings:
          - identifier: ""
            blueprint: '"pod"'
"#;
    let result = ConfigFile::from_yaml(yaml);
    assert!(matches!(result, Err(Error::Config(_))));
}

#[test]
fn test_aggregation_keeps_every_entry_once() {
    let resources = vec![
        resource("v1/pods", ""),
        resource("apps/v1/deployments", ""),
        resource("v1/pods", r#".metadata.namespace == "prod""#),
        resource("v1/pods", ""),
    ];

    let aggregated = aggregate_resources(&resources);

    let kinds: Vec<&str> = aggregated.iter().map(|a| a.kind.as_str()).collect();
    assert_eq!(kinds, vec!["v1/pods", "apps/v1/deployments"]);

    let total: usize = aggregated.iter().map(|a| a.kind_configs.len()).sum();
    assert_eq!(total, resources.len());
    assert_eq!(aggregated[0].kind_configs.len(), 3);
    assert_eq!(
        aggregated[0].kind_configs[1].selector.query,
        r#".metadata.namespace == "prod""#
    );
}

// ============================================================================
// Mapping Tests
// ============================================================================

#[test]
fn test_basic_mapping() {
    let mapping = EntityMapping {
        identifier: ".id".to_string(),
        blueprint: r#""service""#.to_string(),
        properties: BTreeMap::from([("env".to_string(), ".metadata.env".to_string())]),
        ..Default::default()
    };
    let obj = json!({"id": "x", "metadata": {"env": "prod"}});

    let entity = mapper("").new_entity(&obj, &mapping).unwrap();

    assert_eq!(entity.identifier, "x");
    assert_eq!(entity.blueprint, "service");
    assert_eq!(entity.properties["env"], json!("prod"));
    assert_eq!(entity.title, "");
    assert_eq!(entity.team, Value::Null);
    assert!(entity.relations.is_empty());
}

#[test]
fn test_cluster_name_placeholder() {
    let mapping = EntityMapping {
        identifier: "{CLUSTER_NAME}".to_string(),
        blueprint: r#""cluster""#.to_string(),
        ..Default::default()
    };

    let entity = mapper("prod-eu").new_entity(&json!({}), &mapping).unwrap();
    assert_eq!(entity.identifier, "prod-eu");
}

#[test]
fn test_missing_cluster_name_substitutes_empty_string() {
    let mapping = EntityMapping {
        identifier: r#"{CLUSTER_NAME} + "x""#.to_string(),
        blueprint: r#""cluster""#.to_string(),
        ..Default::default()
    };

    let entity = mapper("").new_entity(&json!({}), &mapping).unwrap();
    assert_eq!(entity.identifier, "x");
}

#[test]
fn test_blueprint_failure_only_affects_that_object() {
    let mapping = EntityMapping {
        identifier: ".metadata.name".to_string(),
        blueprint: ".spec.kind".to_string(),
        ..Default::default()
    };
    let mapper = mapper("");
    let good = json!({"metadata": {"name": "a"}, "spec": {"kind": "svc"}});
    let bad = json!({"metadata": {"name": "b"}, "spec": {"kind": 7}});

    assert!(matches!(
        mapper.new_entity(&bad, &mapping),
        Err(Error::Mapping(_))
    ));

    let entity = mapper.new_entity(&good, &mapping).unwrap();
    assert_eq!(entity.blueprint, "svc");
}

#[test]
fn test_mapping_is_idempotent() {
    let config = ConfigFile::from_yaml(CONFIG_YAML).unwrap();
    let mapping = &config.resources[0].port.entity.mappings[0];
    let obj = json!({
        "metadata": {"name": "api", "namespace": "prod", "labels": {"team": ["core"]}},
        "spec": {"replicas": 3}
    });
    let mapper = mapper("prod-eu");

    let first = mapper.new_entity(&obj, mapping).unwrap();
    let second = mapper.new_entity(&obj, mapping).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.identifier, "api-prod-eu");
    assert_eq!(first.title, "api");
    assert_eq!(first.team, json!(["core"]));
    assert_eq!(first.properties["replicas"], json!(3));
    assert_eq!(first.properties["cluster"], json!("prod-eu"));
    assert_eq!(first.relations["namespace"], json!("prod"));
}

#[test]
fn test_entity_serializes_without_empty_fields() {
    let mapping = EntityMapping {
        identifier: ".metadata.name".to_string(),
        blueprint: r#""pod""#.to_string(),
        ..Default::default()
    };
    let entity = mapper("")
        .new_entity(&json!({"metadata": {"name": "web"}}), &mapping)
        .unwrap();

    let body = serde_json::to_value(&entity).unwrap();
    assert_eq!(body["identifier"], "web");
    assert!(body.get("title").is_none());
    assert!(body.get("team").is_none());
}
