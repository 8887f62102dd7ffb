//! Resource mapping configuration

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One `resources` entry of the exporter configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConfig {
    /// Resource type, as `<version>/<resource>` or `<group>/<version>/<resource>`
    pub kind: String,

    /// Which objects of this kind are exported
    #[serde(default)]
    pub selector: Selector,

    /// How selected objects become Port entities
    pub port: PortMapping,
}

/// jq predicate deciding whether an object is exported
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    /// Boolean jq expression. Empty selects every object.
    #[serde(default)]
    pub query: String,
}

/// Port side of a resource entry
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    /// Entity mappings applied to each selected object
    pub entity: EntityMappings,
}

/// Entity mappings of a resource entry
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntityMappings {
    /// Each mapping produces one entity per selected object
    pub mappings: Vec<EntityMapping>,
}

/// Declarative jq expressions for every entity field
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EntityMapping {
    /// Identifier expression (required, must yield a string)
    pub identifier: String,

    /// Title expression
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,

    /// Blueprint expression (required, must yield a string)
    pub blueprint: String,

    /// Team expression, may yield any JSON value
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub team: String,

    /// Property name to expression
    #[serde(default)]
    pub properties: BTreeMap<String, String>,

    /// Relation name to expression
    #[serde(default)]
    pub relations: BTreeMap<String, String>,
}

/// Selector and Port mapping of one resource entry, once grouped by kind
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KindConfig {
    pub selector: Selector,
    pub port: PortMapping,
}

/// All resource entries sharing a kind
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AggregatedResource {
    pub kind: String,
    pub kind_configs: Vec<KindConfig>,
}

/// Group resource entries by kind.
///
/// Kinds come out in order of first appearance and entries keep their input
/// order within a kind. Duplicate entries are kept.
pub fn aggregate_resources(resources: &[ResourceConfig]) -> Vec<AggregatedResource> {
    let mut aggregated: Vec<AggregatedResource> = Vec::new();

    for resource in resources {
        let kind_config = KindConfig {
            selector: resource.selector.clone(),
            port: resource.port.clone(),
        };

        match aggregated.iter_mut().find(|agg| agg.kind == resource.kind) {
            Some(existing) => existing.kind_configs.push(kind_config),
            None => aggregated.push(AggregatedResource {
                kind: resource.kind.clone(),
                kind_configs: vec![kind_config],
            }),
        }
    }

    aggregated
}
