//! Port entities and live entity sets

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A Port catalog entity, keyed by `(blueprint, identifier)`
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct Entity {
    pub identifier: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub title: String,

    pub blueprint: String,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub team: Value,

    #[serde(default)]
    pub properties: BTreeMap<String, Value>,

    #[serde(default)]
    pub relations: BTreeMap<String, Value>,
}

/// Set of entity keys known to be live, grouped by blueprint
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LiveSet {
    entities: BTreeMap<String, BTreeSet<String>>,
}

impl LiveSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entity key as live
    pub fn insert(&mut self, blueprint: impl Into<String>, identifier: impl Into<String>) {
        self.entities
            .entry(blueprint.into())
            .or_default()
            .insert(identifier.into());
    }

    /// Record an entity as live
    pub fn insert_entity(&mut self, entity: &Entity) {
        self.insert(entity.blueprint.clone(), entity.identifier.clone());
    }

    pub fn contains(&self, blueprint: &str, identifier: &str) -> bool {
        self.entities
            .get(blueprint)
            .is_some_and(|ids| ids.contains(identifier))
    }

    /// Union another set into this one
    pub fn merge(&mut self, other: LiveSet) {
        for (blueprint, identifiers) in other.entities {
            self.entities.entry(blueprint).or_default().extend(identifiers);
        }
    }

    /// Number of entity keys
    pub fn len(&self) -> usize {
        self.entities.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identifiers per blueprint
    pub fn blueprints(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.entities.iter().map(|(bp, ids)| (bp.as_str(), ids))
    }
}

impl<B: Into<String>, I: Into<String>> FromIterator<(B, I)> for LiveSet {
    fn from_iter<T: IntoIterator<Item = (B, I)>>(iter: T) -> Self {
        let mut set = LiveSet::new();
        for (blueprint, identifier) in iter {
            set.insert(blueprint, identifier);
        }
        set
    }
}
