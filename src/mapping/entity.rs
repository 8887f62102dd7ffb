//! Entity construction from a single object

use std::sync::Arc;

use serde_json::Value;

use crate::adapters::QueryEvaluator;
use crate::config::EntityMapping;
use crate::entity::Entity;
use crate::error::{Error, Result};

use super::placeholder::{cluster_name_literal, replace_placeholder, replace_placeholders_in_map};

/// Builds entities from objects using declarative mappings
///
/// The mapper holds no mutable state, so one instance is shared by every
/// controller.
#[derive(Clone)]
pub struct EntityMapper {
    evaluator: Arc<dyn QueryEvaluator>,
    cluster_literal: String,
}

impl EntityMapper {
    /// Create a mapper substituting `cluster_name` for `{CLUSTER_NAME}`
    pub fn new(evaluator: Arc<dyn QueryEvaluator>, cluster_name: &str) -> Self {
        Self {
            evaluator,
            cluster_literal: cluster_name_literal(cluster_name),
        }
    }

    /// Build one entity, or fail without producing a partial one
    pub fn new_entity(&self, obj: &Value, mapping: &EntityMapping) -> Result<Entity> {
        let identifier = self.string_field("identifier", &mapping.identifier, obj)?;
        let blueprint = self.string_field("blueprint", &mapping.blueprint, obj)?;

        let title = if mapping.title.is_empty() {
            String::new()
        } else {
            self.string_field("title", &mapping.title, obj)?
        };

        let team = if mapping.team.is_empty() {
            Value::Null
        } else {
            self.evaluator
                .evaluate_to_value(&self.substitute(&mapping.team), obj)
                .map_err(|e| field_error("team", e))?
        };

        let properties = self
            .evaluator
            .evaluate_map_to_values(
                &replace_placeholders_in_map(&mapping.properties, &self.cluster_literal),
                obj,
            )
            .map_err(|e| field_error("properties", e))?;

        let relations = self
            .evaluator
            .evaluate_map_to_values(
                &replace_placeholders_in_map(&mapping.relations, &self.cluster_literal),
                obj,
            )
            .map_err(|e| field_error("relations", e))?;

        Ok(Entity {
            identifier,
            title,
            blueprint,
            team,
            properties,
            relations,
        })
    }

    fn substitute(&self, expr: &str) -> String {
        replace_placeholder(expr, &self.cluster_literal)
    }

    fn string_field(&self, field: &str, expr: &str, obj: &Value) -> Result<String> {
        self.evaluator
            .evaluate_to_string(&self.substitute(expr), obj)
            .map_err(|e| field_error(field, e))
    }
}

fn field_error(field: &str, err: Error) -> Error {
    Error::mapping(format!("{}: {}", field, err))
}
