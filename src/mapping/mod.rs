//! Mapping of Kubernetes objects to Port entities
//!
//! Every entity field is a jq expression evaluated against the raw object.
//! `{CLUSTER_NAME}` in any expression is replaced with the configured cluster
//! name first.

mod entity;
mod placeholder;

pub use entity::EntityMapper;
pub use placeholder::{
    cluster_name_literal, replace_placeholder, replace_placeholders_in_map,
    CLUSTER_NAME_PLACEHOLDER,
};
