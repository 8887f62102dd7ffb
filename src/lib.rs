//! Port Kubernetes Exporter
//!
//! Watches configured Kubernetes resource kinds and mirrors them into the
//! Port software catalog as entities, using jq mappings from a YAML file.

pub mod adapters;
pub mod config;
pub mod controllers;
pub mod entity;
pub mod error;
pub mod mapping;
pub mod metrics;
pub mod reconcilers;

pub use error::{Error, Result};
