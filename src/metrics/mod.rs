//! Prometheus metrics for the Port K8s Exporter
//!
//! This module exposes metrics for monitoring exporter health and sync activity.

mod prometheus;

pub use prometheus::*;
