//! Reconcilers keeping Port in line with the cluster
//!
//! - `entity_sync` applies one object's change to its Port entities
//! - `stale_entities` removes Port entities no live object maps to

pub mod entity_sync;
pub mod stale_entities;
