//! Exporter configuration
//!
//! Resource mappings come from a YAML file; everything else from command line
//! flags or their environment variables.

mod exporter;
mod resource;

pub use exporter::*;
pub use resource::*;
