//! Error types for the Port K8s Exporter

use thiserror::Error;

/// Result type alias using the exporter's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Exporter error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Resource kind could not be resolved to an API resource
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// jq expression failed to compile or evaluate
    #[error("Query error: {0}")]
    Query(String),

    /// Entity could not be built from an object
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// Port API returned an error
    #[error("Port API error: {0}")]
    Catalog(String),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Informer cache did not sync
    #[error("Cache sync error: {0}")]
    CacheSync(String),

    /// No kind could be resolved, nothing to watch
    #[error("Failed to initiate a controller for all resources")]
    NoControllers,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a discovery error
    pub fn discovery(msg: impl Into<String>) -> Self {
        Error::Discovery(msg.into())
    }

    /// Create a query error
    pub fn query(msg: impl Into<String>) -> Self {
        Error::Query(msg.into())
    }

    /// Create a mapping error
    pub fn mapping(msg: impl Into<String>) -> Self {
        Error::Mapping(msg.into())
    }

    /// Create a Port API error
    pub fn catalog(msg: impl Into<String>) -> Self {
        Error::Catalog(msg.into())
    }

    /// Create a cache sync error
    pub fn cache_sync(msg: impl Into<String>) -> Self {
        Error::CacheSync(msg.into())
    }
}
