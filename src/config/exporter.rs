//! Exporter settings: command line, environment and the resources file

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::resource::ResourceConfig;

/// Default Port API endpoint
pub const DEFAULT_PORT_BASE_URL: &str = "https://api.getport.io";

/// Command line arguments, each also readable from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "port-k8s-exporter", version, about)]
pub struct ExporterArgs {
    /// Path to the resources configuration file
    #[arg(long = "config", env = "CONFIG_FILE_PATH", default_value = "config.yaml")]
    pub config_file_path: PathBuf,

    /// Scope tag owning the entities this exporter creates
    #[arg(long, env = "STATE_KEY")]
    pub state_key: String,

    /// Informer resync interval in minutes, 0 disables resync
    #[arg(long, env = "RESYNC_INTERVAL", default_value_t = 0)]
    pub resync_interval: u64,

    /// Port API base URL
    #[arg(long, env = "PORT_BASE_URL", default_value = DEFAULT_PORT_BASE_URL)]
    pub port_base_url: String,

    /// Port client ID
    #[arg(long, env = "PORT_CLIENT_ID")]
    pub port_client_id: String,

    /// Port client secret
    #[arg(long, env = "PORT_CLIENT_SECRET", hide_env_values = true)]
    pub port_client_secret: String,

    /// Value substituted for `{CLUSTER_NAME}` in mapping expressions
    #[arg(long, env = "CLUSTER_NAME", default_value = "")]
    pub cluster_name: String,

    /// Workers per controller
    #[arg(long, env = "WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Metrics and health server port
    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    pub metrics_port: u16,
}

/// Contents of the resources configuration file
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,

    /// Delete dependent entities along with a deleted entity
    #[serde(default)]
    pub delete_dependents: bool,

    /// Create placeholder entities for relation targets that do not exist
    #[serde(default)]
    pub create_missing_related_entities: bool,
}

impl ConfigFile {
    /// Read and validate a configuration file
    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("Failed to read '{}': {}", path.display(), e))
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse and validate configuration YAML
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let config: ConfigFile = serde_yaml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the fields the exporter cannot run without
    pub fn validate(&self) -> Result<()> {
        for (index, resource) in self.resources.iter().enumerate() {
            if resource.kind.trim().is_empty() {
                return Err(Error::config(format!(
                    "resources[{}]: kind must not be empty",
                    index
                )));
            }
            for (mapping_index, mapping) in resource.port.entity.mappings.iter().enumerate() {
                if mapping.identifier.trim().is_empty() {
                    return Err(Error::config(format!(
                        "resources[{}] ({}): mapping {} is missing an identifier",
                        index, resource.kind, mapping_index
                    )));
                }
                if mapping.blueprint.trim().is_empty() {
                    return Err(Error::config(format!(
                        "resources[{}] ({}): mapping {} is missing a blueprint",
                        index, resource.kind, mapping_index
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Fully resolved exporter configuration
#[derive(Clone, Debug)]
pub struct ExporterConfig {
    pub resources: Vec<ResourceConfig>,
    pub state_key: String,
    pub resync_interval: Duration,
    pub delete_dependents: bool,
    pub create_missing_related_entities: bool,
}

impl ExporterConfig {
    /// Combine command line settings with the resources file
    pub fn load(args: &ExporterArgs) -> Result<Self> {
        let file = ConfigFile::from_path(&args.config_file_path)?;
        Self::from_parts(args, file)
    }

    /// Build a configuration from already parsed parts
    pub fn from_parts(args: &ExporterArgs, file: ConfigFile) -> Result<Self> {
        if args.state_key.trim().is_empty() {
            return Err(Error::config("state key must not be empty"));
        }

        Ok(Self {
            resources: file.resources,
            state_key: args.state_key.clone(),
            resync_interval: Duration::from_secs(args.resync_interval * 60),
            delete_dependents: file.delete_dependents,
            create_missing_related_entities: file.create_missing_related_entities,
        })
    }
}
