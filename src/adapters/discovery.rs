//! Resolution of configured kinds to Kubernetes API resources

use async_trait::async_trait;
use kube::core::GroupVersionResource;
use kube::discovery::{ApiResource, Discovery};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Resolves a configured kind string to a watchable API resource
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KindResolver: Send + Sync {
    async fn resolve(&self, kind: &str) -> Result<ApiResource>;
}

/// Parse `<version>/<resource>` or `<group>/<version>/<resource>`
pub fn parse_kind(kind: &str) -> Result<GroupVersionResource> {
    let parts: Vec<&str> = kind.splitn(3, '/').collect();
    let (group, version, resource) = match parts.as_slice() {
        [version, resource] => ("", *version, *resource),
        [group, version, resource] => (*group, *version, *resource),
        _ => {
            return Err(Error::discovery(format!(
                "invalid kind '{}': expected <version>/<resource> or <group>/<version>/<resource>",
                kind
            )))
        }
    };

    if version.is_empty() || resource.is_empty() {
        return Err(Error::discovery(format!(
            "invalid kind '{}': version and resource must not be empty",
            kind
        )));
    }

    Ok(GroupVersionResource::gvr(group, version, resource))
}

/// Pick the resource whose plural matches `gvr` from one group version
fn find_resource(
    resources: impl IntoIterator<Item = ApiResource>,
    gvr: &GroupVersionResource,
) -> Result<ApiResource> {
    resources
        .into_iter()
        .find(|ar| ar.plural == gvr.resource)
        .ok_or_else(|| {
            let group_version = if gvr.group.is_empty() {
                gvr.version.clone()
            } else {
                format!("{}/{}", gvr.group, gvr.version)
            };
            Error::discovery(format!(
                "resource '{}' not found in {}",
                gvr.resource, group_version
            ))
        })
}

/// Resolver backed by the API server's discovery endpoints
///
/// Discovery runs once, on first use, and is shared by every lookup.
pub struct DiscoveryResolver {
    client: Client,
    discovery: OnceCell<Discovery>,
}

impl DiscoveryResolver {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            discovery: OnceCell::new(),
        }
    }

    async fn discovery(&self) -> Result<&Discovery> {
        self.discovery
            .get_or_try_init(|| async {
                info!("Running API discovery");
                Discovery::new(self.client.clone())
                    .run()
                    .await
                    .map_err(|e| Error::discovery(format!("API discovery failed: {}", e)))
            })
            .await
    }
}

#[async_trait]
impl KindResolver for DiscoveryResolver {
    async fn resolve(&self, kind: &str) -> Result<ApiResource> {
        let gvr = parse_kind(kind)?;
        let discovery = self.discovery().await?;

        let group = discovery.get(&gvr.group).ok_or_else(|| {
            Error::discovery(format!("API group '{}' not served", gvr.group))
        })?;

        let resource = find_resource(
            group
                .versioned_resources(&gvr.version)
                .into_iter()
                .map(|(ar, _caps)| ar),
            &gvr,
        )?;

        debug!(kind = %kind, api_version = %resource.api_version, resource_kind = %resource.kind, "Resolved kind");
        Ok(resource)
    }
}
