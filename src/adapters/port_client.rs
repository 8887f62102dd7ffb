//! Port API client

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::{Method, RequestBuilder, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::entity::{Entity, LiveSet};
use crate::error::{Error, Result};
use crate::metrics;

/// Datasource name Port records for entities written by this exporter
pub const EXPORTER_NAME: &str = "port-k8s-exporter";

/// Catalog operations the exporter relies on
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Exchange credentials for a fresh access token, replacing any cached one
    async fn authenticate(&self, client_id: &str, client_secret: &str) -> Result<String>;

    /// Delete every entity under `state_key` whose key is not in `retain`
    async fn delete_stale_entities(&self, state_key: &str, retain: &LiveSet) -> Result<()>;

    /// Create or merge-update an entity
    async fn upsert_entity(&self, entity: &Entity) -> Result<()>;

    /// Delete a single entity
    async fn delete_entity(&self, blueprint: &str, identifier: &str) -> Result<()>;
}

/// Port API credentials
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Port client settings
#[derive(Debug, Clone)]
pub struct PortClientConfig {
    pub base_url: String,
    pub credentials: Credentials,
    pub state_key: String,
    pub delete_dependents: bool,
    pub create_missing_related_entities: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AccessTokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessTokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    entities: Vec<EntityRef>,
}

/// Key of an entity returned by a search
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EntityRef {
    pub identifier: String,
    pub blueprint: String,
}

/// Search rule of the entity search endpoint
#[derive(Debug, Clone, Serialize)]
pub struct Rule {
    pub property: String,
    pub operator: String,
    pub value: String,
}

/// HTTP client for the Port REST API
pub struct PortClient {
    http: reqwest::Client,
    config: PortClientConfig,
    token: RwLock<Option<String>>,
}

impl PortClient {
    pub fn new(config: PortClientConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent(&config.state_key))
            .build()?;

        Ok(Self {
            http,
            config: PortClientConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config
            },
            token: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// URL of a blueprint's entity collection, or of one entity in it
    ///
    /// Blueprint and identifier are pushed as single path segments, so `/`,
    /// `#` and `?` in them are percent-encoded.
    fn entity_url(&self, blueprint: &str, identifier: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&self.config.base_url).map_err(|e| {
            Error::config(format!(
                "invalid Port base URL '{}': {}",
                self.config.base_url, e
            ))
        })?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                Error::config(format!(
                    "Port base URL '{}' cannot have a path",
                    self.config.base_url
                ))
            })?;
            segments
                .pop_if_empty()
                .extend(["v1", "blueprints", blueprint, "entities"]);
            if let Some(identifier) = identifier {
                segments.push(identifier);
            }
        }
        Ok(url)
    }

    async fn token(&self) -> Result<String> {
        if let Some(token) = self.token.read().await.as_ref() {
            return Ok(token.clone());
        }
        self.authenticate(
            &self.config.credentials.client_id,
            &self.config.credentials.client_secret,
        )
        .await
    }

    /// Send an authorized request, re-authenticating once on 401
    async fn send<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&reqwest::Client) -> RequestBuilder,
    {
        let token = self.token().await?;
        let response = build(&self.http).bearer_auth(&token).send().await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return check_status(response).await;
        }

        debug!("Port token rejected, re-authenticating");
        let token = self
            .authenticate(
                &self.config.credentials.client_id,
                &self.config.credentials.client_secret,
            )
            .await?;
        let response = build(&self.http).bearer_auth(&token).send().await?;
        check_status(response).await
    }

    /// Search entities matching every rule
    pub async fn search_entities(&self, rules: &[Rule]) -> Result<Vec<EntityRef>> {
        let body = json!({ "combinator": "and", "rules": rules });
        let url = self.url("/v1/entities/search");
        let response = self
            .send(|http| http.request(Method::POST, &url).json(&body))
            .await?;
        let parsed: SearchResponse = response.json().await?;
        Ok(parsed.entities)
    }
}

/// User agent carrying the state key, recorded by Port as the entity datasource
pub fn user_agent(state_key: &str) -> String {
    format!(
        "{}/{} (statekey/{})",
        EXPORTER_NAME,
        env!("CARGO_PKG_VERSION"),
        state_key
    )
}

/// Search rules selecting the entities owned by one state key
pub fn state_key_rules(state_key: &str) -> Vec<Rule> {
    vec![
        Rule {
            property: "$datasource".to_string(),
            operator: "contains".to_string(),
            value: EXPORTER_NAME.to_string(),
        },
        Rule {
            property: "$datasource".to_string(),
            operator: "contains".to_string(),
            value: format!("(statekey/{})", state_key),
        },
    ]
}

/// Entities of `candidates` that are not retained
pub fn stale_entities<'a>(candidates: &'a [EntityRef], retain: &LiveSet) -> Vec<&'a EntityRef> {
    candidates
        .iter()
        .filter(|e| !retain.contains(&e.blueprint, &e.identifier))
        .collect()
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(Error::catalog(format!("{} {}: {}", status, url, body)))
}

#[async_trait]
impl CatalogClient for PortClient {
    async fn authenticate(&self, client_id: &str, client_secret: &str) -> Result<String> {
        let response = self
            .http
            .post(self.url("/v1/auth/access_token"))
            .json(&AccessTokenRequest {
                client_id,
                client_secret,
            })
            .send()
            .await?;
        let response = check_status(response).await?;
        let parsed: AccessTokenResponse = response.json().await?;

        *self.token.write().await = Some(parsed.access_token.clone());
        debug!("Authenticated with Port");
        Ok(parsed.access_token)
    }

    async fn delete_stale_entities(&self, state_key: &str, retain: &LiveSet) -> Result<()> {
        let candidates = self.search_entities(&state_key_rules(state_key)).await?;
        let stale = stale_entities(&candidates, retain);

        info!(
            state_key = %state_key,
            owned = candidates.len(),
            retained = retain.len(),
            stale = stale.len(),
            "Deleting stale entities"
        );

        let mut failures = 0usize;
        for entity in stale {
            match self.delete_entity(&entity.blueprint, &entity.identifier).await {
                Ok(()) => metrics::STALE_ENTITIES_DELETED.inc(),
                Err(e) => {
                    failures += 1;
                    warn!(
                        blueprint = %entity.blueprint,
                        identifier = %entity.identifier,
                        error = %e,
                        "Failed to delete stale entity"
                    );
                }
            }
        }

        if failures > 0 {
            return Err(Error::catalog(format!(
                "failed to delete {} stale entities",
                failures
            )));
        }
        Ok(())
    }

    async fn upsert_entity(&self, entity: &Entity) -> Result<()> {
        let url = self.entity_url(&entity.blueprint, None)?;
        let query = [
            ("upsert", "true".to_string()),
            ("merge", "true".to_string()),
            (
                "create_missing_related_entities",
                self.config.create_missing_related_entities.to_string(),
            ),
        ];
        self.send(|http| {
            http.request(Method::POST, url.clone())
                .query(&query)
                .json(entity)
        })
            .await?;
        debug!(blueprint = %entity.blueprint, identifier = %entity.identifier, "Upserted entity");
        Ok(())
    }

    async fn delete_entity(&self, blueprint: &str, identifier: &str) -> Result<()> {
        let url = self.entity_url(blueprint, Some(identifier))?;
        let query = [("delete_dependents", self.config.delete_dependents.to_string())];
        self.send(|http| http.request(Method::DELETE, url.clone()).query(&query))
            .await?;
        debug!(blueprint = %blueprint, identifier = %identifier, "Deleted entity");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(blueprint: &str, identifier: &str) -> EntityRef {
        EntityRef {
            blueprint: blueprint.to_string(),
            identifier: identifier.to_string(),
        }
    }

    #[test]
    fn test_user_agent_carries_state_key() {
        let ua = user_agent("cluster-a");
        assert!(ua.starts_with("port-k8s-exporter/"));
        assert!(ua.ends_with("(statekey/cluster-a)"));
    }

    #[test]
    fn test_state_key_rules_match_user_agent() {
        let rules = state_key_rules("cluster-a");
        let ua = user_agent("cluster-a");
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|r| ua.contains(&r.value)));
        assert!(rules.iter().all(|r| r.property == "$datasource"));
    }

    #[test]
    fn test_stale_entities_excludes_retained_keys() {
        let candidates = vec![
            entity("svc", "a1"),
            entity("svc", "gone"),
            entity("db", "a1"),
        ];
        let retain: LiveSet = [("svc", "a1")].into_iter().collect();

        let stale: Vec<_> = stale_entities(&candidates, &retain)
            .into_iter()
            .map(|e| (e.blueprint.as_str(), e.identifier.as_str()))
            .collect();

        assert_eq!(stale, vec![("svc", "gone"), ("db", "a1")]);
    }

    #[test]
    fn test_search_response_tolerates_extra_and_null_fields() {
        let raw = r#"{"ok": true, "entities": [
            {"identifier": "web", "blueprint": "pod", "title": null, "team": [], "createdAt": "2024-01-01"}
        ]}"#;
        let parsed: SearchResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.entities, vec![entity("pod", "web")]);
    }

    #[test]
    fn test_credentials_debug_hides_secret() {
        let credentials = Credentials {
            client_id: "id".to_string(),
            client_secret: "hunter2".to_string(),
        };
        let rendered = format!("{:?}", credentials);
        assert!(rendered.contains("id"));
        assert!(!rendered.contains("hunter2"));
    }

    fn client(base_url: &str) -> PortClient {
        PortClient::new(PortClientConfig {
            base_url: base_url.to_string(),
            credentials: Credentials {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
            },
            state_key: "k".to_string(),
            delete_dependents: false,
            create_missing_related_entities: false,
        })
        .unwrap()
    }

    #[test]
    fn test_base_url_trailing_slash_is_trimmed() {
        let client = client("https://api.example.com/");

        assert_eq!(
            client.url("/v1/entities/search"),
            "https://api.example.com/v1/entities/search"
        );
    }

    #[test]
    fn test_entity_url_encodes_each_segment() {
        let client = client("https://api.example.com");

        let url = client.entity_url("pod", Some("default/web")).unwrap();
        assert_eq!(url.path(), "/v1/blueprints/pod/entities/default%2Fweb");
        assert_eq!(url.fragment(), None);

        let url = client.entity_url("pod", Some("a#b?c")).unwrap();
        assert_eq!(url.path(), "/v1/blueprints/pod/entities/a%23b%3Fc");
        assert_eq!(url.query(), None);

        let url = client.entity_url("my/bp", None).unwrap();
        assert_eq!(url.path(), "/v1/blueprints/my%2Fbp/entities");
    }

    #[test]
    fn test_entity_url_keeps_base_path() {
        let client = client("https://proxy.example.com/port/");
        let url = client.entity_url("pod", Some("web")).unwrap();
        assert_eq!(url.path(), "/port/v1/blueprints/pod/entities/web");
    }

    /// Accept one request, answer 200 and return its request line
    async fn capture_request_line(listener: tokio::net::TcpListener) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (mut stream, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 1024];
        while !received.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            received.extend_from_slice(&buf[..n]);
        }
        stream
            .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
            .await
            .unwrap();

        let head = String::from_utf8_lossy(&received).to_string();
        head.lines().next().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn test_delete_entity_targets_the_exact_identifier() {
        for (identifier, expected) in [
            ("default/web", "DELETE /v1/blueprints/pod/entities/default%2Fweb?delete_dependents=false HTTP/1.1"),
            ("a#b", "DELETE /v1/blueprints/pod/entities/a%23b?delete_dependents=false HTTP/1.1"),
        ] {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let server = tokio::spawn(capture_request_line(listener));

            let client = client(&format!("http://{}", addr));
            *client.token.write().await = Some("token".to_string());
            client.delete_entity("pod", identifier).await.unwrap();

            assert_eq!(server.await.unwrap(), expected);
        }
    }
}
