//! Analytics service adapter (REST, HTTP Basic auth)

use super::{AdapterKind, InsightAdapter, ADAPTER_KEY};
use crate::context::ForwarderConfig;
use crate::error::{Error, Result};
use crate::models::{Approval, ContainerKey, Insight, ResourceBlock};
use crate::process::CommandRunner;
use crate::prompt::Prompter;
use crate::secrets::{SecretBag, SecretStore, ADAPTER_SECRET};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

pub const URL_KEY: &str = "analyticsUrl";
pub const USER_KEY: &str = "analyticsUser";
pub const PASSWORD_KEY: &str = "analyticsPassword";

const API_ROOT: &str = "CIRBA/api/v2/";
const ANALYSES_PATH: &str = "analysis/containers/kubernetes";
const APPROVAL_ATTRIBUTE_ID: &str = "attr_ApprovalSetting";
const APPROVAL_ATTRIBUTE_NAME: &str = "Approval Setting";

/// REST client for the analytics API
pub struct ApiClient {
    client: Client,
    base_url: Url,
    user: String,
    password: String,
}

impl ApiClient {
    pub fn new(url: &str, user: &str, password: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let client = Client::builder().default_headers(headers).build()?;

        let root = format!("{}/{}", url.trim_end_matches('/'), API_ROOT);
        let base_url = Url::parse(&root)
            .map_err(|e| Error::Parse(format!("invalid analytics URL {}: {}", url, e)))?;

        Ok(Self {
            client,
            base_url,
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Parse(format!("invalid API path {}: {}", path, e)))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Transport(format!("API error ({}): {}", status, body)));
        }

        Ok(response)
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.url(path)?;
        let response = self.send(self.client.get(url)).await?;
        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| Error::Transport(format!("unreadable response from {}: {}", path, e)))
    }

    /// Make a POST request with JSON body, discarding the response
    pub async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<()> {
        let url = self.url(path)?;
        self.send(self.client.post(url).json(body)).await?;
        Ok(())
    }

    /// Make a PUT request with JSON body, discarding the response
    pub async fn put<B: Serialize>(&self, path: &str, body: &B) -> Result<()> {
        let url = self.url(path)?;
        self.send(self.client.put(url).json(body)).await?;
        Ok(())
    }
}

// API types

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    pub analysis_name: String,
    pub analysis_id: String,
}

/// One container analysis result
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InsightRecord {
    pub cluster: String,
    pub namespace: String,
    pub controller_type: String,
    pub pod_service: String,
    pub container: String,
    pub entity_id: String,
    #[serde(deserialize_with = "quantity")]
    pub current_cpu_limit: Option<i64>,
    #[serde(deserialize_with = "quantity")]
    pub current_mem_limit: Option<i64>,
    #[serde(deserialize_with = "quantity")]
    pub current_cpu_request: Option<i64>,
    #[serde(deserialize_with = "quantity")]
    pub current_mem_request: Option<i64>,
    #[serde(deserialize_with = "quantity")]
    pub recommended_cpu_limit: Option<i64>,
    #[serde(deserialize_with = "quantity")]
    pub recommended_mem_limit: Option<i64>,
    #[serde(deserialize_with = "quantity")]
    pub recommended_cpu_request: Option<i64>,
    #[serde(deserialize_with = "quantity")]
    pub recommended_mem_request: Option<i64>,
}

impl InsightRecord {
    pub fn key(&self) -> ContainerKey {
        ContainerKey::new(
            &self.cluster,
            &self.namespace,
            &self.controller_type,
            &self.pod_service,
            &self.container,
        )
    }

    pub fn current(&self) -> Option<ResourceBlock> {
        ResourceBlock::new(
            self.current_cpu_limit?,
            self.current_mem_limit?,
            self.current_cpu_request?,
            self.current_mem_request?,
        )
    }

    pub fn recommended(&self) -> Option<ResourceBlock> {
        ResourceBlock::new(
            self.recommended_cpu_limit?,
            self.recommended_mem_limit?,
            self.recommended_cpu_request?,
            self.recommended_mem_request?,
        )
    }

    /// Recommended block when approved and valid, else the current block
    pub fn select(&self, approval: Approval) -> Result<Insight> {
        if approval.is_approved() {
            if let Some(resources) = self.recommended() {
                return Ok(Insight {
                    resources,
                    approval: Approval::Approved,
                });
            }
        }

        match self.current() {
            Some(resources) => Ok(Insight {
                resources,
                approval: Approval::NotApproved,
            }),
            None => Err(Error::InvalidSpec(format!(
                "invalid resource specs received for {}",
                self.key()
            ))),
        }
    }
}

/// A quantity that may be absent, null, fractional or a digit string
///
/// Anything that is not a whole number reads as missing.
fn quantity<'de, D>(deserializer: D) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[derive(Debug, Deserialize)]
struct System {
    #[serde(default)]
    attributes: Vec<Attribute>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Attribute {
    #[serde(default, skip_serializing)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeRequest<'a> {
    user_name: &'a str,
    pwd: &'a str,
}

/// Every analysed container of one cluster
type ClusterInsights = HashMap<ContainerKey, InsightRecord>;

pub struct AnalyticsAdapter {
    runner: Arc<dyn CommandRunner>,
    secrets: Arc<dyn SecretStore>,
    kubectl: String,
    client: Option<ApiClient>,
    cache: Mutex<HashMap<String, ClusterInsights>>,
}

impl AnalyticsAdapter {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        secrets: Arc<dyn SecretStore>,
        kubectl: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            secrets,
            kubectl: kubectl.into(),
            client: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Use an already validated client
    pub fn with_client(mut self, client: ApiClient) -> Self {
        self.client = Some(client);
        self
    }

    fn client(&self) -> Result<&ApiClient> {
        self.client
            .as_ref()
            .ok_or_else(|| Error::Credential("analytics adapter is not initialized".into()))
    }

    async fn validate(url: &str, user: &str, password: &str) -> Result<ApiClient> {
        let client = ApiClient::new(url, user, password)?;
        client
            .post(
                "authorize",
                &AuthorizeRequest {
                    user_name: user,
                    pwd: password,
                },
            )
            .await?;
        Ok(client)
    }

    async fn clear_credentials(&self) -> Result<()> {
        for key in [URL_KEY, USER_KEY, PASSWORD_KEY] {
            self.secrets.delete_key(ADAPTER_SECRET, key).await?;
        }
        Ok(())
    }

    /// Look up one record, fetching the cluster's analysis on first use
    async fn lookup(&self, key: &ContainerKey) -> Result<InsightRecord> {
        let mut cache = self.cache.lock().await;

        if !cache.contains_key(&key.cluster) {
            let insights = self.fetch_cluster(&key.cluster).await?;
            cache.insert(key.cluster.clone(), insights);
        }

        cache
            .get(&key.cluster)
            .and_then(|insights| insights.get(key))
            .cloned()
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn fetch_cluster(&self, cluster: &str) -> Result<ClusterInsights> {
        let client = self.client()?;

        let analyses: Vec<Analysis> = client.get(ANALYSES_PATH).await?;
        let analysis = analyses
            .iter()
            .find(|a| a.analysis_name == cluster)
            .ok_or_else(|| Error::NotFound(format!("no analysis for cluster {}", cluster)))?;

        let raw: Vec<serde_json::Value> = client
            .get(&format!("{}/{}/results", ANALYSES_PATH, analysis.analysis_id))
            .await?;

        let mut insights = ClusterInsights::new();
        for value in raw {
            match serde_json::from_value::<InsightRecord>(value) {
                Ok(record) => {
                    insights.insert(record.key(), record);
                }
                Err(e) => warn!(cluster = %cluster, error = %e, "Skipping malformed insight record"),
            }
        }

        info!(cluster = %cluster, records = insights.len(), "Loaded cluster insights");
        Ok(insights)
    }

    /// Read the approval attribute; any failure reads as not approved
    async fn approval_setting(&self, entity_id: &str) -> Approval {
        let system: Result<System> = match self.client() {
            Ok(client) => client.get(&format!("systems/{}", entity_id)).await,
            Err(e) => Err(e),
        };

        match system {
            Ok(system) => system
                .attributes
                .iter()
                .find(|a| a.id == APPROVAL_ATTRIBUTE_ID || a.name == APPROVAL_ATTRIBUTE_NAME)
                .and_then(|a| a.value.as_str())
                .map(Approval::from_setting)
                .unwrap_or_default(),
            Err(e) => {
                debug!(entity_id = %entity_id, error = %e, "Approval setting unavailable");
                Approval::NotApproved
            }
        }
    }
}

#[async_trait]
impl InsightAdapter for AnalyticsAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Analytics
    }

    async fn initialize(&mut self, prompter: &dyn Prompter) -> Result<()> {
        let stored = self
            .secrets
            .read(ADAPTER_SECRET)
            .await?
            .unwrap_or_default();

        if let (Some(url), Some(user), Some(password)) = (
            stored.get(URL_KEY),
            stored.get(USER_KEY),
            stored.get(PASSWORD_KEY),
        ) {
            match Self::validate(url, user, password).await {
                Ok(client) => {
                    if stored.get(ADAPTER_KEY).map(String::as_str) != Some(self.kind().as_str()) {
                        self.secrets
                            .write(
                                ADAPTER_SECRET,
                                &SecretBag::from([(
                                    ADAPTER_KEY.to_string(),
                                    self.kind().as_str().to_string(),
                                )]),
                            )
                            .await?;
                    }
                    self.client = Some(client);
                    return Ok(());
                }
                Err(e) => warn!(error = %e, "Stored analytics credentials rejected"),
            }
        }

        let url = match ForwarderConfig::load(self.runner.as_ref(), &self.kubectl)
            .await
            .and_then(|config| config.analytics_url())
        {
            Some(url) => {
                println!("Analytics URL: {}", url);
                url
            }
            None => prompter
                .input("Analytics URL:", None)?
                .trim_end_matches('/')
                .to_string(),
        };
        let user = prompter.input("Analytics Username:", None)?;
        let password = prompter.secret("Analytics Password:")?;

        let client = match Self::validate(&url, &user, &password).await {
            Ok(client) => client,
            Err(e) => {
                self.clear_credentials().await?;
                return Err(Error::Credential(e.to_string()));
            }
        };

        let values = SecretBag::from([
            (ADAPTER_KEY.to_string(), self.kind().as_str().to_string()),
            (URL_KEY.to_string(), url),
            (USER_KEY.to_string(), user),
            (PASSWORD_KEY.to_string(), password),
        ]);
        self.secrets.write(ADAPTER_SECRET, &values).await?;

        self.client = Some(client);
        Ok(())
    }

    async fn get_insight(&self, key: &ContainerKey) -> Result<Insight> {
        let record = self.lookup(key).await?;
        let approval = self.approval_setting(&record.entity_id).await;
        record.select(approval)
    }

    async fn get_approval(&self, key: &ContainerKey) -> Result<Approval> {
        let record = self.lookup(key).await?;
        Ok(self.approval_setting(&record.entity_id).await)
    }

    async fn set_approval(&self, approved: bool, key: &ContainerKey) -> Result<()> {
        let record = self.lookup(key).await?;
        let value = if approved {
            Approval::SPECIFIC_CHANGE
        } else {
            Approval::NOT_APPROVED
        };

        self.client()?
            .put(
                &format!("systems/{}/attributes", record.entity_id),
                &[Attribute {
                    id: String::new(),
                    name: APPROVAL_ATTRIBUTE_NAME.to_string(),
                    value: serde_json::Value::String(value.to_string()),
                }],
            )
            .await?;

        info!(container = %key, approval = %value, "Updated approval setting");
        Ok(())
    }
}
