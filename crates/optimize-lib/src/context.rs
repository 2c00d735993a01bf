//! Kube context resolution
//!
//! Determines the local cluster from the kubeconfig, the remote cluster under
//! which the insight repository keys its data, and the default namespace.

use crate::console;
use crate::error::{Error, Result};
use crate::process::{CommandRunner, CommandSpec};
use crate::prompt::Prompter;
use crate::secrets::{bag, SecretStore, CLUSTER_MAPPING_SECRET};
use crate::settings::PluginSettings;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const REMOTE_CLUSTER_KEY: &str = "remoteCluster";

const DEFAULT_NAMESPACE: &str = "default";

/// Resolved working context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KubeContext {
    pub local_cluster: String,
    pub remote_cluster: String,
    pub default_namespace: String,
}

/// The parts of a kubeconfig the resolver reads
#[derive(Debug, Default, Deserialize)]
pub struct KubeConfig {
    #[serde(rename = "current-context", default)]
    pub current_context: Option<String>,
    #[serde(default)]
    pub contexts: Vec<NamedContext>,
}

#[derive(Debug, Deserialize)]
pub struct NamedContext {
    pub name: String,
    #[serde(default)]
    pub context: ContextEntry,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContextEntry {
    #[serde(default)]
    pub cluster: Option<String>,
    #[serde(default)]
    pub namespace: Option<String>,
}

impl KubeConfig {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str::<Option<KubeConfig>>(raw)?.unwrap_or_default())
    }

    /// The context named `name`, or the current context when `name` is `None`
    pub fn context(&self, name: Option<&str>) -> Result<&NamedContext> {
        let name = name
            .or(self.current_context.as_deref())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::Context("no active kube context".into()))?;

        self.contexts
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| Error::Context(format!("context {} not found in kubeconfig", name)))
    }
}

/// Properties of the data forwarder config map deployed in the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwarderConfig {
    properties: BTreeMap<String, String>,
}

impl ForwarderConfig {
    /// Find the first config map carrying a `config.properties` entry
    pub async fn load(runner: &dyn CommandRunner, kubectl: &str) -> Option<Self> {
        let command = CommandSpec::new(kubectl).args(["get", "configmaps", "-A", "-o", "json"]);
        let output = match runner.run(&command).await {
            Ok(output) => output,
            Err(e) => {
                warn!(error = %e, "Unable to list config maps");
                return None;
            }
        };

        let list: serde_json::Value = match serde_json::from_str(&output.stdout) {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "Unable to parse config map list");
                return None;
            }
        };

        list.get("items")?
            .as_array()?
            .iter()
            .filter_map(|item| item.get("data")?.get("config.properties")?.as_str())
            .map(Self::parse)
            .next()
    }

    /// Parse Java-style `key=value` / `key: value` properties
    pub fn parse(raw: &str) -> Self {
        let properties = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
            .filter_map(|line| {
                let split = line.find(['=', ':'])?;
                let (key, value) = line.split_at(split);
                Some((key.trim().to_string(), value[1..].trim().to_string()))
            })
            .collect();

        Self { properties }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// `cluster_name`, falling back to `prometheus_address`
    pub fn cluster_name(&self) -> Option<&str> {
        self.get("cluster_name")
            .or_else(|| self.get("prometheus_address"))
    }

    /// `<protocol>://<host>:<port>` when all three are present
    pub fn analytics_url(&self) -> Option<String> {
        Some(format!(
            "{}://{}:{}",
            self.get("protocol")?,
            self.get("host")?,
            self.get("port")?
        ))
    }
}

pub struct ContextResolver<'a> {
    runner: Arc<dyn CommandRunner>,
    secrets: Arc<dyn SecretStore>,
    settings: &'a PluginSettings,
}

impl<'a> ContextResolver<'a> {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        secrets: Arc<dyn SecretStore>,
        settings: &'a PluginSettings,
    ) -> Self {
        Self {
            runner,
            secrets,
            settings,
        }
    }

    /// Load the kubeconfig from `KUBECONFIG`, or from `kubectl config view`
    pub async fn kubeconfig(&self) -> Result<KubeConfig> {
        let raw = match self.settings.kubeconfig_path() {
            Some(path) => tokio::fs::read_to_string(&path).await.map_err(|e| {
                Error::Context(format!("unable to read kubeconfig {}: {}", path.display(), e))
            })?,
            None => {
                let command =
                    CommandSpec::new(&self.settings.kubectl_bin).args(["config", "view"]);
                self.runner
                    .run(&command)
                    .await
                    .map_err(|e| Error::Context(format!("unable to view kubeconfig: {}", e)))?
                    .stdout
            }
        };

        KubeConfig::parse(&raw)
    }

    /// Resolve the local cluster and default namespace
    pub async fn local(&self) -> Result<(String, String)> {
        let kubeconfig = self.kubeconfig().await?;
        let context = kubeconfig.context(self.settings.kube_context.as_deref())?;

        let cluster = context
            .context
            .cluster
            .clone()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::Context(format!("context {} names no cluster", context.name)))?;

        let namespace = self
            .settings
            .namespace
            .clone()
            .or_else(|| context.context.namespace.clone())
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());

        debug!(context = %context.name, cluster = %cluster, namespace = %namespace, "Resolved local context");
        Ok((cluster, namespace))
    }

    /// Resolve the full context, prompting for the remote cluster as a last resort
    pub async fn resolve(&self, prompter: &dyn Prompter) -> Result<KubeContext> {
        let (local_cluster, default_namespace) = self.local().await?;

        let remote_cluster = match self.stored_remote_cluster().await? {
            Some(remote) => remote,
            None => {
                let remote = match self.forwarder_cluster_name().await {
                    Some(remote) => remote,
                    None => {
                        console::print_warning(
                            "could not resolve remote cluster from the cluster's forwarder config",
                        );
                        self.prompt_remote_cluster(prompter, &local_cluster)?
                    }
                };
                self.store_remote_cluster(&remote).await?;
                remote
            }
        };

        Ok(KubeContext {
            local_cluster,
            remote_cluster,
            default_namespace,
        })
    }

    /// Prompt for the remote cluster and persist the answer
    pub async fn configure_cluster_mapping(&self, prompter: &dyn Prompter) -> Result<String> {
        let (local_cluster, _) = self.local().await?;
        let remote = self.prompt_remote_cluster(prompter, &local_cluster)?;
        self.store_remote_cluster(&remote).await?;
        Ok(remote)
    }

    fn prompt_remote_cluster(&self, prompter: &dyn Prompter, local_cluster: &str) -> Result<String> {
        let answer = prompter.input(
            &format!("Please specify remote cluster [{}]:", local_cluster),
            Some(local_cluster),
        )?;
        Ok(if answer.is_empty() {
            local_cluster.to_string()
        } else {
            answer
        })
    }

    async fn stored_remote_cluster(&self) -> Result<Option<String>> {
        Ok(self
            .secrets
            .read(CLUSTER_MAPPING_SECRET)
            .await?
            .and_then(|bag| bag.get(REMOTE_CLUSTER_KEY).cloned())
            .filter(|remote| !remote.is_empty()))
    }

    async fn forwarder_cluster_name(&self) -> Option<String> {
        ForwarderConfig::load(self.runner.as_ref(), &self.settings.kubectl_bin)
            .await?
            .cluster_name()
            .map(str::to_string)
    }

    async fn store_remote_cluster(&self, remote: &str) -> Result<()> {
        self.secrets
            .write(CLUSTER_MAPPING_SECRET, &bag([(REMOTE_CLUSTER_KEY, remote)]))
            .await?;
        info!(remote_cluster = %remote, "Stored cluster mapping");
        Ok(())
    }
}
