//! Plugin settings read from the environment helm exports to plugins

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Plugin settings
#[derive(Debug, Clone, Deserialize)]
pub struct PluginSettings {
    /// Chart renderer and orchestration tool
    #[serde(default = "default_helm_bin")]
    pub helm_bin: String,

    /// Cluster CLI
    #[serde(default = "default_kubectl_bin", rename = "helm_optimize_kubectl")]
    pub kubectl_bin: String,

    /// Parameter store CLI
    #[serde(default = "default_aws_bin", rename = "helm_optimize_aws")]
    pub aws_bin: String,

    #[serde(default)]
    pub kubeconfig: Option<String>,

    #[serde(default, rename = "helm_kubecontext")]
    pub kube_context: Option<String>,

    #[serde(default, rename = "helm_namespace")]
    pub namespace: Option<String>,

    #[serde(default, rename = "helm_plugin_dir")]
    pub plugin_dir: Option<PathBuf>,
}

/// Variables consulted, lowercased the way config keys are
const VARIABLES: &[&str] = &[
    "helm_bin",
    "helm_optimize_kubectl",
    "helm_optimize_aws",
    "kubeconfig",
    "helm_kubecontext",
    "helm_namespace",
    "helm_plugin_dir",
];

fn default_helm_bin() -> String {
    "helm".to_string()
}

fn default_kubectl_bin() -> String {
    "kubectl".to_string()
}

fn default_aws_bin() -> String {
    "aws".to_string()
}

impl Default for PluginSettings {
    fn default() -> Self {
        Self {
            helm_bin: default_helm_bin(),
            kubectl_bin: default_kubectl_bin(),
            aws_bin: default_aws_bin(),
            kubeconfig: None,
            kube_context: None,
            namespace: None,
            plugin_dir: None,
        }
    }
}

impl PluginSettings {
    /// Load settings from the process environment
    pub fn load() -> Result<Self> {
        Self::from_vars(
            std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
                .collect(),
        )
    }

    /// Load settings from an explicit variable map
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        let known: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.to_lowercase(), v))
            .filter(|(k, _)| VARIABLES.contains(&k.as_str()))
            .collect();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .source(Some(known))
                    .try_parsing(false),
            )
            .build()
            .map_err(|e| Error::Parse(format!("plugin settings: {}", e)))?;

        let mut settings: PluginSettings = config
            .try_deserialize()
            .map_err(|e| Error::Parse(format!("plugin settings: {}", e)))?;
        settings.normalize();
        Ok(settings)
    }

    /// Treat empty variables as unset
    fn normalize(&mut self) {
        for field in [
            &mut self.kubeconfig,
            &mut self.kube_context,
            &mut self.namespace,
        ] {
            if field.as_deref().map(str::trim).unwrap_or_default().is_empty() {
                *field = None;
            }
        }
        if self
            .plugin_dir
            .as_ref()
            .map(|p| p.as_os_str().is_empty())
            .unwrap_or(false)
        {
            self.plugin_dir = None;
        }
        if self.helm_bin.trim().is_empty() {
            self.helm_bin = default_helm_bin();
        }
    }

    /// First entry of a `:`-separated KUBECONFIG list
    pub fn kubeconfig_path(&self) -> Option<PathBuf> {
        self.kubeconfig
            .as_deref()
            .and_then(|list| list.split(':').find(|p| !p.is_empty()))
            .map(PathBuf::from)
    }

    /// Path of the plugin manifest used for help output
    pub fn plugin_manifest(&self) -> Option<PathBuf> {
        self.plugin_dir.as_ref().map(|dir| dir.join("plugin.yaml"))
    }
}
