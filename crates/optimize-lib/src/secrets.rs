//! Named key/value bags persisted as cluster secrets

use crate::error::{Error, Result};
use crate::process::{CommandRunner, CommandSpec};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Secret holding the active adapter and its credentials
pub const ADAPTER_SECRET: &str = "optimize-plugin-adapter";

/// Secret holding the remote cluster name
pub const CLUSTER_MAPPING_SECRET: &str = "optimize-plugin-cluster-mapping";

pub type SecretBag = BTreeMap<String, String>;

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read the decoded bag, or `None` when it does not exist
    async fn read(&self, name: &str) -> Result<Option<SecretBag>>;

    /// Merge `values` into the bag, creating it when absent
    async fn write(&self, name: &str, values: &SecretBag) -> Result<()>;

    /// Remove a single key, leaving the rest of the bag in place
    async fn delete_key(&self, name: &str, key: &str) -> Result<()>;

    /// Remove the whole bag
    async fn delete(&self, name: &str) -> Result<()>;
}

/// Secret store backed by `kubectl` in the current context
pub struct KubectlSecretStore {
    runner: Arc<dyn CommandRunner>,
    kubectl: String,
}

impl KubectlSecretStore {
    pub fn new(runner: Arc<dyn CommandRunner>, kubectl: impl Into<String>) -> Self {
        Self {
            runner,
            kubectl: kubectl.into(),
        }
    }

    fn kubectl(&self) -> CommandSpec {
        CommandSpec::new(&self.kubectl)
    }

    /// Replace the bag with exactly `bag`
    async fn replace(&self, name: &str, bag: &SecretBag) -> Result<()> {
        self.delete(name).await?;

        let producer = self
            .kubectl()
            .args(["create", "secret", "generic", name])
            .args(bag.iter().map(|(k, v)| format!("--from-literal={}={}", k, v)))
            .args(["--dry-run=client", "-o", "json"]);
        let consumer = self.kubectl().args(["apply", "-f", "-"]);

        self.runner.pipe(&producer, &consumer).await?;
        debug!(secret = %name, keys = bag.len(), "Stored secret");
        Ok(())
    }
}

#[async_trait]
impl SecretStore for KubectlSecretStore {
    async fn read(&self, name: &str) -> Result<Option<SecretBag>> {
        let command = self
            .kubectl()
            .args(["get", "secret", name, "-o", "jsonpath={.data}"]);

        let output = match self.runner.run(&command).await {
            Ok(output) => output,
            Err(Error::Exec { stderr, .. }) => {
                debug!(secret = %name, stderr = %stderr, "Secret not readable");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if output.stdout.trim().is_empty() {
            return Ok(Some(SecretBag::new()));
        }

        decode_bag(&output.stdout).map(Some)
    }

    async fn write(&self, name: &str, values: &SecretBag) -> Result<()> {
        let mut bag = self.read(name).await?.unwrap_or_default();
        bag.extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.replace(name, &bag).await
    }

    async fn delete_key(&self, name: &str, key: &str) -> Result<()> {
        let Some(mut bag) = self.read(name).await? else {
            return Ok(());
        };

        if bag.remove(key).is_some() {
            self.replace(name, &bag).await?;
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let command = self
            .kubectl()
            .args(["delete", "secret", name, "--ignore-not-found"]);

        if let Err(e) = self.runner.run(&command).await {
            warn!(secret = %name, error = %e, "Failed to delete secret");
            return Err(e);
        }
        Ok(())
    }
}

/// Decode the `{.data}` map of a secret, base64-decoding every value
pub fn decode_bag(raw: &str) -> Result<SecretBag> {
    let encoded: BTreeMap<String, String> = serde_json::from_str(raw)?;

    encoded
        .into_iter()
        .map(|(key, value)| {
            let bytes = STANDARD
                .decode(value.as_bytes())
                .map_err(|e| Error::Parse(format!("secret key {}: {}", key, e)))?;
            let decoded = String::from_utf8(bytes)
                .map_err(|e| Error::Parse(format!("secret key {}: {}", key, e)))?;
            Ok((key, decoded))
        })
        .collect()
}

/// Build a bag from string pairs
pub fn bag<I, K, V>(pairs: I) -> SecretBag
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
