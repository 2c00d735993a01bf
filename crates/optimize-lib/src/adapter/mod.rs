//! Insight repositories
//!
//! Both repositories expose the same capability set through
//! [`InsightAdapter`]; the active one is chosen from the adapter secret and
//! held as an [`Adapter`] value.

pub mod analytics;
pub mod parameter_store;

use crate::error::Result;
use crate::models::{Approval, ContainerKey, Insight};
use crate::process::CommandRunner;
use crate::prompt::Prompter;
use crate::secrets::{SecretStore, ADAPTER_SECRET};
use crate::settings::PluginSettings;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

pub use analytics::AnalyticsAdapter;
pub use parameter_store::ParameterStoreAdapter;

/// Secret key naming the active adapter
pub const ADAPTER_KEY: &str = "adapter";

#[async_trait]
pub trait InsightAdapter: Send + Sync {
    fn kind(&self) -> AdapterKind;

    /// Load, or prompt for, credentials and validate them against the backend
    ///
    /// Credentials are persisted only after validation succeeds. A rejected
    /// credential clears the stored values and fails with `Error::Credential`.
    async fn initialize(&mut self, prompter: &dyn Prompter) -> Result<()>;

    async fn get_insight(&self, key: &ContainerKey) -> Result<Insight>;

    async fn get_approval(&self, key: &ContainerKey) -> Result<Approval>;

    async fn set_approval(&self, approved: bool, key: &ContainerKey) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdapterKind {
    #[default]
    Analytics,
    ParameterStore,
}

impl AdapterKind {
    pub const ALL: [AdapterKind; 2] = [AdapterKind::Analytics, AdapterKind::ParameterStore];

    /// Value stored under the `adapter` secret key
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::Analytics => "analytics",
            AdapterKind::ParameterStore => "parameter-store",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == value)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            AdapterKind::Analytics => "Analytics",
            AdapterKind::ParameterStore => "Parameter Store",
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// The active insight repository
pub enum Adapter {
    Analytics(AnalyticsAdapter),
    ParameterStore(ParameterStoreAdapter),
}

impl Adapter {
    pub fn new(
        kind: AdapterKind,
        runner: Arc<dyn CommandRunner>,
        secrets: Arc<dyn SecretStore>,
        settings: &PluginSettings,
    ) -> Self {
        match kind {
            AdapterKind::Analytics => Adapter::Analytics(AnalyticsAdapter::new(
                runner,
                secrets,
                settings.kubectl_bin.clone(),
            )),
            AdapterKind::ParameterStore => Adapter::ParameterStore(ParameterStoreAdapter::new(
                runner,
                secrets,
                settings.aws_bin.clone(),
            )),
        }
    }

    /// The adapter named in the adapter secret, defaulting to analytics
    pub async fn from_secrets(
        runner: Arc<dyn CommandRunner>,
        secrets: Arc<dyn SecretStore>,
        settings: &PluginSettings,
    ) -> Result<Self> {
        let kind = configured_kind(secrets.as_ref()).await?;
        debug!(adapter = kind.as_str(), "Selected adapter");
        Ok(Self::new(kind, runner, secrets, settings))
    }

    fn inner(&self) -> &dyn InsightAdapter {
        match self {
            Adapter::Analytics(adapter) => adapter,
            Adapter::ParameterStore(adapter) => adapter,
        }
    }
}

/// Read the configured adapter kind
pub async fn configured_kind(secrets: &dyn SecretStore) -> Result<AdapterKind> {
    Ok(secrets
        .read(ADAPTER_SECRET)
        .await?
        .and_then(|bag| bag.get(ADAPTER_KEY).and_then(|v| AdapterKind::parse(v)))
        .unwrap_or_default())
}

#[async_trait]
impl InsightAdapter for Adapter {
    fn kind(&self) -> AdapterKind {
        self.inner().kind()
    }

    async fn initialize(&mut self, prompter: &dyn Prompter) -> Result<()> {
        match self {
            Adapter::Analytics(adapter) => adapter.initialize(prompter).await,
            Adapter::ParameterStore(adapter) => adapter.initialize(prompter).await,
        }
    }

    async fn get_insight(&self, key: &ContainerKey) -> Result<Insight> {
        self.inner().get_insight(key).await
    }

    async fn get_approval(&self, key: &ContainerKey) -> Result<Approval> {
        self.inner().get_approval(key).await
    }

    async fn set_approval(&self, approved: bool, key: &ContainerKey) -> Result<()> {
        self.inner().set_approval(approved, key).await
    }
}

/// Numbered adapter menu; re-prompts until a listed entry is chosen
pub fn select_adapter(prompter: &dyn Prompter) -> Result<AdapterKind> {
    println!("Select Adapter");
    for (i, kind) in AdapterKind::ALL.iter().enumerate() {
        println!("{}. {}", i + 1, kind);
    }

    loop {
        let answer = prompter.input("Selection:", None)?;
        let choice = answer
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| AdapterKind::ALL.get(i).copied());

        match choice {
            Some(kind) => return Ok(kind),
            None => crate::console::print_warning("Incorrect selection. Try again."),
        }
    }
}
