//! Command handlers and the state they share

pub mod approve;
pub mod configure;
pub mod deploy;

use anyhow::{Context, Result};
use optimize_lib::console;
use optimize_lib::context::{ContextResolver, KubeContext};
use optimize_lib::process::{CommandRunner, CommandSpec, SystemRunner};
use optimize_lib::prompt::{Prompter, TerminalPrompter};
use optimize_lib::secrets::{KubectlSecretStore, SecretStore};
use optimize_lib::{Adapter, Error, InsightAdapter, PluginSettings};
use std::sync::Arc;
use tracing::{info, warn};

/// Collaborators constructed once in `main` and passed to every command
pub struct Session {
    pub settings: PluginSettings,
    pub runner: Arc<dyn CommandRunner>,
    pub secrets: Arc<dyn SecretStore>,
    pub prompter: TerminalPrompter,
}

impl Session {
    pub fn new(settings: PluginSettings) -> Self {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());
        let secrets: Arc<dyn SecretStore> = Arc::new(KubectlSecretStore::new(
            runner.clone(),
            settings.kubectl_bin.clone(),
        ));

        Self {
            settings,
            runner,
            secrets,
            prompter: TerminalPrompter,
        }
    }

    pub fn resolver(&self) -> ContextResolver<'_> {
        ContextResolver::new(self.runner.clone(), self.secrets.clone(), &self.settings)
    }

    /// The cluster CLI must be runnable before anything touches the cluster
    pub async fn check_dependencies(&self) -> Result<()> {
        let command = CommandSpec::new(&self.settings.kubectl_bin).args(["version", "--client"]);
        self.runner
            .run(&command)
            .await
            .with_context(|| format!("[{}] is not available", self.settings.kubectl_bin))?;
        Ok(())
    }

    pub async fn context(&self) -> Result<KubeContext> {
        self.resolver()
            .resolve(&self.prompter)
            .await
            .context("Failed to resolve kube context")
    }

    /// The configured adapter, initialized
    pub async fn adapter(&self) -> Result<Adapter> {
        let mut adapter =
            Adapter::from_secrets(self.runner.clone(), self.secrets.clone(), &self.settings).await?;
        initialize_with_retry(&mut adapter, &self.prompter).await?;
        Ok(adapter)
    }
}

/// Run `initialize`, offering a retry while credentials are rejected
///
/// Declining the retry yields [`Error::Cancelled`].
pub async fn initialize_with_retry(
    adapter: &mut dyn InsightAdapter,
    prompter: &dyn Prompter,
) -> optimize_lib::Result<()> {
    loop {
        match adapter.initialize(prompter).await {
            Ok(()) => {
                info!(adapter = adapter.kind().as_str(), "Adapter initialized");
                return Ok(());
            }
            Err(e) if e.is_credential() => {
                warn!(adapter = adapter.kind().as_str(), error = %e, "Initialization failed");
                console::print_error(&e.to_string());
                if !prompter.confirm("Would you like to try again?", false)? {
                    return Err(Error::Cancelled);
                }
            }
            Err(e) => return Err(e),
        }
    }
}
