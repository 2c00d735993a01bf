//! Rewrite engine
//!
//! Replaces the `resources` block of every supported container in a rendered
//! chart. The value comes from the insight repository, falling back to the
//! container's live spec in the cluster, then to the chart default.

use crate::adapter::InsightAdapter;
use crate::chart::{self, to_yaml, Container, Manifest, Workload};
use crate::console::{self, ResourceSource, RewriteRecord};
use crate::error::{Error, Result};
use crate::models::{Approval, ContainerKey};
use crate::process::{CommandRunner, CommandSpec};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reads the resources of a running container
#[async_trait]
pub trait LiveSpecProbe: Send + Sync {
    async fn container_resources(
        &self,
        workload: &Workload,
        namespace: &str,
        container: &str,
    ) -> Result<serde_json::Value>;
}

/// Probe backed by `kubectl get -o jsonpath`
pub struct KubectlProbe {
    runner: Arc<dyn CommandRunner>,
    kubectl: String,
    cluster: String,
}

impl KubectlProbe {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        kubectl: impl Into<String>,
        cluster: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            kubectl: kubectl.into(),
            cluster: cluster.into(),
        }
    }
}

#[async_trait]
impl LiveSpecProbe for KubectlProbe {
    async fn container_resources(
        &self,
        workload: &Workload,
        namespace: &str,
        container: &str,
    ) -> Result<serde_json::Value> {
        let command = CommandSpec::new(&self.kubectl).args([
            "get".to_string(),
            workload.kind.to_string(),
            workload.name.clone(),
            format!("-o={}", workload.kind.jsonpath()),
            format!("--cluster={}", self.cluster),
            format!("--namespace={}", namespace),
        ]);
        let output = self.runner.run(&command).await?;

        let containers: Vec<serde_json::Value> = serde_json::from_str(&output.stdout)?;
        containers
            .into_iter()
            .find(|c| c.get("name").and_then(|n| n.as_str()) == Some(container))
            .and_then(|c| c.get("resources").cloned())
            .filter(|r| r.as_object().map(|m| !m.is_empty()).unwrap_or(false))
            .ok_or_else(|| Error::NotFound(format!("could not locate resource spec for {}", container)))
    }
}

pub struct RewriteEngine<'a> {
    adapter: &'a dyn InsightAdapter,
    probe: &'a dyn LiveSpecProbe,
    remote_cluster: String,
    default_namespace: String,
}

impl<'a> RewriteEngine<'a> {
    pub fn new(
        adapter: &'a dyn InsightAdapter,
        probe: &'a dyn LiveSpecProbe,
        remote_cluster: impl Into<String>,
        default_namespace: impl Into<String>,
    ) -> Self {
        Self {
            adapter,
            probe,
            remote_cluster: remote_cluster.into(),
            default_namespace: default_namespace.into(),
        }
    }

    /// Rewrite every template of a rendered chart, subcharts first
    pub async fn rewrite_chart(&self, chart_dir: &Path) -> Result<Vec<RewriteRecord>> {
        let mut records = Vec::new();
        for file in chart::template_files(chart_dir)? {
            records.extend(self.rewrite_file(&file).await?);
        }
        Ok(records)
    }

    /// Rewrite one template file in place
    ///
    /// A file that does not parse is skipped; it is only written back when a
    /// container changed.
    pub async fn rewrite_file(&self, path: &Path) -> Result<Vec<RewriteRecord>> {
        let content = tokio::fs::read_to_string(path).await?;

        let mut manifests = match Manifest::parse_all(&content) {
            Ok(manifests) => manifests,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "Skipping unparseable template");
                return Ok(Vec::new());
            }
        };

        let mut records = Vec::new();
        let mut changed = false;
        for manifest in manifests.iter_mut() {
            changed |= self.rewrite_manifest(manifest, &mut records).await?;
        }

        if changed {
            tokio::fs::write(path, Manifest::render_all(&manifests)?).await?;
            debug!(file = %path.display(), "Rewrote template");
        }
        Ok(records)
    }

    /// Rewrite the containers of one manifest, returning whether any changed
    pub async fn rewrite_manifest(
        &self,
        manifest: &mut Manifest,
        records: &mut Vec<RewriteRecord>,
    ) -> Result<bool> {
        let Some(workload) = manifest.workload() else {
            return Ok(false);
        };
        let namespace = workload
            .namespace
            .clone()
            .unwrap_or_else(|| self.default_namespace.clone());

        println!();
        console::print_workload(&namespace, workload.kind.as_str(), &workload.name);

        let mut changed = false;
        for (index, container) in manifest.containers(workload.kind).into_iter().enumerate() {
            let (source, resources) = self
                .resolve(index + 1, &workload, &namespace, &container)
                .await?;

            if let Some(resources) = resources {
                manifest.set_resources(workload.kind, &container.name, to_yaml(&resources)?)?;
                changed = true;
            }

            records.push(RewriteRecord {
                namespace: namespace.clone(),
                kind: workload.kind.to_string(),
                name: workload.name.clone(),
                container: container.name.clone(),
                source,
            });
        }
        Ok(changed)
    }

    /// Pick the resources for one container, or `None` to leave the field alone
    async fn resolve(
        &self,
        index: usize,
        workload: &Workload,
        namespace: &str,
        container: &Container,
    ) -> Result<(ResourceSource, Option<serde_json::Value>)> {
        let key = ContainerKey::new(
            &self.remote_cluster,
            namespace,
            workload.kind.as_str(),
            &workload.name,
            &container.name,
        );

        match self.adapter.get_insight(&key).await {
            Ok(insight) => {
                console::print_insight(index, &container.name, insight.approval, &insight.resources);
                info!(container = %key, approval = %insight.approval, "Applied insight");
                let source = match insight.approval {
                    Approval::Approved => ResourceSource::Recommended,
                    Approval::NotApproved => ResourceSource::Current,
                };
                return Ok((source, Some(insight.resources.to_value())));
            }
            Err(e) if !e.is_unavailable() => return Err(e),
            Err(e) => {
                console::print_container(index, &container.name);
                console::print_info(&format!("  {}", e));
                debug!(container = %key, error = %e, "Insight unavailable");
            }
        }

        match self
            .probe
            .container_resources(workload, namespace, &container.name)
            .await
        {
            Ok(resources) => {
                console::print_checking_cluster(Some(&resources));
                return Ok((ResourceSource::Cluster, Some(resources)));
            }
            Err(e) => {
                console::print_checking_cluster(None);
                debug!(container = %key, error = %e, "Live spec unavailable");
            }
        }

        match &container.resources {
            Some(defaults) => {
                let defaults = serde_json::to_value(defaults)?;
                console::print_checking_defaults(Some(&defaults));
                Ok((ResourceSource::Default, None))
            }
            None => {
                console::print_checking_defaults(None);
                console::print_no_default();
                warn!(container = %key, "No default config present");
                Ok((ResourceSource::Unset, None))
            }
        }
    }
}
