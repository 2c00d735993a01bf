//! Interactive per-container approval of insights (`-a` mode)

use crate::adapter::InsightAdapter;
use crate::chart::{self, Manifest};
use crate::console;
use crate::error::Result;
use crate::models::{Approval, ContainerKey};
use crate::process::CommandRunner;
use crate::prompt::Prompter;
use tracing::{info, warn};

pub struct ApprovalWorkflow<'a> {
    adapter: &'a dyn InsightAdapter,
    prompter: &'a dyn Prompter,
    remote_cluster: String,
    default_namespace: String,
}

impl<'a> ApprovalWorkflow<'a> {
    pub fn new(
        adapter: &'a dyn InsightAdapter,
        prompter: &'a dyn Prompter,
        remote_cluster: impl Into<String>,
        default_namespace: impl Into<String>,
    ) -> Self {
        Self {
            adapter,
            prompter,
            remote_cluster: remote_cluster.into(),
            default_namespace: default_namespace.into(),
        }
    }

    /// Render the chart with `template <args>` and review every container
    pub async fn run(&self, runner: &dyn CommandRunner, helm: &str, args: &[String]) -> Result<usize> {
        let rendered = chart::render_to_string(runner, helm, args).await?;
        self.review(&rendered).await
    }

    /// Walk a rendered stream, prompting once per container
    ///
    /// Returns the number of approval changes made.
    pub async fn review(&self, rendered: &str) -> Result<usize> {
        let mut toggled = 0;

        for parsed in Manifest::parse_each(rendered) {
            let manifest = match parsed {
                Ok(manifest) => manifest,
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable rendered document");
                    continue;
                }
            };
            if manifest.is_test_hook() {
                continue;
            }
            let Some(workload) = manifest.workload() else {
                continue;
            };
            let namespace = workload
                .namespace
                .clone()
                .unwrap_or_else(|| self.default_namespace.clone());

            println!();
            console::print_workload(&namespace, workload.kind.as_str(), &workload.name);

            for (index, container) in manifest.containers(workload.kind).iter().enumerate() {
                let key = ContainerKey::new(
                    &self.remote_cluster,
                    &namespace,
                    workload.kind.as_str(),
                    &workload.name,
                    &container.name,
                );
                if self.review_container(index + 1, &key).await? {
                    toggled += 1;
                }
            }
        }

        Ok(toggled)
    }

    async fn review_container(&self, index: usize, key: &ContainerKey) -> Result<bool> {
        let approval = match self.adapter.get_approval(key).await {
            Ok(approval) => approval,
            Err(e) if e.is_unavailable() => {
                println!("{}.{} not found in repository.", index, key.container);
                warn!(container = %key, error = %e, "No insight to approve");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        console::print_approval(index, &key.container, approval);
        let question = match approval {
            Approval::Approved => "Unapprove this insight?",
            Approval::NotApproved => "Approve this insight?",
        };
        if !self.prompter.confirm(question, true)? {
            return Ok(false);
        }

        let approved = !approval.is_approved();
        self.adapter.set_approval(approved, key).await?;
        info!(container = %key, approved, "Approval changed");
        console::print_success(&format!(
            "{} is now {}",
            key.container,
            Approval::from(approved)
        ));
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceBlock;
    use crate::testing::{FakeAdapter, ScriptedPrompter, ScriptedRunner};

    const RENDERED: &str = r#"---
# Source: shop/templates/deployment.yaml
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  namespace: shop
spec:
  template:
    spec:
      containers:
      - name: api
        image: shop/api:1.0
      - name: sidecar
        image: envoy
---
# Source: shop/templates/tests/test-connection.yaml
apiVersion: v1
kind: Pod
metadata:
  name: web-test
  annotations:
    helm.sh/hook: test
spec:
  containers:
  - name: wget
    image: busybox
---
apiVersion: v1
kind: Service
metadata:
  name: web
"#;

    fn api_key() -> ContainerKey {
        ContainerKey::new("remote", "shop", "Deployment", "web", "api")
    }

    fn adapter_with(approval: Approval) -> FakeAdapter {
        let adapter = FakeAdapter::new();
        let block = ResourceBlock::new(100, 128, 50, 64).unwrap();
        adapter.insert(api_key(), block, block, approval);
        adapter
    }

    #[tokio::test]
    async fn test_toggle_round_trip() {
        let adapter = adapter_with(Approval::NotApproved);

        let prompter = ScriptedPrompter::new(["y"]);
        let workflow = ApprovalWorkflow::new(&adapter, &prompter, "remote", "default");
        assert_eq!(workflow.review(RENDERED).await.unwrap(), 1);
        assert_eq!(
            adapter.get_approval(&api_key()).await.unwrap(),
            Approval::Approved
        );
        assert_eq!(prompter.asked(), vec!["Approve this insight?"]);

        let prompter = ScriptedPrompter::new(["y"]);
        let workflow = ApprovalWorkflow::new(&adapter, &prompter, "remote", "default");
        workflow.review(RENDERED).await.unwrap();
        assert_eq!(
            adapter.get_approval(&api_key()).await.unwrap(),
            Approval::NotApproved
        );
        assert_eq!(prompter.asked(), vec!["Unapprove this insight?"]);
    }

    #[tokio::test]
    async fn test_empty_answer_toggles() {
        let adapter = adapter_with(Approval::NotApproved);
        let prompter = ScriptedPrompter::default();

        ApprovalWorkflow::new(&adapter, &prompter, "remote", "default")
            .review(RENDERED)
            .await
            .unwrap();

        assert_eq!(adapter.set_calls(), vec![(true, api_key())]);
    }

    #[tokio::test]
    async fn test_declining_leaves_state() {
        let adapter = adapter_with(Approval::Approved);
        let prompter = ScriptedPrompter::new(["n"]);

        let toggled = ApprovalWorkflow::new(&adapter, &prompter, "remote", "default")
            .review(RENDERED)
            .await
            .unwrap();

        assert_eq!(toggled, 0);
        assert!(adapter.set_calls().is_empty());
        assert_eq!(
            adapter.get_approval(&api_key()).await.unwrap(),
            Approval::Approved
        );
    }

    #[tokio::test]
    async fn test_default_namespace_applies_without_metadata_namespace() {
        let adapter = FakeAdapter::new();
        let block = ResourceBlock::new(100, 128, 50, 64).unwrap();
        let key = ContainerKey::new("remote", "team-a", "Pod", "solo", "main");
        adapter.insert(key.clone(), block, block, Approval::NotApproved);
        let prompter = ScriptedPrompter::new(["y"]);

        let rendered = "kind: Pod\nmetadata:\n  name: solo\nspec:\n  containers:\n  - name: main\n";
        ApprovalWorkflow::new(&adapter, &prompter, "remote", "team-a")
            .review(rendered)
            .await
            .unwrap();

        assert_eq!(adapter.set_calls(), vec![(true, key)]);
    }

    #[tokio::test]
    async fn test_unreadable_document_does_not_stop_review() {
        let adapter = FakeAdapter::new();
        let block = ResourceBlock::new(100, 128, 50, 64).unwrap();
        let key = ContainerKey::new("remote", "team-a", "Pod", "solo", "main");
        adapter.insert(key.clone(), block, block, Approval::NotApproved);
        let prompter = ScriptedPrompter::new(["y"]);

        let rendered = "kind: Pod\nmetadata:\n  name: solo\nspec:\n  containers:\n  - name: main\n\
                        ---\nkind: [unclosed\n";
        let toggled = ApprovalWorkflow::new(&adapter, &prompter, "remote", "team-a")
            .review(rendered)
            .await
            .unwrap();

        assert_eq!(toggled, 1);
        assert_eq!(prompter.asked(), vec!["Approve this insight?"]);
        assert_eq!(adapter.set_calls(), vec![(true, key)]);
    }

    #[tokio::test]
    async fn test_run_renders_chart() {
        let adapter = adapter_with(Approval::NotApproved);
        let prompter = ScriptedPrompter::new(["y"]);
        let runner = ScriptedRunner::new();
        runner.respond("helm template web ./shop", RENDERED);

        let args = vec!["web".to_string(), "./shop".to_string()];
        let toggled = ApprovalWorkflow::new(&adapter, &prompter, "remote", "default")
            .run(&runner, "helm", &args)
            .await
            .unwrap();

        assert_eq!(toggled, 1);
        assert_eq!(runner.calls(), vec!["helm template web ./shop"]);
    }
}
