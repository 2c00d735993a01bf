//! Deploy path: render, rewrite, then hand the chart back to helm

use crate::adapter::InsightAdapter;
use crate::chart;
use crate::console;
use crate::context::KubeContext;
use crate::error::{Error, Result};
use crate::process::{CommandRunner, CommandSpec};
use crate::rewrite::{LiveSpecProbe, RewriteEngine};
use regex::Regex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Boolean flags of a helm subcommand, as listed by `helm <sub> -h`
///
/// A flag line whose name is followed by a type word (`--timeout duration`)
/// takes a value; anything else is a switch.
pub fn parse_boolean_flags(help: &str) -> Result<HashSet<String>> {
    let line_re = Regex::new(r"^\s*(?:(-[a-zA-Z]), )?(--[a-zA-Z0-9][a-zA-Z0-9-]*)(?:\s{2,}|$)")
        .map_err(|e| Error::Parse(e.to_string()))?;

    let mut flags = HashSet::new();
    for line in help.lines().skip_while(|line| !line.contains("Flags:")) {
        if let Some(caps) = line_re.captures(line) {
            if let Some(short) = caps.get(1) {
                flags.insert(short.as_str().to_string());
            }
            if let Some(long) = caps.get(2) {
                flags.insert(long.as_str().to_string());
            }
        }
    }
    Ok(flags)
}

/// Index of the chart reference in `args`, where `args[0]` is the subcommand
///
/// The chart is the second positional after the subcommand, the first being
/// the release name. A positional directly after a flag is that flag's value
/// unless the flag is a switch or carries its value inline.
pub fn chart_position(args: &[String], boolean_flags: &HashSet<String>) -> Option<usize> {
    let is_flag = |arg: &str| arg.starts_with('-');
    let mut release_found = false;

    for i in 1..args.len() {
        let arg = args[i].as_str();
        if is_flag(arg) {
            continue;
        }

        let previous = args[i - 1].as_str();
        let positional = i == 1
            || !is_flag(previous)
            || previous.contains('=')
            || boolean_flags.contains(previous);
        if !positional {
            continue;
        }

        if release_found {
            return Some(i);
        }
        release_found = true;
    }
    None
}

/// Locate the chart argument, asking helm for the subcommand's flags when needed
pub async fn scan_chart_position(
    runner: &dyn CommandRunner,
    helm: &str,
    args: &[String],
) -> Result<usize> {
    if args.len() > 2 && !args[1].starts_with('-') && !args[2].starts_with('-') {
        return Ok(2);
    }

    let subcommand = args
        .first()
        .ok_or_else(|| Error::Parse("missing helm subcommand".into()))?;
    let help = runner
        .run(&CommandSpec::new(helm).args([subcommand.as_str(), "-h"]))
        .await?
        .stdout;

    let flags = parse_boolean_flags(&help)?;
    chart_position(args, &flags)
        .ok_or_else(|| Error::Parse(format!("could not locate the chart in: {}", args.join(" "))))
}

/// `helm <args>` attached to the terminal
pub async fn pass_through(runner: &dyn CommandRunner, helm: &str, args: &[String]) -> Result<i32> {
    runner
        .run_attached(&CommandSpec::new(helm).args(args.iter().cloned()))
        .await
}

pub struct DeployPipeline<'a> {
    runner: &'a dyn CommandRunner,
    adapter: &'a dyn InsightAdapter,
    probe: &'a dyn LiveSpecProbe,
    context: &'a KubeContext,
    helm: String,
    scratch_root: PathBuf,
}

impl<'a> DeployPipeline<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        adapter: &'a dyn InsightAdapter,
        probe: &'a dyn LiveSpecProbe,
        context: &'a KubeContext,
        helm: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            adapter,
            probe,
            context,
            helm: helm.into(),
            scratch_root: std::env::temp_dir(),
        }
    }

    /// Place scratch directories under `root` instead of the system temp dir
    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    /// Run `helm <args>` against a rewritten copy of the chart
    ///
    /// Returns helm's exit code. The scratch directory is removed on return.
    pub async fn run(&self, args: &[String]) -> Result<i32> {
        self.preflight(args).await?;

        let position = scan_chart_position(self.runner, &self.helm, args).await?;
        let chart_ref = args[position].as_str();

        console::print_banner(
            &self.context.local_cluster,
            &self.context.remote_cluster,
            self.adapter.kind().display_name(),
        );

        let scratch = tempfile::Builder::new()
            .prefix("helm-optimize-")
            .tempdir_in(&self.scratch_root)?;
        debug!(dir = %scratch.path().display(), "Created scratch directory");

        let chart_dir = self.prepare(chart_ref, &args[1..], scratch.path()).await?;

        let engine = RewriteEngine::new(
            self.adapter,
            self.probe,
            &self.context.remote_cluster,
            &self.context.default_namespace,
        );
        let records = engine.rewrite_chart(&chart_dir).await?;
        println!();
        console::print_summary(&records);

        let mut handoff = args.to_vec();
        handoff[position] = chart_dir.display().to_string();
        info!(chart = %chart_ref, rewritten = %chart_dir.display(), "Handing chart to helm");
        let status = pass_through(self.runner, &self.helm, &handoff).await?;

        scratch.close()?;
        Ok(status)
    }

    /// `helm <args> --dry-run`, failing with helm's stderr
    async fn preflight(&self, args: &[String]) -> Result<()> {
        let command = CommandSpec::new(&self.helm)
            .args(args.iter().cloned())
            .arg("--dry-run");
        self.runner.run(&command).await?;
        Ok(())
    }

    /// Materialise the chart in `scratch` and render its templates over it
    async fn prepare(&self, chart_ref: &str, render_args: &[String], scratch: &Path) -> Result<PathBuf> {
        let name = chart::chart_dir_name(chart_ref)?;

        if chart::is_local_chart(chart_ref) {
            chart::copy_chart(Path::new(chart_ref), scratch, &name)?;
        } else {
            chart::pull_chart(self.runner, &self.helm, chart_ref, scratch).await?;
        }
        chart::render_to_dir(self.runner, &self.helm, render_args, scratch).await?;

        Ok(scratch.join(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Approval, ContainerKey, ResourceBlock};
    use crate::rewrite::KubectlProbe;
    use crate::testing::{FakeAdapter, ScriptedRunner};
    use std::sync::Arc;
    use tempfile::TempDir;

    const INSTALL_HELP: &str = r#"This command installs a chart archive.

Usage:
  helm install [NAME] [CHART] [flags]

Flags:
      --atomic                                     if set, the installation process deletes the installation on failure
      --create-namespace                           create the release namespace if not present
      --description string                         add a custom description
  -g, --generate-name                              generate the name (and omit the NAME parameter)
  -h, --help                                       help for install
  -n, --namespace string                           namespace scope for this request
      --set stringArray                            set values on the command line
      --timeout duration                           time to wait for any individual Kubernetes operation (default 5m0s)
  -f, --values strings                             specify values in a YAML file or a URL (multiple can specified)
      --wait                                       if set, will wait until all resources are in a ready state

Global Flags:
      --debug                                      enable verbose output
      --kube-context string                        name of the kubeconfig context to use
"#;

    const TEMPLATE: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
spec:
  template:
    spec:
      containers:
      - name: api
        image: shop/api:1.0
"#;

    fn args(line: &str) -> Vec<String> {
        line.split_whitespace().map(str::to_string).collect()
    }

    fn context() -> KubeContext {
        KubeContext {
            local_cluster: "kind-local".into(),
            remote_cluster: "prod".into(),
            default_namespace: "shop".into(),
        }
    }

    fn local_chart(root: &Path) -> PathBuf {
        let chart = root.join("shop");
        std::fs::create_dir_all(chart.join("templates")).unwrap();
        std::fs::write(chart.join("Chart.yaml"), "apiVersion: v2\nname: shop\nversion: 0.1.0\n").unwrap();
        std::fs::write(chart.join("templates/web.yaml"), TEMPLATE).unwrap();
        chart
    }

    #[test]
    fn test_parse_boolean_flags() {
        let flags = parse_boolean_flags(INSTALL_HELP).unwrap();
        for flag in ["--atomic", "--create-namespace", "-g", "--generate-name", "--wait", "--debug"] {
            assert!(flags.contains(flag), "{flag} should be a switch");
        }
        for flag in ["--namespace", "-n", "--set", "--timeout", "-f", "--kube-context"] {
            assert!(!flags.contains(flag), "{flag} takes a value");
        }
    }

    #[test]
    fn test_chart_position() {
        let flags = parse_boolean_flags(INSTALL_HELP).unwrap();

        assert_eq!(chart_position(&args("install -n shop web ./shop"), &flags), Some(4));
        assert_eq!(chart_position(&args("install --atomic web ./shop"), &flags), Some(3));
        assert_eq!(
            chart_position(&args("install --namespace=shop --wait web bitnami/redis --set a=b"), &flags),
            Some(4)
        );
        assert_eq!(chart_position(&args("install -f values.yaml"), &flags), None);
    }

    #[tokio::test]
    async fn test_scan_fast_path_skips_help() {
        let runner = ScriptedRunner::new();
        let position = scan_chart_position(&runner, "helm", &args("upgrade web ./shop --wait"))
            .await
            .unwrap();
        assert_eq!(position, 2);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_scan_reads_subcommand_help() {
        let runner = ScriptedRunner::new();
        runner.respond("helm install -h", INSTALL_HELP);

        let position = scan_chart_position(&runner, "helm", &args("install -n shop web ./shop"))
            .await
            .unwrap();
        assert_eq!(position, 4);
        assert_eq!(runner.calls(), vec!["helm install -h"]);

        let err = scan_chart_position(&runner, "helm", &args("install -n shop"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[tokio::test]
    async fn test_deploy_rewrites_and_hands_off() {
        let workspace = TempDir::new().unwrap();
        let scratch_root = TempDir::new().unwrap();
        let chart = local_chart(workspace.path());

        let adapter = FakeAdapter::new();
        adapter.insert(
            ContainerKey::new("prod", "shop", "Deployment", "web", "api"),
            ResourceBlock::new(120, 140, 80, 90).unwrap(),
            ResourceBlock::new(250, 500, 100, 200).unwrap(),
            Approval::Approved,
        );
        let runner = Arc::new(ScriptedRunner::new());
        runner.set_attached_status(0);
        let probe = KubectlProbe::new(runner.clone(), "kubectl", "kind-local");
        let ctx = context();

        let cmd = vec!["install".to_string(), "web".to_string(), chart.display().to_string()];
        let status = DeployPipeline::new(runner.as_ref(), &adapter, &probe, &ctx, "helm")
            .with_scratch_root(scratch_root.path())
            .run(&cmd)
            .await
            .unwrap();

        assert_eq!(status, 0);
        let calls = runner.calls();
        assert_eq!(calls[0], format!("helm install web {} --dry-run", chart.display()));
        assert!(calls[1].starts_with(&format!("helm template web {} --output-dir", chart.display())));
        let handoff = calls.last().unwrap();
        assert!(handoff.starts_with("helm install web "));
        assert!(handoff.ends_with("/shop"));
        assert!(!handoff.contains(&chart.display().to_string()));

        assert_eq!(std::fs::read_dir(scratch_root.path()).unwrap().count(), 0);
        assert_eq!(std::fs::read_to_string(chart.join("templates/web.yaml")).unwrap(), TEMPLATE);
    }

    #[tokio::test]
    async fn test_deploy_pulls_remote_chart() {
        let scratch_root = TempDir::new().unwrap();
        let adapter = FakeAdapter::new();
        let runner = Arc::new(ScriptedRunner::new());
        runner.set_attached_status(3);
        let probe = KubectlProbe::new(runner.clone(), "kubectl", "kind-local");
        let ctx = context();

        let status = DeployPipeline::new(runner.as_ref(), &adapter, &probe, &ctx, "helm")
            .with_scratch_root(scratch_root.path())
            .run(&args("upgrade cache bitnami/redis"))
            .await
            .unwrap();

        assert_eq!(status, 3);
        assert!(runner
            .calls()
            .iter()
            .any(|c| c.starts_with("helm pull bitnami/redis --untar --untardir")));
        assert_eq!(std::fs::read_dir(scratch_root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_scratch_removed_on_failure() {
        let workspace = TempDir::new().unwrap();
        let scratch_root = TempDir::new().unwrap();
        let chart = local_chart(workspace.path());

        let adapter = FakeAdapter::new();
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail("helm template", 1, "Error: parse error in deployment.yaml");
        let probe = KubectlProbe::new(runner.clone(), "kubectl", "kind-local");
        let ctx = context();

        let cmd = vec!["install".to_string(), "web".to_string(), chart.display().to_string()];
        let err = DeployPipeline::new(runner.as_ref(), &adapter, &probe, &ctx, "helm")
            .with_scratch_root(scratch_root.path())
            .run(&cmd)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Exec { .. }));
        assert_eq!(std::fs::read_dir(scratch_root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_preflight_failure_aborts() {
        let scratch_root = TempDir::new().unwrap();
        let adapter = FakeAdapter::new();
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail("helm install", 1, "Error: INSTALLATION FAILED: cannot re-use a name");
        let probe = KubectlProbe::new(runner.clone(), "kubectl", "kind-local");
        let ctx = context();

        let err = DeployPipeline::new(runner.as_ref(), &adapter, &probe, &ctx, "helm")
            .with_scratch_root(scratch_root.path())
            .run(&args("install web ./shop"))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("cannot re-use a name"));
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_pass_through() {
        let runner = ScriptedRunner::new();
        runner.set_attached_status(2);
        let status = pass_through(&runner, "helm", &args("list -A")).await.unwrap();
        assert_eq!(status, 2);
        assert_eq!(runner.calls(), vec!["helm list -A"]);
    }
}
