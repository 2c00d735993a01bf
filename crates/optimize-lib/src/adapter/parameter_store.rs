//! Parameter store adapter driven through the cloud CLI
//!
//! Each container maps to one parameter holding its unit-less resource
//! block. Approval is encoded as a label on the parameter's current version,
//! and the current/recommended blocks used by `set_approval` come from the
//! parameter's tags.

use super::{AdapterKind, InsightAdapter, ADAPTER_KEY};
use crate::console;
use crate::error::{Error, Result};
use crate::models::{Approval, ContainerKey, Insight, ResourceBlock};
use crate::process::{CommandRunner, CommandSpec};
use crate::prompt::Prompter;
use crate::secrets::{SecretBag, SecretStore, ADAPTER_SECRET};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const PREFIX_KEY: &str = "prefix";
pub const PROFILE_KEY: &str = "profile";
pub const REGION_KEY: &str = "region";

const DEFAULT_PROFILE: &str = "default";
const DEFAULT_REGION: &str = "us-east-1";

pub const SUPPORTED_REGIONS: [&str; 25] = [
    "us-east-2",
    "us-east-1",
    "us-west-1",
    "us-west-2",
    "af-south-1",
    "ap-east-1",
    "ap-south-1",
    "ap-northeast-3",
    "ap-northeast-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-northeast-1",
    "ca-central-1",
    "cn-north-1",
    "cn-northwest-1",
    "eu-central-1",
    "eu-west-1",
    "eu-west-2",
    "eu-south-1",
    "eu-west-3",
    "eu-north-1",
    "me-south-1",
    "sa-east-1",
    "us-gov-east-1",
    "us-gov-west-1",
];

/// Validate a parameter key prefix
pub fn validate_prefix(prefix: &str) -> std::result::Result<(), &'static str> {
    let reserved = Regex::new(r"(?i)^/?(aws|ssm)").map_err(|_| "invalid pattern")?;
    if reserved.is_match(prefix) {
        return Err("Parameter name can't be prefixed with \"aws\" or \"ssm\" (case-insensitive).");
    }

    let allowed = Regex::new(r"^(/[A-Za-z0-9_.\-]+)*$").map_err(|_| "invalid pattern")?;
    if !allowed.is_match(prefix) {
        return Err(
            "Prefix must be a sequence of /segment parts using letters, numbers and .-_ only.",
        );
    }

    Ok(())
}

/// `<prefix>/<cluster>/<namespace>/<kind>/<name>/<container>/resourceSpec`
pub fn parameter_name(prefix: &str, key: &ContainerKey) -> String {
    format!(
        "{}/{}/{}/{}/{}/{}/resourceSpec",
        prefix, key.cluster, key.namespace, key.kind, key.name, key.container
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Location {
    prefix: String,
    profile: String,
    region: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetParameterOutput {
    parameter: Parameter,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Parameter {
    value: String,
    version: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HistoryOutput {
    #[serde(default)]
    parameters: Vec<HistoryEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HistoryEntry {
    version: i64,
    #[serde(default)]
    labels: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TagsOutput {
    #[serde(default)]
    tag_list: Vec<Tag>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Tag {
    key: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PutParameterOutput {
    version: i64,
}

pub struct ParameterStoreAdapter {
    runner: Arc<dyn CommandRunner>,
    secrets: Arc<dyn SecretStore>,
    aws: String,
    location: Option<Location>,
}

impl ParameterStoreAdapter {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        secrets: Arc<dyn SecretStore>,
        aws: impl Into<String>,
    ) -> Self {
        Self {
            runner,
            secrets,
            aws: aws.into(),
            location: None,
        }
    }

    /// Use an already validated prefix, profile and region
    pub fn with_location(
        mut self,
        prefix: impl Into<String>,
        profile: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        self.location = Some(Location {
            prefix: prefix.into(),
            profile: profile.into(),
            region: region.into(),
        });
        self
    }

    fn location(&self) -> Result<&Location> {
        self.location
            .as_ref()
            .ok_or_else(|| Error::Credential("parameter store adapter is not initialized".into()))
    }

    /// `aws ssm <operation> ... --profile P --region R --output json`
    fn ssm(&self, location: &Location, operation: &str) -> CommandSpec {
        CommandSpec::new(&self.aws).args(["ssm", operation]).args([
            "--profile",
            location.profile.as_str(),
            "--region",
            location.region.as_str(),
            "--output",
            "json",
        ])
    }

    async fn ssm_json<T: serde::de::DeserializeOwned>(&self, command: CommandSpec) -> Result<T> {
        let output = match self.runner.run(&command).await {
            Ok(output) => output,
            Err(Error::Exec { stderr, .. }) if stderr.contains("ParameterNotFound") => {
                return Err(Error::NotFound(stderr));
            }
            Err(e) => return Err(e),
        };
        Ok(serde_json::from_str(&output.stdout)?)
    }

    async fn read_parameter(&self, name: &str) -> Result<Parameter> {
        let location = self.location()?;
        let command = self
            .ssm(location, "get-parameter")
            .args(["--name", name, "--with-decryption"]);
        let output: GetParameterOutput = self.ssm_json(command).await?;
        Ok(output.parameter)
    }

    /// Approval encoded by the label on `version`
    async fn version_approval(&self, name: &str, version: i64) -> Result<Approval> {
        let location = self.location()?;
        let command = self
            .ssm(location, "get-parameter-history")
            .args(["--name", name, "--with-decryption"]);
        let history: HistoryOutput = self.ssm_json(command).await?;

        Ok(history
            .parameters
            .iter()
            .find(|entry| entry.version == version)
            .and_then(|entry| entry.labels.first())
            .map(|label| Approval::from_label(label))
            .unwrap_or_default())
    }

    async fn tags(&self, name: &str) -> Result<HashMap<String, String>> {
        let location = self.location()?;
        let command = self.ssm(location, "list-tags-for-resource").args([
            "--resource-type",
            "Parameter",
            "--resource-id",
            name,
        ]);
        let output: TagsOutput = self.ssm_json(command).await?;
        Ok(output
            .tag_list
            .into_iter()
            .map(|tag| (tag.key, tag.value))
            .collect())
    }

    async fn check_cli(&self) -> Result<()> {
        let command = CommandSpec::new(&self.aws).arg("--version");
        self.runner.run(&command).await.map_err(|e| {
            console::print_error(&format!(
                "{} is not available. please install before trying again.",
                self.aws
            ));
            e
        })?;
        Ok(())
    }

    async fn profile_valid(&self, profile: &str) -> bool {
        let command = CommandSpec::new(&self.aws).args([
            "sts",
            "get-caller-identity",
            "--profile",
            profile,
        ]);
        match self.runner.run(&command).await {
            Ok(_) => true,
            Err(e) => {
                warn!(profile = %profile, error = %e, "Profile validation failed");
                false
            }
        }
    }

    fn prompt_location(&self, prompter: &dyn Prompter) -> Result<Location> {
        let prefix = loop {
            let prefix = prompter.input("Parameter key prefix [no prefix]:", Some(""))?;
            match validate_prefix(&prefix) {
                Ok(()) => break prefix,
                Err(reason) => console::print_warning(reason),
            }
        };

        let profile = prompter.input(
            &format!("AWS profile [{}]:", DEFAULT_PROFILE),
            Some(DEFAULT_PROFILE),
        )?;

        let region = loop {
            let region = prompter.input(
                &format!("AWS region [{}]:", DEFAULT_REGION),
                Some(DEFAULT_REGION),
            )?;
            if SUPPORTED_REGIONS.contains(&region.as_str()) {
                break region;
            }
            console::print_warning(&format!("{} is not a supported region.", region));
        };

        Ok(Location {
            prefix,
            profile,
            region,
        })
    }

    async fn clear_credentials(&self) -> Result<()> {
        for key in [PREFIX_KEY, PROFILE_KEY, REGION_KEY] {
            self.secrets.delete_key(ADAPTER_SECRET, key).await?;
        }
        Ok(())
    }
}

/// Build a block from `<side>CpuLimit`-style tags
fn block_from_tags(tags: &HashMap<String, String>, side: &str) -> Option<ResourceBlock> {
    let quantity = |field: &str| -> Option<i64> {
        let value = tags.get(&format!("{}{}", side, field))?;
        value.trim().parse().ok()
    };

    ResourceBlock::new(
        quantity("CpuLimit")?,
        quantity("MemLimit")?,
        quantity("CpuRequest")?,
        quantity("MemRequest")?,
    )
}

#[async_trait]
impl InsightAdapter for ParameterStoreAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::ParameterStore
    }

    async fn initialize(&mut self, prompter: &dyn Prompter) -> Result<()> {
        self.check_cli().await?;

        let stored = self
            .secrets
            .read(ADAPTER_SECRET)
            .await?
            .unwrap_or_default();

        if let (Some(prefix), Some(profile), Some(region)) = (
            stored.get(PREFIX_KEY),
            stored.get(PROFILE_KEY),
            stored.get(REGION_KEY),
        ) {
            let location = Location {
                prefix: prefix.clone(),
                profile: profile.clone(),
                region: region.clone(),
            };
            let valid = validate_prefix(&location.prefix).is_ok()
                && SUPPORTED_REGIONS.contains(&location.region.as_str())
                && self.profile_valid(&location.profile).await;

            if valid {
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
                self.location = Some(location);
                return Ok(());
            }
            warn!("Stored parameter store settings rejected");
        }

        let location = self.prompt_location(prompter)?;
        if !self.profile_valid(&location.profile).await {
            self.clear_credentials().await?;
            return Err(Error::Credential(format!(
                "profile {} could not be validated",
                location.profile
            )));
        }

        let values = SecretBag::from([
            (ADAPTER_KEY.to_string(), self.kind().as_str().to_string()),
            (PREFIX_KEY.to_string(), location.prefix.clone()),
            (PROFILE_KEY.to_string(), location.profile.clone()),
            (REGION_KEY.to_string(), location.region.clone()),
        ]);
        self.secrets.write(ADAPTER_SECRET, &values).await?;

        self.location = Some(location);
        Ok(())
    }

    async fn get_insight(&self, key: &ContainerKey) -> Result<Insight> {
        let name = parameter_name(&self.location()?.prefix, key);
        let parameter = self.read_parameter(&name).await?;

        let value: serde_json::Value = serde_json::from_str(&parameter.value)
            .map_err(|e| Error::InvalidSpec(format!("{}: {}", name, e)))?;
        let resources = ResourceBlock::from_unitless(&value)
            .ok_or_else(|| Error::InvalidSpec(format!("{}: {}", name, parameter.value)))?;

        let approval = match self.version_approval(&name, parameter.version).await {
            Ok(approval) => approval,
            Err(e) => {
                debug!(parameter = %name, error = %e, "Version labels unavailable");
                Approval::NotApproved
            }
        };

        Ok(Insight {
            resources,
            approval,
        })
    }

    async fn get_approval(&self, key: &ContainerKey) -> Result<Approval> {
        let name = parameter_name(&self.location()?.prefix, key);
        let parameter = self.read_parameter(&name).await?;
        self.version_approval(&name, parameter.version).await
    }

    async fn set_approval(&self, approved: bool, key: &ContainerKey) -> Result<()> {
        let location = self.location()?;
        let name = parameter_name(&location.prefix, key);

        let tags = self.tags(&name).await?;
        let side = if approved { "recommended" } else { "current" };
        let block = block_from_tags(&tags, side).ok_or_else(|| {
            Error::InvalidSpec(format!("{}: missing or invalid {} tags", name, side))
        })?;

        let put = self.ssm(location, "put-parameter").args([
            "--name".to_string(),
            name.clone(),
            "--value".to_string(),
            block.to_unitless_value().to_string(),
            "--type".to_string(),
            "String".to_string(),
            "--overwrite".to_string(),
        ]);
        let written: PutParameterOutput = self.ssm_json(put).await?;

        let approval = Approval::from(approved);
        let label = self.ssm(location, "label-parameter-version").args([
            "--name".to_string(),
            name.clone(),
            "--parameter-version".to_string(),
            written.version.to_string(),
            "--labels".to_string(),
            approval.label().to_string(),
        ]);
        self.runner.run(&label).await?;

        info!(parameter = %name, version = written.version, approval = %approval, "Updated approval label");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::bag;
    use crate::testing::{MemorySecretStore, ScriptedPrompter, ScriptedRunner};

    const NAME: &str = "/team/east/web/Deployment/frontend/api/resourceSpec";

    fn key() -> ContainerKey {
        ContainerKey::new("east", "web", "Deployment", "frontend", "api")
    }

    fn adapter(runner: Arc<ScriptedRunner>) -> ParameterStoreAdapter {
        ParameterStoreAdapter::new(runner, Arc::new(MemorySecretStore::new()), "aws")
            .with_location("/team", "default", "us-east-1")
    }

    fn parameter(value: &str, version: i64) -> String {
        serde_json::json!({"Parameter": {"Name": NAME, "Value": value, "Version": version}})
            .to_string()
    }

    #[test]
    fn test_parameter_name_template() {
        assert_eq!(parameter_name("/team", &key()), NAME);
        assert_eq!(
            parameter_name("", &key()),
            "/east/web/Deployment/frontend/api/resourceSpec"
        );
    }

    #[test]
    fn test_prefix_validation() {
        for ok in ["", "/team", "/team/a.b-c_d", "/prod/Ssmx-not-first"] {
            assert!(validate_prefix(ok).is_ok(), "{ok:?} should be accepted");
        }
        for bad in ["aws", "/aws", "/SSM/x", "ssmthing", "team", "/team/", "/te am"] {
            assert!(validate_prefix(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[tokio::test]
    async fn test_get_insight_with_label() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(
            "aws ssm get-parameter ",
            &parameter(
                r#"{"limits":{"cpu":"250","memory":"500"},"requests":{"cpu":"100","memory":"200"}}"#,
                3,
            ),
        );
        runner.respond(
            "aws ssm get-parameter-history",
            r#"{"Parameters":[{"Version":2,"Labels":["NotApproved"]},{"Version":3,"Labels":["Approved"]}]}"#,
        );

        let insight = adapter(runner.clone()).get_insight(&key()).await.unwrap();
        assert_eq!(insight.approval, Approval::Approved);
        assert_eq!(insight.resources.to_value()["limits"]["cpu"], "250m");
        assert_eq!(insight.resources.to_value()["requests"]["memory"], "200Mi");

        assert!(runner.calls()[0].contains(&format!("--name {} --with-decryption", NAME)));
    }

    #[tokio::test]
    async fn test_invalid_values_are_invalid_spec() {
        for value in [
            r#"{"limits":{"cpu":"0","memory":"500"},"requests":{"cpu":"100","memory":"200"}}"#,
            r#"{"limits":{"cpu":"-1","memory":"500"},"requests":{"cpu":"100","memory":"200"}}"#,
            r#"{"limits":{"cpu":"abc","memory":"500"},"requests":{"cpu":"100","memory":"200"}}"#,
            r#"{"limits":{"memory":"500"},"requests":{"cpu":"100","memory":"200"}}"#,
            "not json",
        ] {
            let runner = Arc::new(ScriptedRunner::new());
            runner.respond("aws ssm get-parameter ", &parameter(value, 1));

            let err = adapter(runner).get_insight(&key()).await.unwrap_err();
            assert!(matches!(err, Error::InvalidSpec(_)), "{value}: {err:?}");
        }
    }

    #[tokio::test]
    async fn test_missing_parameter_is_not_found() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail(
            "aws ssm get-parameter ",
            254,
            "An error occurred (ParameterNotFound) when calling the GetParameter operation",
        );

        let err = adapter(runner).get_insight(&key()).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_set_approval_writes_tagged_block_and_labels() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.respond(
            "aws ssm list-tags-for-resource",
            r#"{"TagList":[
                {"Key":"currentCpuLimit","Value":"120"},{"Key":"currentMemLimit","Value":"140"},
                {"Key":"currentCpuRequest","Value":"80"},{"Key":"currentMemRequest","Value":"90"},
                {"Key":"recommendedCpuLimit","Value":"250"},{"Key":"recommendedMemLimit","Value":"500"},
                {"Key":"recommendedCpuRequest","Value":"100"},{"Key":"recommendedMemRequest","Value":"200"}
            ]}"#,
        );
        runner.respond("aws ssm put-parameter", r#"{"Version":7,"Tier":"Standard"}"#);

        let adapter = adapter(runner.clone());
        adapter.set_approval(true, &key()).await.unwrap();
        adapter.set_approval(false, &key()).await.unwrap();

        let calls = runner.calls();
        let puts: Vec<_> = calls.iter().filter(|c| c.contains("put-parameter")).collect();
        assert!(puts[0].contains(r#""limits":{"cpu":"250","memory":"500"}"#));
        assert!(puts[1].contains(r#""limits":{"cpu":"120","memory":"140"}"#));

        let labels: Vec<_> = calls
            .iter()
            .filter(|c| c.contains("label-parameter-version"))
            .collect();
        assert!(labels[0].contains("--parameter-version 7 --labels Approved"));
        assert!(labels[1].contains("--parameter-version 7 --labels NotApproved"));
    }

    #[tokio::test]
    async fn test_initialize_prompts_and_persists() {
        let runner = Arc::new(ScriptedRunner::new());
        let secrets = Arc::new(MemorySecretStore::new());
        let prompter = ScriptedPrompter::new(["/aws", "/team", "", "mars-1", ""]);

        let mut adapter = ParameterStoreAdapter::new(runner.clone(), secrets.clone(), "aws");
        adapter.initialize(&prompter).await.unwrap();

        let stored = secrets.read(ADAPTER_SECRET).await.unwrap().unwrap();
        assert_eq!(
            stored,
            bag([
                (ADAPTER_KEY, "parameter-store"),
                (PREFIX_KEY, "/team"),
                (PROFILE_KEY, "default"),
                (REGION_KEY, "us-east-1"),
            ])
        );
        assert!(runner
            .calls()
            .contains(&"aws sts get-caller-identity --profile default".to_string()));
    }

    #[tokio::test]
    async fn test_initialize_rejected_profile() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail("aws sts get-caller-identity", 255, "could not find profile");
        let secrets = Arc::new(MemorySecretStore::new());
        secrets
            .write(
                ADAPTER_SECRET,
                &bag([(PREFIX_KEY, ""), (PROFILE_KEY, "gone"), (REGION_KEY, "us-east-1")]),
            )
            .await
            .unwrap();

        let mut adapter = ParameterStoreAdapter::new(runner, secrets.clone(), "aws");
        let err = adapter
            .initialize(&ScriptedPrompter::new(["", "gone", ""]))
            .await
            .unwrap_err();

        assert!(err.is_credential());
        let stored = secrets.read(ADAPTER_SECRET).await.unwrap().unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn test_initialize_requires_cli() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.fail("aws --version", 127, "not found");

        let mut adapter =
            ParameterStoreAdapter::new(runner, Arc::new(MemorySecretStore::new()), "aws");
        let err = adapter
            .initialize(&ScriptedPrompter::default())
            .await
            .unwrap_err();
        assert!(!err.is_credential());
    }
}
