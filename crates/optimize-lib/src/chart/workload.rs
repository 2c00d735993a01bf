//! Supported workload kinds and a typed view over rendered manifests

use crate::error::{Error, Result};
use serde_yaml::Value;
use std::fmt;

/// Workload kinds whose containers are rewritten
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadKind {
    Pod,
    CronJob,
    DaemonSet,
    Job,
    ReplicaSet,
    ReplicationController,
    StatefulSet,
    Deployment,
}

impl WorkloadKind {
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "Pod" => Some(WorkloadKind::Pod),
            "CronJob" => Some(WorkloadKind::CronJob),
            "DaemonSet" => Some(WorkloadKind::DaemonSet),
            "Job" => Some(WorkloadKind::Job),
            "ReplicaSet" => Some(WorkloadKind::ReplicaSet),
            "ReplicationController" => Some(WorkloadKind::ReplicationController),
            "StatefulSet" => Some(WorkloadKind::StatefulSet),
            "Deployment" => Some(WorkloadKind::Deployment),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkloadKind::Pod => "Pod",
            WorkloadKind::CronJob => "CronJob",
            WorkloadKind::DaemonSet => "DaemonSet",
            WorkloadKind::Job => "Job",
            WorkloadKind::ReplicaSet => "ReplicaSet",
            WorkloadKind::ReplicationController => "ReplicationController",
            WorkloadKind::StatefulSet => "StatefulSet",
            WorkloadKind::Deployment => "Deployment",
        }
    }

    /// Path of the `containers` sequence inside the manifest
    pub fn container_path(&self) -> &'static [&'static str] {
        match self {
            WorkloadKind::Pod => &["spec", "containers"],
            WorkloadKind::CronJob => &[
                "spec",
                "jobTemplate",
                "spec",
                "template",
                "spec",
                "containers",
            ],
            _ => &["spec", "template", "spec", "containers"],
        }
    }

    /// The container path as a kubectl jsonpath expression
    pub fn jsonpath(&self) -> String {
        format!("jsonpath={{.{}}}", self.container_path().join("."))
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of a supported workload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    pub kind: WorkloadKind,
    pub name: String,
    pub namespace: Option<String>,
}

/// One container entry of a workload
#[derive(Debug, Clone, PartialEq)]
pub struct Container {
    pub name: String,
    pub resources: Option<Value>,
}

/// One YAML document of a rendered template
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    doc: Value,
}

impl Manifest {
    pub fn new(doc: Value) -> Self {
        Self { doc }
    }

    /// Parse every non-empty document of a multi-document YAML stream
    pub fn parse_all(content: &str) -> Result<Vec<Manifest>> {
        Self::parse_each(content).into_iter().collect()
    }

    /// Parse each document on its own so one broken document does not hide the rest
    pub fn parse_each(content: &str) -> Vec<Result<Manifest>> {
        split_documents(content)
            .into_iter()
            .filter_map(|doc| match serde_yaml::from_str::<Value>(doc) {
                Ok(value) if value.is_null() => None,
                Ok(value) => Some(Ok(Manifest::new(value))),
                Err(e) => Some(Err(e.into())),
            })
            .collect()
    }

    /// Serialize documents back into one stream separated by `---`
    pub fn render_all(manifests: &[Manifest]) -> Result<String> {
        let docs = manifests
            .iter()
            .map(|m| serde_yaml::to_string(&m.doc))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(docs.join("---\n"))
    }

    pub fn value(&self) -> &Value {
        &self.doc
    }

    fn str_at(&self, path: &[&str]) -> Option<&str> {
        path.iter()
            .try_fold(&self.doc, |node, key| node.get(*key))?
            .as_str()
    }

    /// The workload identity, when the kind is supported
    pub fn workload(&self) -> Option<Workload> {
        let kind = WorkloadKind::parse(self.str_at(&["kind"])?)?;
        let name = self.str_at(&["metadata", "name"])?.to_string();
        let namespace = self
            .str_at(&["metadata", "namespace"])
            .filter(|ns| !ns.is_empty())
            .map(str::to_string);

        Some(Workload {
            kind,
            name,
            namespace,
        })
    }

    /// Whether the manifest is a chart test hook
    pub fn is_test_hook(&self) -> bool {
        self.str_at(&["metadata", "annotations", "helm.sh/hook"])
            .map(|hook| hook.trim_start().starts_with("test"))
            .unwrap_or(false)
    }

    fn containers_node(&self, kind: WorkloadKind) -> Option<&Vec<Value>> {
        kind.container_path()
            .iter()
            .try_fold(&self.doc, |node, key| node.get(*key))?
            .as_sequence()
    }

    fn containers_node_mut(&mut self, kind: WorkloadKind) -> Option<&mut Vec<Value>> {
        let mut node = &mut self.doc;
        for key in kind.container_path() {
            node = node.get_mut(*key)?;
        }
        node.as_sequence_mut()
    }

    /// Named containers in document order
    pub fn containers(&self, kind: WorkloadKind) -> Vec<Container> {
        self.containers_node(kind)
            .map(|containers| {
                containers
                    .iter()
                    .filter_map(|c| {
                        Some(Container {
                            name: c.get("name")?.as_str()?.to_string(),
                            resources: c.get("resources").filter(|r| !r.is_null()).cloned(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Replace the `resources` field of the named container
    pub fn set_resources(
        &mut self,
        kind: WorkloadKind,
        container: &str,
        resources: Value,
    ) -> Result<()> {
        let entry = self
            .containers_node_mut(kind)
            .and_then(|containers| {
                containers
                    .iter_mut()
                    .find(|c| c.get("name").and_then(Value::as_str) == Some(container))
            })
            .and_then(Value::as_mapping_mut)
            .ok_or_else(|| {
                Error::Parse(format!("container {} not found in manifest", container))
            })?;

        entry.insert(Value::String("resources".into()), resources);
        Ok(())
    }
}

/// Convert a JSON value into its YAML equivalent
pub fn to_yaml(value: &serde_json::Value) -> Result<Value> {
    Ok(serde_yaml::to_value(value)?)
}

/// Split a YAML stream on document separators, dropping empty and comment-only parts
fn split_documents(content: &str) -> Vec<&str> {
    let mut docs = Vec::new();
    let mut start = 0;
    let mut offset = 0;

    for line in content.split_inclusive('\n') {
        if is_separator(line) {
            docs.push(&content[start..offset]);
            start = offset + line.len();
        }
        offset += line.len();
    }
    docs.push(&content[start..]);

    docs.into_iter()
        .filter(|doc| {
            doc.lines()
                .map(str::trim)
                .any(|line| !line.is_empty() && !line.starts_with('#'))
        })
        .collect()
}

fn is_separator(line: &str) -> bool {
    let line = line.trim_end();
    line == "---" || line.starts_with("--- ")
}
