//! Core data models for the insight-rewrite pipeline

use serde_json::Value;
use std::fmt;

/// CPU and memory quantities of one side (limits or requests) of a resource block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourcePair {
    pub cpu_millicores: u64,
    pub memory_mib: u64,
}

/// The `{limits, requests}` block written into a container spec
///
/// Every quantity is a positive integer; CPU is expressed in millicores
/// and memory in mebibytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceBlock {
    pub limits: ResourcePair,
    pub requests: ResourcePair,
}

impl ResourceBlock {
    /// Build a block, rejecting any quantity that is not strictly positive
    pub fn new(
        cpu_limit: i64,
        mem_limit: i64,
        cpu_request: i64,
        mem_request: i64,
    ) -> Option<Self> {
        let positive = |v: i64| u64::try_from(v).ok().filter(|v| *v > 0);
        Some(Self {
            limits: ResourcePair {
                cpu_millicores: positive(cpu_limit)?,
                memory_mib: positive(mem_limit)?,
            },
            requests: ResourcePair {
                cpu_millicores: positive(cpu_request)?,
                memory_mib: positive(mem_request)?,
            },
        })
    }

    /// Parse a unit-less `{limits:{cpu,memory}, requests:{cpu,memory}}` value
    ///
    /// Quantities may be JSON integers or strings of decimal digits.
    pub fn from_unitless(value: &Value) -> Option<Self> {
        let quantity = |side: &str, field: &str| -> Option<i64> {
            match value.get(side)?.get(field)? {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => parse_positive_integer(s),
                _ => None,
            }
        };

        Self::new(
            quantity("limits", "cpu")?,
            quantity("limits", "memory")?,
            quantity("requests", "cpu")?,
            quantity("requests", "memory")?,
        )
    }

    /// The block with unit suffixes, as written into manifests
    pub fn to_value(&self) -> Value {
        serde_json::json!({
            "limits": {
                "cpu": format!("{}m", self.limits.cpu_millicores),
                "memory": format!("{}Mi", self.limits.memory_mib),
            },
            "requests": {
                "cpu": format!("{}m", self.requests.cpu_millicores),
                "memory": format!("{}Mi", self.requests.memory_mib),
            },
        })
    }

    /// The block without units, as stored in the parameter store
    pub fn to_unitless_value(&self) -> Value {
        serde_json::json!({
            "limits": {
                "cpu": self.limits.cpu_millicores.to_string(),
                "memory": self.limits.memory_mib.to_string(),
            },
            "requests": {
                "cpu": self.requests.cpu_millicores.to_string(),
                "memory": self.requests.memory_mib.to_string(),
            },
        })
    }
}

impl fmt::Display for ResourceBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

/// Accepts only `^[1-9][0-9]*$`
fn parse_positive_integer(s: &str) -> Option<i64> {
    let mut chars = s.chars();
    match chars.next() {
        Some('1'..='9') if chars.all(|c| c.is_ascii_digit()) => s.parse().ok(),
        _ => None,
    }
}

/// Approval state gating whether a recommendation is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Approval {
    Approved,
    #[default]
    NotApproved,
}

impl Approval {
    pub const SPECIFIC_CHANGE: &'static str = "Approve Specific Change";
    pub const ANY_CHANGE: &'static str = "Approve Any Change";
    pub const NOT_APPROVED: &'static str = "Not Approved";

    /// Map an analytics `Approval Setting` attribute value
    ///
    /// Only `Not Approved` (or a blank value) withholds the recommendation.
    pub fn from_setting(setting: &str) -> Self {
        match setting.trim() {
            "" | Self::NOT_APPROVED => Approval::NotApproved,
            _ => Approval::Approved,
        }
    }

    /// Map a parameter version label
    pub fn from_label(label: &str) -> Self {
        match label {
            "Approved" => Approval::Approved,
            _ => Approval::NotApproved,
        }
    }

    /// The parameter version label encoding this state
    pub fn label(&self) -> &'static str {
        match self {
            Approval::Approved => "Approved",
            Approval::NotApproved => "NotApproved",
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, Approval::Approved)
    }
}

impl From<bool> for Approval {
    fn from(approved: bool) -> Self {
        if approved {
            Approval::Approved
        } else {
            Approval::NotApproved
        }
    }
}

impl fmt::Display for Approval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Approval::Approved => write!(f, "Approved"),
            Approval::NotApproved => write!(f, "Not Approved"),
        }
    }
}

/// Identity of one container in the insight repository
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerKey {
    pub cluster: String,
    pub namespace: String,
    pub kind: String,
    pub name: String,
    pub container: String,
}

impl ContainerKey {
    pub fn new(
        cluster: impl Into<String>,
        namespace: impl Into<String>,
        kind: impl Into<String>,
        name: impl Into<String>,
        container: impl Into<String>,
    ) -> Self {
        Self {
            cluster: cluster.into(),
            namespace: namespace.into(),
            kind: kind.into(),
            name: name.into(),
            container: container.into(),
        }
    }
}

impl fmt::Display for ContainerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cluster[{}] namespace[{}] objType[{}] objName[{}] container[{}]",
            self.cluster, self.namespace, self.kind, self.name, self.container
        )
    }
}

/// A resource block together with the approval state that selected it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Insight {
    pub resources: ResourceBlock,
    pub approval: Approval,
}
