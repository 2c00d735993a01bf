//! User-facing console output

use crate::models::{Approval, ResourceBlock};
use colored::Colorize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Print the cluster and adapter banner shown before deploy and approval runs
pub fn print_banner(local_cluster: &str, remote_cluster: &str, adapter: &str) {
    println!("{} {}", "LOCAL CLUSTER:".bold(), local_cluster);
    println!("{} {}", "REMOTE CLUSTER:".bold(), remote_cluster);
    println!("{} {}", "ADAPTER:".bold(), adapter);
}

/// Print the header line of one workload
pub fn print_workload(namespace: &str, kind: &str, name: &str) {
    println!("namespace[{}] objType[{}] objName[{}]", namespace, kind, name);
}

/// Color approval state
pub fn color_approval(approval: Approval) -> String {
    let text = approval.to_string();
    match approval {
        Approval::Approved => text.green().to_string(),
        Approval::NotApproved => text.yellow().to_string(),
    }
}

/// `<n>.<container>: [<approval>] <resources>`
pub fn print_insight(index: usize, container: &str, approval: Approval, resources: &ResourceBlock) {
    println!(
        "{}.{}: [{}] {}",
        index,
        container,
        color_approval(approval),
        resources
    );
}

/// `<n>.<container>: [<approval>]`
pub fn print_approval(index: usize, container: &str, approval: Approval) {
    println!("{}.{}: [{}]", index, container, color_approval(approval));
}

/// `<n>.<container>:` followed by the fallback lines
pub fn print_container(index: usize, container: &str) {
    println!("{}.{}:", index, container);
}

pub fn print_checking_cluster(resources: Option<&Value>) {
    match resources {
        Some(resources) => println!("  Checking Cluster: {}", resources),
        None => println!("  Checking Cluster: {}", "unavailable".dimmed()),
    }
}

pub fn print_checking_defaults(resources: Option<&Value>) {
    match resources {
        Some(resources) => println!("  Checking Defaults: {}", resources),
        None => println!("  Checking Defaults: {}", "none".dimmed()),
    }
}

pub fn print_no_default() {
    println!("  {}", "*WARNING* No default config present!".yellow().bold());
}

/// Where the final resources of a container came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceSource {
    Recommended,
    Current,
    Cluster,
    Default,
    Unset,
}

impl std::fmt::Display for ResourceSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResourceSource::Recommended => "recommended",
            ResourceSource::Current => "current",
            ResourceSource::Cluster => "cluster",
            ResourceSource::Default => "default",
            ResourceSource::Unset => "warning",
        };
        write!(f, "{}", name)
    }
}

/// One rewritten container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteRecord {
    pub namespace: String,
    pub kind: String,
    pub name: String,
    pub container: String,
    pub source: ResourceSource,
}

/// Row for the rewrite summary table
#[derive(Tabled)]
struct RewriteRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Container")]
    container: String,
    #[tabled(rename = "Source")]
    source: String,
}

fn color_source(source: ResourceSource) -> String {
    let text = source.to_string();
    match source {
        ResourceSource::Recommended => text.green().to_string(),
        ResourceSource::Current | ResourceSource::Cluster => text.blue().to_string(),
        ResourceSource::Default => text.yellow().to_string(),
        ResourceSource::Unset => text.red().to_string(),
    }
}

/// Render the summary table, or `None` when nothing was rewritten
pub fn summary_table(records: &[RewriteRecord]) -> Option<String> {
    if records.is_empty() {
        return None;
    }

    let rows: Vec<RewriteRow> = records
        .iter()
        .map(|r| RewriteRow {
            namespace: r.namespace.clone(),
            kind: r.kind.clone(),
            name: r.name.clone(),
            container: r.container.clone(),
            source: color_source(r.source),
        })
        .collect();

    Some(Table::new(rows).with(Style::rounded()).to_string())
}

pub fn print_summary(records: &[RewriteRecord]) {
    match summary_table(records) {
        Some(table) => println!("{}", table),
        None => println!("{}", "No containers found".yellow()),
    }
}
