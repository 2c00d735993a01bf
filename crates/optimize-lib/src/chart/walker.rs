//! Chart rendering and traversal
//!
//! Charts are materialised in a scratch directory, rendered with
//! `template --output-dir`, then walked subcharts first.

use crate::error::{Error, Result};
use crate::process::{CommandRunner, CommandSpec};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// Whether `chart` names a local chart directory
pub fn is_local_chart(chart: &str) -> bool {
    Path::new(chart).join("Chart.yaml").is_file()
}

/// Directory name the chart lands under inside the scratch directory
pub fn chart_dir_name(chart: &str) -> Result<String> {
    let path = Path::new(chart);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    absolute
        .components()
        .filter_map(|c| match c {
            std::path::Component::Normal(name) => name.to_str(),
            _ => None,
        })
        .last()
        .map(str::to_string)
        .ok_or_else(|| Error::Parse(format!("cannot derive a chart name from {}", chart)))
}

/// Copy a local chart directory into `dest/<name>`
pub fn copy_chart(src: &Path, dest: &Path, name: &str) -> Result<PathBuf> {
    let target = dest.join(name);

    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::Parse(e.to_string()))?;
        let destination = target.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&destination)?;
        } else {
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &destination)?;
        }
    }

    debug!(src = %src.display(), dest = %target.display(), "Copied chart");
    Ok(target)
}

/// `helm pull <chart> --untar --untardir <dest>`
pub async fn pull_chart(
    runner: &dyn CommandRunner,
    helm: &str,
    chart: &str,
    dest: &Path,
) -> Result<()> {
    let command = CommandSpec::new(helm)
        .args(["pull", chart, "--untar", "--untardir"])
        .arg(dest.display().to_string());
    runner.run(&command).await?;
    Ok(())
}

/// `helm template <args> --output-dir <dest>`
pub async fn render_to_dir(
    runner: &dyn CommandRunner,
    helm: &str,
    args: &[String],
    dest: &Path,
) -> Result<()> {
    let command = CommandSpec::new(helm)
        .arg("template")
        .args(args.iter().cloned())
        .args(["--output-dir".to_string(), dest.display().to_string()]);
    runner.run(&command).await?;
    Ok(())
}

/// `helm template <args>`, returning the rendered stream
pub async fn render_to_string(
    runner: &dyn CommandRunner,
    helm: &str,
    args: &[String],
) -> Result<String> {
    let command = CommandSpec::new(helm).arg("template").args(args.iter().cloned());
    Ok(runner.run(&command).await?.stdout)
}

/// Every rendered template file of a chart, subcharts first
///
/// Subcharts under `charts/` are visited in name order, each recursively,
/// before the chart's own `templates/` tree.
pub fn template_files(chart_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();

    let charts = chart_dir.join("charts");
    if charts.is_dir() {
        let mut subcharts: Vec<PathBuf> = fs::read_dir(&charts)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        subcharts.sort();

        for subchart in subcharts {
            files.extend(template_files(&subchart)?);
        }
    }

    let templates = chart_dir.join("templates");
    if templates.is_dir() {
        for entry in WalkDir::new(&templates).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::Io(e.into()))?;
            let path = entry.path();
            let is_yaml = matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml")
            );
            if entry.file_type().is_file() && is_yaml {
                files.push(path.to_path_buf());
            }
        }
    }

    Ok(files)
}
