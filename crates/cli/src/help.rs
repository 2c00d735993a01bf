//! Plugin help, read from the helm plugin manifest

use serde::Deserialize;
use std::path::Path;

const RULE: &str = "--------------------------------------------------------------------------------";

#[derive(Debug, Deserialize)]
pub struct PluginManifest {
    pub version: String,
    #[serde(default)]
    pub description: String,
}

impl PluginManifest {
    /// Read `plugin.yaml`, falling back to the binary's own metadata
    pub fn load(path: Option<&Path>) -> Self {
        path.and_then(|p| std::fs::read_to_string(p).ok())
            .and_then(|raw| serde_yaml::from_str(&raw).ok())
            .unwrap_or_else(|| PluginManifest {
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: env!("CARGO_PKG_DESCRIPTION").to_string(),
            })
    }

    pub fn render(&self) -> String {
        format!(
            "{RULE}\nNAME: Optimize Plugin\nVERSION: {}\n{RULE}\n{}\n{RULE}",
            self.version,
            self.description.trim_end()
        )
    }
}
