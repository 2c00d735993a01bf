//! Core library for the helm optimize plugin
//!
//! This crate provides the insight-rewrite pipeline:
//! - Process execution and the cluster secret store
//! - Kube context and remote cluster resolution
//! - Insight adapters (analytics REST service, parameter store)
//! - Chart walking and resource rewriting
//! - The per-container approval workflow

pub mod adapter;
pub mod approval;
pub mod chart;
pub mod console;
pub mod context;
pub mod deploy;
pub mod error;
pub mod models;
pub mod process;
pub mod prompt;
pub mod rewrite;
pub mod secrets;
pub mod settings;

#[cfg(test)]
pub(crate) mod testing;

pub use adapter::{Adapter, AdapterKind, InsightAdapter};
pub use error::{Error, Result};
pub use models::*;
pub use settings::PluginSettings;
