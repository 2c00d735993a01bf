//! Helm optimize plugin
//!
//! Rewrites the CPU and memory resources of a chart's containers from an
//! insight repository before handing the chart to helm.

mod commands;
mod help;
mod invocation;

use anyhow::{Context, Result};
use clap::Parser;
use commands::{approve, configure, deploy, Session};
use help::PluginManifest;
use invocation::Invocation;
use optimize_lib::{console, Error, PluginSettings};
use tracing_subscriber::EnvFilter;

/// Helm optimize plugin
#[derive(Parser)]
#[command(name = "helm-optimize")]
#[command(disable_help_flag = true, disable_version_flag = true)]
pub struct Cli {
    /// Plugin switches or a helm command line
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("HELM_OPTIMIZE_LOG")
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(invocation: Invocation) -> Result<i32> {
    let settings = PluginSettings::load().context("Failed to load plugin settings")?;

    match invocation {
        Invocation::Help => {
            let manifest = settings.plugin_manifest();
            println!("{}", PluginManifest::load(manifest.as_deref()).render());
            return Ok(0);
        }
        Invocation::Incorrect => {
            println!("incorrect optimize-plugin command - refer to help menu");
            return Ok(0);
        }
        _ => {}
    }

    let session = Session::new(settings);
    if invocation.needs_cluster() {
        session.check_dependencies().await?;
    }

    match invocation {
        Invocation::ConfigureAdapter => configure::adapter(&session).await,
        Invocation::ConfigureClusterMapping => configure::cluster_mapping(&session).await,
        Invocation::Approve(args) => approve::run(&session, &args).await,
        Invocation::Deploy(args) => deploy::run(&session, &args).await,
        Invocation::PassThrough(args) => deploy::pass_through(&session, &args).await,
        Invocation::Help | Invocation::Incorrect => Ok(0),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let code = match run(Invocation::parse(&cli.args)).await {
        Ok(code) => code,
        Err(e) if matches!(e.downcast_ref::<Error>(), Some(Error::Cancelled)) => 0,
        Err(e) => {
            console::print_error(&format!("{:#}", e));
            1
        }
    };

    std::process::exit(code);
}
