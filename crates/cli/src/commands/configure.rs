//! `-c --adapter` and `-c --cluster-mapping`

use super::{initialize_with_retry, Session};
use anyhow::{Context, Result};
use optimize_lib::adapter::select_adapter;
use optimize_lib::console;
use optimize_lib::Adapter;

/// Choose an adapter from the menu and initialize it
pub async fn adapter(session: &Session) -> Result<i32> {
    let kind = select_adapter(&session.prompter)?;
    let mut adapter = Adapter::new(
        kind,
        session.runner.clone(),
        session.secrets.clone(),
        &session.settings,
    );
    initialize_with_retry(&mut adapter, &session.prompter).await?;

    console::print_success(&format!("{} adapter configured", kind.display_name()));
    Ok(0)
}

/// Prompt for the remote cluster and store it
pub async fn cluster_mapping(session: &Session) -> Result<i32> {
    let remote = session
        .resolver()
        .configure_cluster_mapping(&session.prompter)
        .await
        .context("Failed to store cluster mapping")?;

    console::print_success(&format!("Remote cluster set to {}", remote));
    Ok(0)
}
