//! `-a <release> <chart> [flags]`

use super::Session;
use anyhow::Result;
use optimize_lib::approval::ApprovalWorkflow;
use optimize_lib::console;
use optimize_lib::InsightAdapter;

pub async fn run(session: &Session, template_args: &[String]) -> Result<i32> {
    let context = session.context().await?;
    let adapter = session.adapter().await?;

    console::print_banner(
        &context.local_cluster,
        &context.remote_cluster,
        adapter.kind().display_name(),
    );

    let toggled = ApprovalWorkflow::new(
        &adapter,
        &session.prompter,
        &context.remote_cluster,
        &context.default_namespace,
    )
    .run(session.runner.as_ref(), &session.settings.helm_bin, template_args)
    .await?;

    println!();
    console::print_info(&format!("{} approval setting(s) changed", toggled));
    Ok(0)
}
