//! `install` / `upgrade` with rewritten resources, and plain pass-through

use super::Session;
use anyhow::Result;
use optimize_lib::deploy::{self, DeployPipeline};
use optimize_lib::rewrite::KubectlProbe;

pub async fn run(session: &Session, args: &[String]) -> Result<i32> {
    let context = session.context().await?;
    let adapter = session.adapter().await?;
    let probe = KubectlProbe::new(
        session.runner.clone(),
        session.settings.kubectl_bin.clone(),
        context.local_cluster.clone(),
    );

    let status = DeployPipeline::new(
        session.runner.as_ref(),
        &adapter,
        &probe,
        &context,
        session.settings.helm_bin.clone(),
    )
    .run(args)
    .await?;
    Ok(status)
}

pub async fn pass_through(session: &Session, args: &[String]) -> Result<i32> {
    Ok(deploy::pass_through(session.runner.as_ref(), &session.settings.helm_bin, args).await?)
}
