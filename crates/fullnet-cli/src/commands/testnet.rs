use fullnet_deploy::TestnetDriver;

use super::Context;

fn driver(ctx: &Context) -> anyhow::Result<TestnetDriver> {
    Ok(TestnetDriver::from_config(
        &ctx.config,
        ctx.runner.clone(),
        ctx.options.helm_dry_run,
    )?)
}

pub async fn reset_upgrade(ctx: &Context) -> anyhow::Result<()> {
    driver(ctx)?.reset_and_upgrade().await?;
    Ok(())
}

pub async fn poll_bootnode(ctx: &Context) -> anyhow::Result<()> {
    driver(ctx)?.poll_for_bootnode_load_balancer().await?;
    Ok(())
}
