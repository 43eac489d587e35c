use fullnet_deploy::FullNodeDeployer;

use super::Context;

fn deployer(ctx: &Context) -> FullNodeDeployer {
    FullNodeDeployer::from_config(&ctx.config, ctx.runner.clone(), ctx.options)
}

pub async fn install(ctx: &Context) -> anyhow::Result<()> {
    if let Some(enodes) = deployer(ctx).install_chart().await? {
        print_enodes(&enodes);
    }
    Ok(())
}

pub async fn upgrade(ctx: &Context, reset: bool) -> anyhow::Result<()> {
    deployer(ctx).upgrade_chart(reset).await?;
    Ok(())
}

pub async fn remove(ctx: &Context) -> anyhow::Result<()> {
    deployer(ctx).remove_chart().await?;
    Ok(())
}

pub async fn enodes(ctx: &Context) -> anyhow::Result<()> {
    print_enodes(&deployer(ctx).enodes().await?);
    Ok(())
}

fn print_enodes(enodes: &[String]) {
    for enode in enodes {
        println!("{enode}");
    }
}
