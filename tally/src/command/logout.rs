use eyre::Result;
use tally_client::Context;

pub async fn run(ctx: &Context) -> Result<()> {
    ctx.logout().await?;
    println!("Logged out.");
    Ok(())
}
