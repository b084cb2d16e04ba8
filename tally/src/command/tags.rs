use eyre::Result;
use tally_client::Context;

pub async fn run(ctx: &Context) -> Result<()> {
    let tags = ctx.tags().await?;
    if tags.is_empty() {
        println!("No tags yet.");
        return Ok(());
    }
    for tag in tags {
        println!("{tag}");
    }
    Ok(())
}
