use clap::Parser;
use eyre::Result;
use tally_client::Context;

#[derive(Parser, Debug)]
pub struct Cmd {
    /// Pull everything instead of changes since the last sync
    #[arg(long, short)]
    full: bool,
}

impl Cmd {
    pub async fn run(self, ctx: &Context) -> Result<()> {
        ctx.sync(self.full).await?;
        let pending = ctx.pushable_models().await?;
        if pending > 0 {
            println!("Synced; {pending} change(s) still pending.");
        } else {
            println!("Synced.");
        }
        Ok(())
    }
}
