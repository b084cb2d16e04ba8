use clap::Parser;
use eyre::Result;
use tally_client::Context;

#[derive(Parser, Debug)]
pub struct Cmd {
    /// New channel: stable, beta or dev
    value: Option<String>,

    /// Check for updates on the configured channel
    #[arg(long)]
    check: bool,
}

impl Cmd {
    pub async fn run(self, ctx: &Context) -> Result<()> {
        match self.value {
            Some(value) => {
                ctx.set_update_channel(&value).await?;
                println!("Update channel set to {value}.");
            }
            None => {
                let channel = ctx.get_update_channel().await?;
                println!("Update channel: {channel}");
            }
        }

        if self.check {
            // The outcome arrives through the update callback.
            ctx.check_for_updates().await;
        }
        Ok(())
    }
}
