use clap::Parser;
use eyre::{eyre, Result};
use tally_client::format;
use tally_client::Context;

#[derive(Parser, Debug)]
pub struct Cmd {
    /// Stop at this time instead of now (RFC 3339)
    #[arg(long)]
    at: Option<String>,
}

impl Cmd {
    pub async fn run(self, ctx: &Context) -> Result<()> {
        let stopped = match self.at {
            Some(at) => {
                let at = format::parse_iso8601(&at)
                    .map_err(|_| eyre!("Invalid time, expected RFC 3339"))?;
                Some(ctx.stop_running_time_entry_at(at).await?)
            }
            None => ctx.stop().await?,
        };

        match stopped {
            Some(item) => {
                println!("Stopped \"{}\" at {}", item.description, item.duration);
                crate::command::sync_quietly(ctx).await;
            }
            None => println!("Nothing is running."),
        }
        Ok(())
    }
}
