use clap::Parser;
use eyre::Result;
use tally_client::Context;

#[derive(Parser, Debug)]
pub struct Cmd {
    /// GUID of the entry to continue; the latest one when omitted
    guid: Option<String>,
}

impl Cmd {
    pub async fn run(self, ctx: &Context) -> Result<()> {
        let item = match self.guid {
            Some(guid) => Some(ctx.continue_entry(&guid).await?),
            None => ctx.continue_latest().await?,
        };

        match item {
            Some(item) => {
                println!("Continuing \"{}\"", item.description);
                crate::command::sync_quietly(ctx).await;
            }
            None => println!("Nothing to continue."),
        }
        Ok(())
    }
}
