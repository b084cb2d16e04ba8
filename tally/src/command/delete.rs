use clap::Parser;
use eyre::Result;
use tally_client::Context;

#[derive(Parser, Debug)]
pub struct Cmd {
    /// GUID of the entry to delete
    guid: String,
}

impl Cmd {
    pub async fn run(self, ctx: &Context) -> Result<()> {
        ctx.delete_time_entry(&self.guid).await?;
        println!("Deleted.");
        crate::command::sync_quietly(ctx).await;
        Ok(())
    }
}
