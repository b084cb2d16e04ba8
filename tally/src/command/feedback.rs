use clap::Parser;
use eyre::Result;
use tally_client::Context;

#[derive(Parser, Debug)]
pub struct Cmd {
    /// Short topic line
    topic: String,

    /// What happened
    details: String,
}

impl Cmd {
    pub async fn run(self, ctx: &Context) -> Result<()> {
        ctx.feedback_send(&self.topic, &self.details, "").await?;
        println!("Thanks for the feedback!");
        Ok(())
    }
}
