use clap::Parser;
use eyre::Result;
use tally_client::Context;

#[derive(Parser, Debug)]
pub struct Cmd {
    /// What you are working on
    description: Option<String>,

    /// Log a fixed duration instead of starting the clock, e.g. "1 h 30 min"
    #[arg(long, short)]
    duration: Option<String>,

    /// Project id to book the entry on
    #[arg(long, short)]
    project: Option<u64>,

    /// Task id to book the entry on
    #[arg(long, short)]
    task: Option<u64>,

    /// Semicolon-separated tags
    #[arg(long)]
    tags: Option<String>,

    #[arg(long)]
    billable: bool,
}

impl Cmd {
    pub async fn run(self, ctx: &Context) -> Result<()> {
        let item = ctx
            .start(
                self.description.as_deref().unwrap_or(""),
                self.duration.as_deref().unwrap_or(""),
                self.task.unwrap_or(0),
                self.project.unwrap_or(0),
            )
            .await?;

        if let Some(tags) = &self.tags {
            ctx.set_time_entry_tags(&item.guid, tags).await?;
        }
        if self.billable {
            ctx.set_time_entry_billable(&item.guid, true).await?;
        }

        if item.duration_in_seconds < 0 {
            println!("Started \"{}\" [{}]", item.description, short(&item.guid));
        } else {
            println!(
                "Logged \"{}\" for {} [{}]",
                item.description,
                item.duration,
                short(&item.guid)
            );
        }

        crate::command::sync_quietly(ctx).await;
        Ok(())
    }
}

pub(crate) fn short(guid: &str) -> &str {
    &guid[..guid.len().min(8)]
}
