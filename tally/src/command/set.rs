use clap::Parser;
use eyre::Result;
use tally_client::Context;

#[derive(Parser, Debug)]
pub struct Cmd {
    /// GUID of the entry to edit
    guid: String,

    #[arg(long)]
    description: Option<String>,

    /// New duration, e.g. "1:30:00" or "45 min"
    #[arg(long)]
    duration: Option<String>,

    /// New start time (RFC 3339)
    #[arg(long)]
    start: Option<String>,

    /// New end time (RFC 3339)
    #[arg(long)]
    end: Option<String>,

    /// Semicolon-separated tags
    #[arg(long)]
    tags: Option<String>,

    #[arg(long)]
    billable: Option<bool>,

    #[arg(long)]
    project: Option<u64>,

    #[arg(long)]
    task: Option<u64>,
}

impl Cmd {
    pub async fn run(self, ctx: &Context) -> Result<()> {
        let guid = &self.guid;

        if let Some(value) = &self.description {
            ctx.set_time_entry_description(guid, value).await?;
        }
        if let Some(value) = &self.duration {
            ctx.set_time_entry_duration(guid, value).await?;
        }
        if let Some(value) = &self.start {
            ctx.set_time_entry_start_iso_8601(guid, value).await?;
        }
        if let Some(value) = &self.end {
            ctx.set_time_entry_end_iso_8601(guid, value).await?;
        }
        if let Some(value) = &self.tags {
            ctx.set_time_entry_tags(guid, value).await?;
        }
        if let Some(value) = self.billable {
            ctx.set_time_entry_billable(guid, value).await?;
        }
        if self.project.is_some() || self.task.is_some() {
            ctx.set_time_entry_project(
                guid,
                self.task.unwrap_or(0),
                self.project.unwrap_or(0),
            )
            .await?;
        }

        println!("Updated.");
        crate::command::sync_quietly(ctx).await;
        Ok(())
    }
}
