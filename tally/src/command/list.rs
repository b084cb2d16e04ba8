use super::start::short;
use clap::Parser;
use eyre::Result;
use tally_client::format;
use tally_client::Context;

#[derive(Parser, Debug)]
pub struct Cmd {
    /// Filter by description
    #[arg(long, short)]
    search: Option<String>,

    /// Show at most this many entries
    #[arg(long, short)]
    limit: Option<usize>,
}

impl Cmd {
    pub async fn run(self, ctx: &Context) -> Result<()> {
        if self.search.is_some() || self.limit.is_some() {
            // Fast path straight from the store.
            let entries = ctx
                .history(self.search.as_deref().unwrap_or(""), self.limit)
                .await?;
            if entries.is_empty() {
                println!("No matching entries.");
                return Ok(());
            }
            for te in entries {
                println!(
                    "{}  {:>9}  {}  [{}]",
                    te.date_header(),
                    format::format_hhmmss(te.duration_in_seconds.max(0)),
                    te.description,
                    short(&te.guid.to_string()),
                );
            }
            return Ok(());
        }

        let items = ctx.time_entry_view_items().await?;
        if items.is_empty() {
            println!("No time entries yet.");
            return Ok(());
        }

        let mut current_header = String::new();
        for item in items {
            if item.date_header != current_header {
                println!("{}  ({})", item.date_header, item.date_duration);
                current_header = item.date_header.clone();
            }
            let label = if item.project_and_task_label.is_empty() {
                item.description.clone()
            } else {
                format!("{} - {}", item.description, item.project_and_task_label)
            };
            println!("  {:>9}  {}  [{}]", item.duration, label, short(&item.guid));
        }
        Ok(())
    }
}
