use clap::Parser;
use eyre::{bail, eyre, Result};
use tally_client::{format, parse_duration_string_into_seconds, Context};
use time::OffsetDateTime;

#[derive(Parser, Debug)]
pub struct Cmd {
    /// Split at this time (RFC 3339)
    #[arg(long, conflicts_with = "ago")]
    at: Option<String>,

    /// Split this long ago, e.g. "15 min"
    #[arg(long)]
    ago: Option<String>,
}

impl Cmd {
    pub async fn run(self, ctx: &Context) -> Result<()> {
        let at = if let Some(at) = self.at {
            format::parse_iso8601(&at).map_err(|_| eyre!("Invalid time, expected RFC 3339"))?
        } else if let Some(ago) = self.ago {
            let seconds = parse_duration_string_into_seconds(&ago);
            if seconds == 0 {
                bail!("Could not parse {ago:?} as a duration");
            }
            OffsetDateTime::now_utc().unix_timestamp() - seconds
        } else {
            bail!("Provide --at or --ago");
        };

        let item = ctx.split_running_time_entry_at(at).await?;
        println!("Split; now tracking \"{}\"", item.description);
        crate::command::sync_quietly(ctx).await;
        Ok(())
    }
}
