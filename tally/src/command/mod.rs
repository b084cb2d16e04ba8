use clap::Subcommand;
use eyre::Result;
use std::path::Path;
use std::sync::Arc;
use tally_client::settings::Settings;
use tally_client::{Callbacks, Context};
use tracing_subscriber::EnvFilter;

mod channel;
mod delete;
mod feedback;
mod list;
mod login;
mod logout;
mod resume;
mod set;
mod split;
mod start;
mod status;
mod stop;
mod sync;
mod tags;
mod watch;

pub const APP_NAME: &str = "tally";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Subcommand)]
pub enum TallyCmd {
    /// Sign in with email and password
    Login(login::Cmd),
    /// Sign out and stop syncing
    Logout,
    /// Show the current user and tracking state
    Status,
    /// Start tracking a new time entry
    Start(start::Cmd),
    /// Stop the running time entry
    Stop(stop::Cmd),
    /// Continue a stopped time entry
    Resume(resume::Cmd),
    /// Split the running entry at a point in time
    Split(split::Cmd),
    /// Delete a time entry
    Delete(delete::Cmd),
    /// Edit one field of a time entry
    Set(set::Cmd),
    /// List tracked time entries
    List(list::Cmd),
    /// List known tags
    Tags,
    /// Reconcile the local replica with the server
    Sync(sync::Cmd),
    /// Run the background agent until interrupted
    Watch,
    /// Show or change the update channel
    Channel(channel::Cmd),
    /// Send feedback to the developers
    Feedback(feedback::Cmd),
}

impl TallyCmd {
    #[tokio::main]
    pub async fn run(self) -> Result<()> {
        let settings = Settings::new()?;
        init_logging(&settings);

        let ctx = Context::new(&settings, APP_NAME, VERSION, cli_callbacks()).await?;

        match self {
            Self::Login(cmd) => cmd.run(&ctx).await,
            Self::Logout => logout::run(&ctx).await,
            Self::Status => status::run(&ctx).await,
            Self::Start(cmd) => cmd.run(&ctx).await,
            Self::Stop(cmd) => cmd.run(&ctx).await,
            Self::Resume(cmd) => cmd.run(&ctx).await,
            Self::Split(cmd) => cmd.run(&ctx).await,
            Self::Delete(cmd) => cmd.run(&ctx).await,
            Self::Set(cmd) => cmd.run(&ctx).await,
            Self::List(cmd) => cmd.run(&ctx).await,
            Self::Tags => tags::run(&ctx).await,
            Self::Sync(cmd) => cmd.run(&ctx).await,
            Self::Watch => watch::run(&ctx).await,
            Self::Channel(cmd) => cmd.run(&ctx).await,
            Self::Feedback(cmd) => cmd.run(&ctx).await,
        }
    }
}

fn cli_callbacks() -> Callbacks {
    Callbacks {
        on_change: Some(Arc::new(|change| {
            tracing::debug!(
                model = %change.model_type,
                kind = change.kind.as_str(),
                id = change.id,
                "model changed"
            );
        })),
        on_error: Some(Arc::new(|message| {
            eprintln!("error: {message}");
        })),
        on_update: Some(Arc::new(|update| {
            println!("Update available: {} ({})", update.version, update.url);
        })),
    }
}

fn init_logging(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.clone()));

    if settings.log_path.is_empty() {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return;
    }

    let path = Path::new(&settings.log_path);
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let file = path
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| "tally.log".to_string());
    let appender = tracing_appender::rolling::daily(dir, file);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(appender)
        .with_ansi(false)
        .init();
}

/// Best-effort partial sync after a local mutation. Being offline is
/// not an error; the entry stays queued for the next round.
pub(crate) async fn sync_quietly(ctx: &Context) {
    match ctx.sync(false).await {
        Ok(()) => {}
        Err(tally_client::EngineError::Network(_)) => {
            println!("Offline; changes are queued for the next sync.");
        }
        Err(tally_client::EngineError::Unauthorized) => {
            eprintln!("Session expired. Please login again.");
        }
        Err(err) => eprintln!("sync failed: {err}"),
    }
}
