use eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tally_client::Context;

/// Run the background agent: websocket live updates, periodic partial
/// pulls and debounced pushes, until ctrl-c.
pub async fn run(ctx: &Arc<Context>) -> Result<()> {
    if ctx.current_user().await?.is_none() {
        println!("Please login first.");
        return Ok(());
    }

    let workers = ctx.spawn_workers();
    ctx.websocket_switch(true);
    if ctx.timeline_is_recording_enabled().await {
        ctx.timeline_switch(true);
    }
    ctx.trigger_partial_sync();

    println!("Watching for changes. Press ctrl-c to stop.");
    tokio::signal::ctrl_c().await?;

    ctx.shutdown();
    for worker in workers {
        // Workers check the shutdown signal at their suspension
        // points; don't let a wedged one block the exit.
        let _ = tokio::time::timeout(Duration::from_secs(2), worker).await;
    }
    println!("Stopped.");
    Ok(())
}
