use eyre::Result;
use tally_client::Context;

pub async fn run(ctx: &Context) -> Result<()> {
    let Some((id, email, fullname)) = ctx.current_user().await? else {
        println!("Not logged in.");
        return Ok(());
    };
    println!("Logged in as {fullname} <{email}> (id {id})");

    match ctx.running_time_entry_view_item().await? {
        Some(item) => {
            let label = if item.project_and_task_label.is_empty() {
                item.description.clone()
            } else {
                format!("{} - {}", item.description, item.project_and_task_label)
            };
            println!("Tracking: {label} for {}", item.duration);
        }
        None => println!("Not tracking."),
    }

    let pending = ctx.pushable_models().await?;
    if pending > 0 {
        println!("{pending} change(s) waiting to sync.");
    }
    Ok(())
}
