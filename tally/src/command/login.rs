use crate::input::{read_input, read_input_hidden};
use clap::Parser;
use eyre::Result;
use tally_client::Context;

#[derive(Parser, Debug)]
pub struct Cmd {
    #[arg(long, short)]
    pub email: Option<String>,
    #[arg(long, short)]
    pub password: Option<String>,
}

impl Cmd {
    pub async fn run(self, ctx: &Context) -> Result<()> {
        if ctx.current_user().await?.is_some() {
            println!("You are already logged in.");
            return Ok(());
        }

        let email = self.email.unwrap_or_else(|| read_input("email"));
        let password = self.password.unwrap_or_else(|| read_input_hidden("password"));

        ctx.login(&email, &password).await?;
        println!("Logged in!");

        // Bring the replica up to date right away; being offline at
        // this point is not fatal.
        crate::command::sync_quietly(ctx).await;
        Ok(())
    }
}
