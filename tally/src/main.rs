use clap::Parser;
use command::TallyCmd;
use eyre::Result;
mod command;
mod input;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(
    author = "tally developers",
    version = VERSION,
    about = "Local-first time tracking agent",
    infer_subcommands = true
)]
struct Tally {
    #[command(subcommand)]
    tally: TallyCmd,
}

impl Tally {
    fn run(self) -> Result<()> {
        self.tally.run()
    }
}

fn main() -> Result<()> {
    Tally::parse().run()
}
