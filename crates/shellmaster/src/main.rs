//! sm - ShellMaster CLI entry point

use clap::Parser;
use shellmaster::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = shellmaster::run(cli).await;
    std::process::exit(code);
}
