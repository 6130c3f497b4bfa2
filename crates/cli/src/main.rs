use clap::Parser;
use commands::Commands;
use tracing::Level;

mod commands;
mod error;
mod output;

#[derive(Parser)]
#[command(name = "relay", version = "0.1.0", about = "Relational table sink/source utility")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli = Cli::parse();
    if let Err(error) = commands::run(cli.command).await {
        eprintln!("{error}");
        std::process::exit(1);
    }
}
