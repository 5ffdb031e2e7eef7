mod backend;
mod cli;
mod model;
mod orchestrator;
mod protocol;
mod storage;
mod worker;

use clap::Parser;

#[tokio::main]
async fn main() {
    let args = cli::Cli::parse();

    // Exit explicitly either way: the stdin reader sits on a blocking thread the
    // runtime would otherwise wait for during shutdown.
    match cli::run(args).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            tracing::error!("{e:#}");
            std::process::exit(1);
        }
    }
}
