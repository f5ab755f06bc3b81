use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser as _;

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    doclevels::logging::init().context("init logging")?;

    let cli = doclevels::cli::Cli::parse();
    tracing::debug!(?cli, "parsed cli");

    match cli.command {
        doclevels::cli::Command::Process(args) => {
            doclevels::pipeline::run(args).await.context("process")?;
        }
        doclevels::cli::Command::Batch(args) => {
            doclevels::batch::run(args).await.context("batch")?;
        }
        doclevels::cli::Command::Extract(args) => {
            doclevels::extract::run(args).await.context("extract")?;
        }
    }

    Ok(())
}
