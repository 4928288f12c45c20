use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use stepweaver::Config;
use stepweaver::app::dispatch::dispatch;
use stepweaver::cli::Cli;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::load_or_init()?;

    let level = config
        .observability
        .tracing_level()
        .unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let code = dispatch(cli, config).await?;
    Ok(ExitCode::from(code))
}
