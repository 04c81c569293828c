use anyhow::Result;
use clap::Parser;
use neurocode::cli::CliArgs;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,neurocode=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();
    neurocode::run(args).await
}
