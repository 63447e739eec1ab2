use clap::Parser;
use screencast_lib::config::Args;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    screencast_lib::logger::init(&args.log_filter);
    let config = args.into_config()?;
    tracing::debug!(?config, "starting");
    screencast_lib::run(config).await
}
