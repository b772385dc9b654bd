use anyhow::Context;
use inkcalc::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("reading configuration")?;
    inkcalc::logging::init(config.environment);
    tracing::debug!(?config, "configuration loaded");

    inkcalc::server::serve(config).await
}
