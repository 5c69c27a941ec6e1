#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use codec::CloseCode;
use wshost::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    simple_logger::init_with_level(config.log.level.as_level())?;

    if config.server.prefixes.is_empty() {
        log::warn!("No prefixes are configured, there is nothing to listen on :-)");

        return Ok(());
    }

    let server = wshost::start_server(&config)?;

    tokio::signal::ctrl_c().await?;
    log::info!("shutting down");

    server.stop(CloseCode::AWAY, "going away").await;
    Ok(())
}
