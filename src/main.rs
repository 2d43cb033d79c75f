use std::io;

use anyhow::Result;
use clap::Parser;

use assetcache::cli::Cli;
use assetcache::config;
use assetcache::logging;

fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(cli.log_level.unwrap_or_default());
    log::info!("assetcache {} starting", env!("CARGO_PKG_VERSION"));

    // Settings file first, then command line overrides on top
    let config = config::load_config(cli.config.as_deref())?;
    let config = cli.merge_into_config(config)?;
    log::debug!("Cache configuration: {:?}", config);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    cli.run(&config, &mut out)
}
