use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use log::{info, warn, LevelFilter};
use toml::Table;

use memreq::mem::PoolLimits;
use memreq::sim::config::{Config, SimConfig};
use memreq::traffic::config::TrafficConfig;
use memreq::traffic::driver::TrafficDriver;

#[derive(Parser)]
#[command(version, about)]
struct MemreqArgs {
    #[arg(help = "Path to config.toml; defaults are used when omitted")]
    config_path: Option<PathBuf>,
    #[arg(long, help = "Override number of cores")]
    num_cores: Option<usize>,
    #[arg(long, help = "Override requests issued per core")]
    requests: Option<u64>,
    #[arg(long, help = "Override the pool's slab cap")]
    max_slabs: Option<usize>,
    #[arg(long, help = "Enable log at level (0:warn, 1:info, 2:debug)")]
    log: Option<u64>,
    #[arg(long, help = "Write the run summary as JSON to this path")]
    stats_json: Option<PathBuf>,
}

fn level_filter(level: u64) -> LevelFilter {
    match level {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    }
}

pub fn main() -> anyhow::Result<()> {
    let argv = MemreqArgs::parse();

    let config_table: Table = match &argv.config_path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str(&text).context("cannot parse config toml")?
        }
        None => Table::new(),
    };

    let mut sim_config = SimConfig::from_table(&config_table)?;
    let mut pool_limits = PoolLimits::from_table(&config_table)?;
    let mut traffic_config = TrafficConfig::from_table(&config_table)?;

    // override toml configs with argv
    sim_config.log_level = argv.log.unwrap_or(sim_config.log_level);
    sim_config.stats_json = argv.stats_json.or(sim_config.stats_json);
    pool_limits.max_slabs = argv.max_slabs.or(pool_limits.max_slabs);
    traffic_config.num_cores = argv.num_cores.unwrap_or(traffic_config.num_cores);
    traffic_config.requests_per_core = argv.requests.unwrap_or(traffic_config.requests_per_core);

    // RUST_LOG still wins when set
    env_logger::Builder::new()
        .filter_level(level_filter(sim_config.log_level))
        .parse_default_env()
        .init();

    let mut driver = TrafficDriver::new(traffic_config, pool_limits)?;
    let summary = driver.run(sim_config.timeout);

    info!(
        "ran {} cycles: issued {} completed {} coalesced {} kernel {} pool peak {} over {} slabs",
        summary.cycles,
        summary.issued,
        summary.completed,
        summary.coalesced,
        summary.kernel,
        summary.pool.peak_live(),
        summary.pool.slabs()
    );
    if !driver.is_done() {
        warn!(
            "timeout after {} cycles with {} requests still live",
            summary.cycles,
            driver.pool().len()
        );
    }

    let json = serde_json::to_string_pretty(&summary)?;
    match &sim_config.stats_json {
        Some(path) => fs::write(path, json)
            .with_context(|| format!("failed to write stats to {}", path.display()))?,
        None => println!("{}", json),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_levels_stop_at_debug() {
        assert_eq!(level_filter(0), LevelFilter::Warn);
        assert_eq!(level_filter(1), LevelFilter::Info);
        assert_eq!(level_filter(2), LevelFilter::Debug);
        assert_eq!(level_filter(7), LevelFilter::Debug);
    }
}
