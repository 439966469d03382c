//! # Reward Simulator
//!
//! Rolls a TOML reward spec many times and prints the distribution.
//!
//! Run with: cargo run --bin reward_sim -- data/chest.toml --rolls 100000 --seed 42

use std::sync::Arc;

use bounty_economy::{ChaChaSource, RewardRoller, RewardSpec, SystemClock};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_ROLLS: u64 = 10_000;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args.iter().any(|a| a == "--help") {
        println!("Usage: reward_sim <spec.toml> [--rolls N] [--seed S]");
        println!();
        println!("Options:");
        println!("  --rolls <n>   Number of rolls (default {DEFAULT_ROLLS})");
        println!("  --seed <s>    Seed for a reproducible run (default: OS entropy)");
        return;
    }

    let spec_path = &args[1];
    let rolls: u64 = flag(&args, "--rolls").and_then(|s| s.parse().ok()).unwrap_or(DEFAULT_ROLLS);
    let seed: Option<u64> = flag(&args, "--seed").and_then(|s| s.parse().ok());

    let source = match std::fs::read_to_string(spec_path) {
        Ok(s) => s,
        Err(e) => {
            error!(path = %spec_path, error = %e, "could not read reward spec");
            std::process::exit(1);
        }
    };
    let mut spec: RewardSpec = match toml::from_str(&source) {
        Ok(s) => s,
        Err(e) => {
            error!(path = %spec_path, error = %e, "could not parse reward spec");
            std::process::exit(1);
        }
    };
    if let Err(e) = spec.validate() {
        error!(error = %e, "reward spec rejected");
        std::process::exit(1);
    }
    spec.prepare();

    let random = Arc::new(seed.map_or_else(ChaChaSource::from_entropy, ChaChaSource::seeded));
    let roller = RewardRoller::new(random, Arc::new(SystemClock));

    info!(path = %spec_path, rolls, ?seed, "rolling");
    let stats = match roller.run_statistics(&spec, rolls) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "rolling failed");
            std::process::exit(1);
        }
    };

    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         BOUNTY REWARD SIMULATOR                                  ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();
    println!("Rolls:        {}", stats.total_rolls);
    println!("Empty rolls:  {}", stats.empty_rolls);
    println!();

    if !stats.currency_totals.is_empty() {
        println!("┌─ CURRENCIES ─────────────────────────────────────────────────────┐");
        for id in stats.currency_totals.keys() {
            println!(
                "│ {:<20} hit {:>6.2}%   mean {:>10.2}",
                id,
                stats.currency_hit_rate(id) * 100.0,
                stats.currency_mean(id)
            );
        }
        println!("└──────────────────────────────────────────────────────────────────┘");
    }

    if !stats.item_totals.is_empty() {
        println!("┌─ ITEMS ──────────────────────────────────────────────────────────┐");
        for (id, total) in &stats.item_totals {
            println!(
                "│ {:<20} hit {:>6.2}%   total {:>10}",
                id,
                stats.item_hit_rate(id) * 100.0,
                total
            );
        }
        println!("└──────────────────────────────────────────────────────────────────┘");
    }
}

fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a String> {
    args.iter().position(|a| a == name).and_then(|i| args.get(i + 1))
}
