use clap::Subcommand;
use ecotale_core::cache;

use super::{print_json, CliResult, Session};

#[derive(Subcommand)]
pub enum CacheAction {
    /// Show cache size and age
    Stats,
    /// Remove every cached value
    Clear,
}

pub fn run(action: CacheAction) -> CliResult {
    let Session { tracker, .. } = Session::open()?;
    let mut cache = cache::lock(tracker.cache());

    match action {
        CacheAction::Stats => print_json(&cache.stats())?,
        CacheAction::Clear => {
            cache.clear();
            println!("cache cleared");
        }
    }
    Ok(())
}
