//! Entry history, read through the cached fetch path.

use clap::Args;
use ecotale_core::{EntryOrder, EntryQuery, FetchPhase};
use serde_json::json;

use super::{block_on, print_json, CliResult, Session};

#[derive(Args)]
pub struct HistoryArgs {
    /// Sort column: created_at, weight_kg or co2_saved_kg
    #[arg(long, default_value = "created_at")]
    pub order_by: EntryOrder,
    /// Sort descending
    #[arg(long)]
    pub desc: bool,
    /// Maximum number of entries
    #[arg(long)]
    pub limit: Option<usize>,
}

pub fn run(args: HistoryArgs) -> CliResult {
    let Session { db, mut tracker } = Session::open()?;
    let query = EntryQuery {
        order_by: args.order_by,
        descending: args.desc,
        limit: args.limit,
    };

    let state = block_on(tracker.load_history(&*db, query))?;
    if state.phase == FetchPhase::Failed {
        let message = state
            .error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "history unavailable".to_string());
        return Err(message.into());
    }

    print_json(&json!({
        "entries": tracker.history(),
        "summary": tracker.summary(),
    }))
}
