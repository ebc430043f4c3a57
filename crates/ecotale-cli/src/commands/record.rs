//! Record a recycling entry.

use clap::Args;
use ecotale_core::{EntryQuery, NewEntry};
use serde_json::json;

use super::{print_json, CliResult, Session};

#[derive(Args)]
pub struct RecordArgs {
    /// Material type (e.g. plastic, glass, paper)
    #[arg(long)]
    pub material: String,
    /// Weight in kg
    #[arg(long, allow_negative_numbers = true)]
    pub weight: f64,
    /// CO2 saved in kg (default: derived from weight)
    #[arg(long)]
    pub co2: Option<f64>,
}

pub fn run(args: RecordArgs) -> CliResult {
    let Session { db, mut tracker } = Session::open()?;

    let mut new = NewEntry::new(args.material, args.weight);
    if let Some(co2) = args.co2 {
        new = new.with_co2(co2);
    }
    let entry = tracker.prepare_entry(new)?;

    // Milestones are judged against the full history, read fresh.
    tracker.set_history(db.list_entries(&EntryQuery::default())?);
    db.insert_entry(&entry)?;
    tracker.forget_cached_history();

    tracker.generate_tasks();
    let outcome = tracker.apply_entry(entry);

    let announced: Vec<_> = outcome
        .announced
        .iter()
        .map(|m| json!({ "kind": m.kind, "title": m.title, "message": m.message }))
        .collect();
    let streak = tracker.tasks().streak();
    print_json(&json!({
        "entry": outcome.entry,
        "completed_tasks": outcome.completed_tasks,
        "streak": {
            "current": streak.current_streak,
            "last_completion_date": streak.last_completion_date,
        },
        "announced": announced,
        "suppressed": outcome.suppressed,
    }))
}
