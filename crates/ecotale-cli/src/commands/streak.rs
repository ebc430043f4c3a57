use serde_json::json;

use super::{print_json, CliResult, Session};

pub fn run() -> CliResult {
    let Session { mut tracker, .. } = Session::open()?;
    tracker.check_streak();

    let streak = tracker.tasks().streak();
    print_json(&json!({
        "current_streak": streak.current_streak,
        "effective_streak": tracker.tasks().effective_streak(),
        "last_completion_date": streak.last_completion_date,
    }))
}
