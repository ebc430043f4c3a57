use uuid::Uuid;

use super::{CliResult, Session};

pub fn run(id: &str) -> CliResult {
    let id = Uuid::parse_str(id)?;
    let Session { db, tracker } = Session::open()?;

    if !db.delete_entry(id)? {
        return Err(format!("no entry with id {id}").into());
    }
    let dropped = tracker.forget_cached_history();
    tracing::debug!(%id, dropped, "entry deleted");
    println!("entry deleted: {id}");
    Ok(())
}
