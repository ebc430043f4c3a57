pub mod cache;
pub mod config;
pub mod delete;
pub mod history;
pub mod notifications;
pub mod record;
pub mod streak;
pub mod tasks;

use std::sync::Arc;

use ecotale_core::{Config, Database, Services, Tracker};

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// A tracker over the on-disk database, with persisted state loaded.
pub struct Session {
    pub db: Arc<Database>,
    pub tracker: Tracker,
}

impl Session {
    pub fn open() -> Result<Self, Box<dyn std::error::Error>> {
        let config = Config::load()?;
        let db = Arc::new(Database::open()?);
        let mut tracker = Tracker::new(&config, Services::new(db.clone()));
        let report = tracker.initialize()?;
        tracing::debug!(?report, "session opened");
        Ok(Self { db, tracker })
    }
}

/// Run a future to completion on a single-threaded runtime.
pub fn block_on<F: std::future::Future>(future: F) -> Result<F::Output, std::io::Error> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(future))
}

pub fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
