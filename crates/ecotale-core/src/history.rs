//! Recycling entries and read-side aggregation.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::achievements::material_totals;
use crate::calendar::Calendar;
use crate::error::FetchError;
use crate::fetch::{FetchCoordinator, FetchOptions, FetchState};
use crate::ports::RemoteStore;

/// One recorded drop-off. Owned by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecyclingEntry {
    pub id: Uuid,
    pub material_type: String,
    pub weight_kg: f64,
    pub co2_saved_kg: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryOrder {
    #[default]
    CreatedAt,
    WeightKg,
    Co2SavedKg,
}

impl fmt::Display for EntryOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EntryOrder::CreatedAt => "created_at",
            EntryOrder::WeightKg => "weight_kg",
            EntryOrder::Co2SavedKg => "co2_saved_kg",
        })
    }
}

impl FromStr for EntryOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created_at" => Ok(EntryOrder::CreatedAt),
            "weight_kg" => Ok(EntryOrder::WeightKg),
            "co2_saved_kg" => Ok(EntryOrder::Co2SavedKg),
            other => Err(format!(
                "unknown order '{other}' (expected created_at, weight_kg or co2_saved_kg)"
            )),
        }
    }
}

/// Cache keys of history reads all start with this.
pub const HISTORY_CACHE_PREFIX: &str = "fetch:entries:";

/// Ordering and size of a history read. Ascending by creation time by default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryQuery {
    pub order_by: EntryOrder,
    pub descending: bool,
    pub limit: Option<usize>,
}

impl EntryQuery {
    /// Cache key for this query's results.
    pub fn cache_key(&self) -> String {
        let direction = if self.descending { "desc" } else { "asc" };
        match self.limit {
            Some(n) => format!("{HISTORY_CACHE_PREFIX}{}:{direction}:{n}", self.order_by),
            None => format!("{HISTORY_CACHE_PREFIX}{}:{direction}:all", self.order_by),
        }
    }
}

/// Totals over a set of entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistorySummary {
    pub entry_count: usize,
    pub total_kg: f64,
    pub total_co2_saved_kg: f64,
    pub by_material: BTreeMap<String, f64>,
    pub by_day: BTreeMap<NaiveDate, f64>,
}

impl HistorySummary {
    pub fn from_entries(entries: &[RecyclingEntry], calendar: &Calendar) -> Self {
        let mut by_day = BTreeMap::new();
        for e in entries {
            *by_day.entry(calendar.day_of(e.created_at)).or_insert(0.0) += e.weight_kg;
        }
        Self {
            entry_count: entries.len(),
            total_kg: entries.iter().map(|e| e.weight_kg).sum(),
            total_co2_saved_kg: entries.iter().map(|e| e.co2_saved_kg).sum(),
            by_material: material_totals(entries),
            by_day,
        }
    }

    /// kg recycled on `day`.
    pub fn day_total(&self, day: NaiveDate) -> f64 {
        self.by_day.get(&day).copied().unwrap_or(0.0)
    }
}

/// Read entry history through the fetch coordinator, so repeat reads within
/// the fetch TTL are served from the cache.
pub async fn load_history<R>(
    coordinator: &FetchCoordinator,
    remote: &R,
    query: EntryQuery,
) -> FetchState<Vec<RecyclingEntry>>
where
    R: RemoteStore<Query = EntryQuery, Record = RecyclingEntry> + ?Sized,
{
    let fetch = coordinator.query::<Vec<RecyclingEntry>>(
        query.cache_key(),
        FetchOptions::default().depends_on(&query),
    );
    fetch
        .load(|cancel| async move {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            remote.read(&query).await
        })
        .await;
    fetch.snapshot()
}
