//! Composition root for one user session.
//!
//! `Tracker` owns one instance of each component, wires them to the same
//! ports and runs the record-an-entry flow: validate, update task progress,
//! detect milestones, drop already-announced ones, notify.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::achievements::{AchievementDetector, AchievementInput, AchievementLedger, Milestone};
use crate::cache::{self, CacheService, SharedCache};
use crate::calendar::Calendar;
use crate::clock::{Clock, SystemClock};
use crate::error::{CoreError, ValidationError};
use crate::fetch::{FetchCoordinator, FetchState};
use crate::history::{self, EntryQuery, HistorySummary, RecyclingEntry};
use crate::notifications::NotificationCenter;
use crate::ports::{
    AudioCue, DurableStore, ExceptionReporter, MemoryStore, RemoteStore, SilentAudio, TracingReporter,
};
use crate::storage::{Config, Hydration};
use crate::tasks::{StreakChange, TaskEngine};

/// The ports every component is built on.
#[derive(Clone)]
pub struct Services {
    pub store: Arc<dyn DurableStore>,
    pub clock: Arc<dyn Clock>,
    pub reporter: Arc<dyn ExceptionReporter>,
    pub audio: Arc<dyn AudioCue>,
}

impl Services {
    /// System clock, tracing reporter, no audio.
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            reporter: Arc::new(TracingReporter),
            audio: Arc::new(SilentAudio),
        }
    }

    /// Like [`Services::new`] over a fresh [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ExceptionReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_audio(mut self, audio: Arc<dyn AudioCue>) -> Self {
        self.audio = audio;
        self
    }
}

/// What `initialize` restored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InitReport {
    #[serde(serialize_with = "hydration_label")]
    pub cache: Hydration,
    #[serde(serialize_with = "hydration_label")]
    pub tasks: Hydration,
    #[serde(serialize_with = "hydration_label")]
    pub notifications: Hydration,
    #[serde(serialize_with = "hydration_label")]
    pub achievements: Hydration,
}

fn hydration_label<S: serde::Serializer>(h: &Hydration, s: S) -> Result<S::Ok, S::Error> {
    match h {
        Hydration::Empty => s.serialize_str("empty"),
        Hydration::Restored { items } => s.collect_str(&format_args!("restored {items}")),
        Hydration::Discarded { reason } => s.collect_str(&format_args!("discarded: {reason}")),
    }
}

/// A drop-off as entered by the user.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    pub material_type: String,
    pub weight_kg: f64,
    /// Derived from the weight when not given.
    pub co2_saved_kg: Option<f64>,
}

impl NewEntry {
    pub fn new(material_type: impl Into<String>, weight_kg: f64) -> Self {
        Self {
            material_type: material_type.into(),
            weight_kg,
            co2_saved_kg: None,
        }
    }

    pub fn with_co2(mut self, co2_saved_kg: f64) -> Self {
        self.co2_saved_kg = Some(co2_saved_kg);
        self
    }
}

/// Everything recording one entry changed.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    pub entry: RecyclingEntry,
    pub completed_tasks: Vec<Uuid>,
    pub streak: Option<StreakChange>,
    /// Milestones that produced a notification.
    pub announced: Vec<Milestone>,
    /// Once-only milestones that had already been announced.
    pub suppressed: usize,
}

pub struct Tracker {
    services: Services,
    calendar: Calendar,
    co2_factor: f64,
    cache: SharedCache,
    fetch: FetchCoordinator,
    notifications: NotificationCenter,
    tasks: TaskEngine,
    detector: AchievementDetector,
    ledger: AchievementLedger,
    history: Vec<RecyclingEntry>,
}

impl Tracker {
    pub fn new(config: &Config, services: Services) -> Self {
        let calendar = config.calendar();
        let cache = CacheService::new(
            config.cache.clone(),
            services.store.clone(),
            services.clock.clone(),
            services.reporter.clone(),
        )
        .into_shared();
        let fetch = FetchCoordinator::new(cache.clone(), services.reporter.clone(), config.fetch.clone());
        let notifications = NotificationCenter::new(
            config.notifications.clone(),
            services.store.clone(),
            services.clock.clone(),
            services.audio.clone(),
        );
        let tasks = TaskEngine::new(
            config.tasks.clone(),
            calendar,
            services.clock.clone(),
            services.store.clone(),
        );
        let ledger = AchievementLedger::new(services.store.clone());

        Self {
            calendar,
            co2_factor: config.achievements.co2_factor,
            cache,
            fetch,
            notifications,
            tasks,
            detector: AchievementDetector::new(config.achievements.clone(), calendar),
            ledger,
            history: Vec::new(),
            services,
        }
    }

    /// Load persisted state into every component.
    ///
    /// # Errors
    ///
    /// Returns an error only when the durable store itself fails. Unreadable
    /// data is reported as `Hydration::Discarded` instead.
    pub fn initialize(&mut self) -> Result<InitReport, CoreError> {
        let report = InitReport {
            cache: cache::lock(&self.cache).hydrate()?,
            tasks: self.tasks.hydrate()?,
            notifications: self.notifications.hydrate()?,
            achievements: self.ledger.hydrate()?,
        };
        info!(?report, "tracker initialized");
        Ok(report)
    }

    pub fn calendar(&self) -> Calendar {
        self.calendar
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.services.clock
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    pub fn fetch(&self) -> &FetchCoordinator {
        &self.fetch
    }

    pub fn notifications(&self) -> &NotificationCenter {
        &self.notifications
    }

    pub fn notifications_mut(&mut self) -> &mut NotificationCenter {
        &mut self.notifications
    }

    pub fn tasks(&self) -> &TaskEngine {
        &self.tasks
    }

    pub fn ledger(&self) -> &AchievementLedger {
        &self.ledger
    }

    pub fn history(&self) -> &[RecyclingEntry] {
        &self.history
    }

    /// Replace the known entry history, e.g. after a remote read.
    pub fn set_history(&mut self, entries: Vec<RecyclingEntry>) {
        self.history = entries;
    }

    pub fn summary(&self) -> HistorySummary {
        HistorySummary::from_entries(&self.history, &self.calendar)
    }

    /// Generate any missing tasks, announcing them through the notification center.
    pub fn generate_tasks(&mut self) -> Vec<Uuid> {
        self.tasks.generate_tasks(&mut self.notifications)
    }

    pub fn check_streak(&mut self) -> Option<StreakChange> {
        self.tasks.check_streak(&mut self.notifications)
    }

    /// Read the history through the cached fetch path and adopt it on success.
    pub async fn load_history<R>(&mut self, remote: &R, query: EntryQuery) -> FetchState<Vec<RecyclingEntry>>
    where
        R: RemoteStore<Query = EntryQuery, Record = RecyclingEntry> + ?Sized,
    {
        let state = history::load_history(&self.fetch, remote, query).await;
        if let Some(entries) = &state.data {
            self.history = entries.clone();
        }
        state
    }

    /// Drop cached history reads, e.g. after writing a new entry to the
    /// remote store.
    pub fn forget_cached_history(&self) -> usize {
        cache::lock(&self.cache).remove_prefix(history::HISTORY_CACHE_PREFIX)
    }

    /// Validate user input and stamp it as a new entry.
    ///
    /// # Errors
    ///
    /// Rejects empty materials, non-finite or non-positive weights and
    /// negative CO2 figures.
    pub fn prepare_entry(&self, new: NewEntry) -> Result<RecyclingEntry, ValidationError> {
        let material_type = new.material_type.trim();
        if material_type.is_empty() {
            return Err(ValidationError::EmptyMaterial);
        }
        if !new.weight_kg.is_finite() {
            return Err(ValidationError::NonFiniteWeight);
        }
        if new.weight_kg <= 0.0 {
            return Err(ValidationError::NonPositiveWeight(new.weight_kg));
        }
        let co2_saved_kg = match new.co2_saved_kg {
            Some(co2) if !co2.is_finite() => {
                return Err(ValidationError::InvalidValue {
                    field: "co2_saved_kg".into(),
                    message: "not a finite number".into(),
                })
            }
            Some(co2) if co2 < 0.0 => return Err(ValidationError::NegativeCo2(co2)),
            Some(co2) => co2,
            None => new.weight_kg * self.co2_factor,
        };

        Ok(RecyclingEntry {
            id: Uuid::new_v4(),
            material_type: material_type.to_string(),
            weight_kg: new.weight_kg,
            co2_saved_kg,
            created_at: self.services.clock.now(),
        })
    }

    /// Fold an accepted entry into tasks, achievements and notifications.
    pub fn apply_entry(&mut self, entry: RecyclingEntry) -> RecordOutcome {
        self.history.push(entry.clone());
        let progress = self
            .tasks
            .update_progress(entry.weight_kg, &mut self.notifications);

        let detected = {
            let input = AchievementInput {
                history: &self.history,
                entry: &entry,
                cumulative_kg: self.history.iter().map(|e| e.weight_kg).sum(),
                cumulative_co2_kg: Some(self.history.iter().map(|e| e.co2_saved_kg).sum()),
            };
            self.detector.evaluate(&input)
        };
        let detected_count = detected.len();
        let announced = self.ledger.filter(detected);
        for milestone in &announced {
            self.notifications.add(milestone.to_notification());
        }

        info!(
            entry = %entry.id,
            material = %entry.material_type,
            weight_kg = entry.weight_kg,
            announced = announced.len(),
            "entry recorded"
        );
        RecordOutcome {
            suppressed: detected_count - announced.len(),
            entry,
            completed_tasks: progress.completed,
            streak: progress.streak,
            announced,
        }
    }

    /// [`prepare_entry`](Self::prepare_entry) followed by
    /// [`apply_entry`](Self::apply_entry).
    pub fn record_entry(&mut self, new: NewEntry) -> Result<RecordOutcome, CoreError> {
        let entry = self.prepare_entry(new)?;
        Ok(self.apply_entry(entry))
    }
}
