//! Recurring recycling goals and the daily streak.
//!
//! Each [`TaskKind`] cycles independently:
//!
//! ```text
//! (none) -> Active -> Completed
//!                  -> Expired
//! ```
//!
//! `Completed` and `Expired` are terminal for a task instance. Finished
//! tasks stay in the list as history; the next `generate_tasks` call after
//! expiry starts a new instance.

mod streak;

pub use streak::{StreakChange, StreakState};

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::calendar::Calendar;
use crate::clock::Clock;
use crate::error::StorageError;
use crate::notifications::{NewNotification, NotificationKind, Notifier};
use crate::ports::DurableStore;
use crate::storage::{self, namespaces, Hydration};

/// Task targets and cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPolicy {
    #[serde(default = "default_daily_target_kg")]
    pub daily_target_kg: f64,
    #[serde(default = "default_weekly_target_kg")]
    pub weekly_target_kg: f64,
    /// Calendar days a weekly task runs for.
    #[serde(default = "default_weekly_length_days")]
    pub weekly_length_days: u32,
    /// A streak notification fires whenever the streak reaches a multiple of this.
    #[serde(default = "default_streak_celebration_every")]
    pub streak_celebration_every: u32,
    /// Lifetime of the "new tasks" notice.
    #[serde(default = "default_new_task_notice_hours")]
    pub new_task_notice_hours: u32,
}

fn default_daily_target_kg() -> f64 {
    1.0
}

fn default_weekly_target_kg() -> f64 {
    5.0
}

fn default_weekly_length_days() -> u32 {
    7
}

fn default_streak_celebration_every() -> u32 {
    7
}

fn default_new_task_notice_hours() -> u32 {
    24
}

impl Default for TaskPolicy {
    fn default() -> Self {
        Self {
            daily_target_kg: default_daily_target_kg(),
            weekly_target_kg: default_weekly_target_kg(),
            weekly_length_days: default_weekly_length_days(),
            streak_celebration_every: default_streak_celebration_every(),
            new_task_notice_hours: default_new_task_notice_hours(),
        }
    }
}

impl TaskPolicy {
    pub fn target_for(&self, kind: TaskKind) -> f64 {
        match kind {
            TaskKind::Daily => self.daily_target_kg,
            TaskKind::Weekly => self.weekly_target_kg,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Daily,
    Weekly,
}

impl TaskKind {
    pub const ALL: [TaskKind; 2] = [TaskKind::Daily, TaskKind::Weekly];

    fn title(self) -> &'static str {
        match self {
            TaskKind::Daily => "Daily Recycling Goal",
            TaskKind::Weekly => "Weekly Recycling Challenge",
        }
    }

    fn period(self) -> &'static str {
        match self {
            TaskKind::Daily => "today",
            TaskKind::Weekly => "this week",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Daily => write!(f, "daily"),
            TaskKind::Weekly => write!(f, "weekly"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub kind: TaskKind,
    pub target_kg: f64,
    pub progress_kg: f64,
    pub completed: bool,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Live tasks still accept progress.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Everything the engine persists, written as one value.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TaskSnapshot {
    tasks: Vec<Task>,
    #[serde(default)]
    streak: StreakState,
}

/// What one `update_progress` call changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressOutcome {
    /// Tasks that crossed their target with this update.
    pub completed: Vec<Uuid>,
    pub streak: Option<StreakChange>,
}

pub struct TaskEngine {
    policy: TaskPolicy,
    calendar: Calendar,
    clock: Arc<dyn Clock>,
    store: Arc<dyn DurableStore>,
    tasks: Vec<Task>,
    streak: StreakState,
}

impl TaskEngine {
    pub fn new(
        policy: TaskPolicy,
        calendar: Calendar,
        clock: Arc<dyn Clock>,
        store: Arc<dyn DurableStore>,
    ) -> Self {
        Self {
            policy,
            calendar,
            clock,
            store,
            tasks: Vec::new(),
            streak: StreakState::default(),
        }
    }

    /// Reload tasks and streak state. Unreadable data starts fresh.
    pub fn hydrate(&mut self) -> Result<Hydration, StorageError> {
        let (stored, discarded) =
            storage::load_json::<TaskSnapshot>(self.store.as_ref(), namespaces::TASKS)?;
        if let Some(reason) = discarded {
            self.tasks.clear();
            self.streak = StreakState::default();
            return Ok(Hydration::Discarded { reason });
        }
        let Some(snapshot) = stored else {
            return Ok(Hydration::Empty);
        };
        self.tasks = snapshot.tasks;
        self.streak = snapshot.streak;
        Ok(Hydration::Restored {
            items: self.tasks.len(),
        })
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Tasks that have not expired yet, completed or not.
    pub fn active_tasks(&self) -> Vec<&Task> {
        let now = self.clock.now();
        self.tasks.iter().filter(|t| t.is_live(now)).collect()
    }

    pub fn streak(&self) -> StreakState {
        self.streak
    }

    /// Streak to display today; zero after a missed day.
    pub fn effective_streak(&self) -> u32 {
        self.streak.effective(self.calendar.day_of(self.clock.now()))
    }

    /// Create a task for each kind that has no live instance.
    ///
    /// Safe to call repeatedly: a kind with a live task is left alone.
    /// Returns the ids of the tasks created.
    pub fn generate_tasks(&mut self, notifier: &mut dyn Notifier) -> Vec<Uuid> {
        let now = self.clock.now();
        let mut created = Vec::new();

        for kind in TaskKind::ALL {
            if self.tasks.iter().any(|t| t.kind == kind && t.is_live(now)) {
                continue;
            }
            let task = self.new_task(kind, now);
            info!(id = %task.id, %kind, expires_at = %task.expires_at, "task generated");
            created.push(task.id);
            self.tasks.push(task);
        }

        if !created.is_empty() {
            let notice = NewNotification::new(
                NotificationKind::Info,
                "New Tasks Available",
                "Check out your new recycling tasks for today!",
            );
            // A notice window past the end of the calendar never expires.
            let lifetime = Duration::hours(i64::from(self.policy.new_task_notice_hours));
            notifier.notify(match now.checked_add_signed(lifetime) {
                Some(expires_at) => notice.expires_at(expires_at),
                None => notice,
            });
            self.persist();
        }
        created
    }

    /// Add `recycled_kg` to every live, unfinished task, then re-check the
    /// streak.
    ///
    /// `recycled_kg` must be positive; other values are ignored.
    pub fn update_progress(&mut self, recycled_kg: f64, notifier: &mut dyn Notifier) -> ProgressOutcome {
        if !(recycled_kg.is_finite() && recycled_kg > 0.0) {
            warn!(recycled_kg, "ignoring non-positive progress update");
            return ProgressOutcome::default();
        }

        let now = self.clock.now();
        let mut outcome = ProgressOutcome::default();

        for task in self.tasks.iter_mut().filter(|t| t.is_live(now) && !t.completed) {
            task.progress_kg += recycled_kg;
            if task.progress_kg >= task.target_kg {
                task.completed = true;
                info!(id = %task.id, kind = %task.kind, "task completed");
                outcome.completed.push(task.id);
                notifier.notify(NewNotification::new(
                    NotificationKind::Task,
                    match task.kind {
                        TaskKind::Daily => "Daily Task Completed!",
                        TaskKind::Weekly => "Weekly Task Completed!",
                    },
                    format!(
                        "Congratulations! You've reached your {} recycling goal!",
                        task.kind
                    ),
                ));
            }
        }

        outcome.streak = self.apply_streak(notifier);
        self.persist();
        outcome
    }

    /// Count today towards the streak if a daily task for today is complete.
    pub fn check_streak(&mut self, notifier: &mut dyn Notifier) -> Option<StreakChange> {
        let change = self.apply_streak(notifier);
        if matches!(change, Some(StreakChange::Extended { .. } | StreakChange::Restarted)) {
            self.persist();
        }
        change
    }

    fn apply_streak(&mut self, notifier: &mut dyn Notifier) -> Option<StreakChange> {
        let today = self.calendar.day_of(self.clock.now());
        let completed_today = self.tasks.iter().any(|t| {
            t.kind == TaskKind::Daily
                && t.completed
                && self.calendar.day_ending_at(t.expires_at) == today
        });
        if !completed_today {
            return None;
        }

        let change = self.streak.record_completion(today);
        match change {
            StreakChange::Extended { streak } => {
                info!(streak, %today, "streak extended");
                let every = self.policy.streak_celebration_every;
                if every > 0 && streak % every == 0 {
                    notifier.notify(NewNotification::new(
                        NotificationKind::Streak,
                        "\u{1F525} Week-long Streak!",
                        format!("Amazing! You've maintained your recycling streak for {streak} days!"),
                    ));
                }
            }
            StreakChange::Restarted => info!(%today, "streak started"),
            StreakChange::Unchanged => {}
        }
        Some(change)
    }

    fn new_task(&self, kind: TaskKind, now: DateTime<Utc>) -> Task {
        let expires_at = match kind {
            TaskKind::Daily => self.calendar.next_midnight(now),
            TaskKind::Weekly => self
                .calendar
                .midnight_after_days(now, i64::from(self.policy.weekly_length_days)),
        };
        let target_kg = self.policy.target_for(kind);
        Task {
            id: Uuid::new_v4(),
            title: kind.title().to_string(),
            description: format!(
                "Recycle at least {target_kg}kg of materials {}",
                kind.period()
            ),
            kind,
            target_kg,
            progress_kg: 0.0,
            completed: false,
            expires_at,
            created_at: now,
        }
    }

    fn persist(&self) {
        let snapshot = TaskSnapshotRef {
            tasks: &self.tasks,
            streak: &self.streak,
        };
        storage::persist_best_effort(self.store.as_ref(), namespaces::TASKS, &snapshot);
    }
}

#[derive(Serialize)]
struct TaskSnapshotRef<'a> {
    tasks: &'a [Task],
    streak: &'a StreakState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ports::MemoryStore;
    use chrono::{NaiveDate, TimeZone};

    struct Fixture {
        engine: TaskEngine,
        clock: Arc<ManualClock>,
        store: Arc<MemoryStore>,
        sink: Vec<NewNotification>,
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn fixture_at(now: DateTime<Utc>, calendar: Calendar) -> Fixture {
        let clock = Arc::new(ManualClock::new(now));
        let store = Arc::new(MemoryStore::new());
        let engine = TaskEngine::new(TaskPolicy::default(), calendar, clock.clone(), store.clone());
        Fixture {
            engine,
            clock,
            store,
            sink: Vec::new(),
        }
    }

    fn fixture() -> Fixture {
        fixture_at(at(2024, 1, 2, 10), Calendar::utc())
    }

    fn reload(fx: &Fixture) -> TaskEngine {
        let mut engine = TaskEngine::new(
            TaskPolicy::default(),
            Calendar::utc(),
            fx.clock.clone(),
            fx.store.clone(),
        );
        engine.hydrate().unwrap();
        engine
    }

    fn seed_streak(fx: &mut Fixture, streak: u32, last: NaiveDate) {
        storage::save_json(
            fx.store.as_ref(),
            namespaces::TASKS,
            &TaskSnapshot {
                tasks: Vec::new(),
                streak: StreakState {
                    current_streak: streak,
                    last_completion_date: Some(last),
                },
            },
        )
        .unwrap();
        fx.engine.hydrate().unwrap();
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn generates_one_task_per_kind_with_policy_targets() {
        let mut fx = fixture();
        let created = fx.engine.generate_tasks(&mut fx.sink);
        assert_eq!(created.len(), 2);

        let daily = fx.engine.tasks().iter().find(|t| t.kind == TaskKind::Daily).unwrap();
        assert_eq!(daily.title, "Daily Recycling Goal");
        assert_eq!(daily.description, "Recycle at least 1kg of materials today");
        assert_eq!(daily.target_kg, 1.0);
        assert_eq!(daily.expires_at, at(2024, 1, 3, 0));

        let weekly = fx.engine.tasks().iter().find(|t| t.kind == TaskKind::Weekly).unwrap();
        assert_eq!(weekly.title, "Weekly Recycling Challenge");
        assert_eq!(weekly.target_kg, 5.0);
        assert_eq!(weekly.expires_at, at(2024, 1, 9, 0));
    }

    #[test]
    fn generation_emits_expiring_info_notice() {
        let mut fx = fixture();
        fx.engine.generate_tasks(&mut fx.sink);
        assert_eq!(fx.sink.len(), 1);
        assert_eq!(fx.sink[0].kind, NotificationKind::Info);
        assert_eq!(fx.sink[0].title, "New Tasks Available");
        assert_eq!(fx.sink[0].expires_at, Some(at(2024, 1, 3, 10)));
    }

    #[test]
    fn extreme_policy_windows_do_not_overflow() {
        let now = at(2024, 1, 2, 10);
        let policy = TaskPolicy {
            weekly_length_days: u32::MAX,
            new_task_notice_hours: u32::MAX,
            ..TaskPolicy::default()
        };
        let store = Arc::new(MemoryStore::new());
        let mut engine = TaskEngine::new(policy, Calendar::utc(), Arc::new(ManualClock::new(now)), store);
        let mut sink = Vec::new();

        assert_eq!(engine.generate_tasks(&mut sink).len(), 2);
        let weekly = engine.tasks().iter().find(|t| t.kind == TaskKind::Weekly).unwrap();
        assert!(weekly.expires_at > now);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink[0].expires_at, None);

        // Progress still lands on the far-future weekly task.
        engine.update_progress(6.0, &mut sink);
        assert!(engine.tasks().iter().all(|t| t.completed));
    }

    #[test]
    fn generation_is_idempotent_within_a_period() {
        let mut fx = fixture();
        for _ in 0..5 {
            fx.engine.generate_tasks(&mut fx.sink);
        }
        assert_eq!(fx.engine.tasks().len(), 2);
        assert_eq!(fx.sink.len(), 1);
    }

    #[test]
    fn next_day_adds_daily_and_keeps_history() {
        let mut fx = fixture();
        fx.engine.generate_tasks(&mut fx.sink);
        fx.clock.set(at(2024, 1, 3, 0));

        let created = fx.engine.generate_tasks(&mut fx.sink);
        assert_eq!(created.len(), 1);
        assert_eq!(fx.engine.tasks().len(), 3);
        assert_eq!(fx.engine.active_tasks().len(), 2);
    }

    #[test]
    fn expiry_follows_the_configured_day_boundary() {
        // 23:30 UTC on Jan 2 is already Jan 3 at UTC+1.
        let mut fx = fixture_at(
            Utc.with_ymd_and_hms(2024, 1, 2, 23, 30, 0).unwrap(),
            Calendar::with_offset_minutes(60),
        );
        fx.engine.generate_tasks(&mut fx.sink);
        let daily = fx.engine.tasks().iter().find(|t| t.kind == TaskKind::Daily).unwrap();
        assert_eq!(daily.expires_at, at(2024, 1, 3, 23));
    }

    #[test]
    fn progress_accumulates_and_completes_once() {
        let mut fx = fixture();
        fx.engine.generate_tasks(&mut fx.sink);
        fx.sink.clear();

        fx.engine.update_progress(0.4, &mut fx.sink);
        fx.engine.update_progress(0.4, &mut fx.sink);
        assert!(fx.sink.is_empty());

        let outcome = fx.engine.update_progress(0.4, &mut fx.sink);
        assert_eq!(outcome.completed.len(), 1);
        assert_eq!(fx.sink[0].kind, NotificationKind::Task);
        assert_eq!(fx.sink[0].title, "Daily Task Completed!");

        let daily = fx.engine.tasks().iter().find(|t| t.kind == TaskKind::Daily).unwrap();
        assert!(daily.completed);
        assert!((daily.progress_kg - 1.2).abs() < 1e-9);

        // Completed tasks take no further progress and never notify again.
        fx.engine.update_progress(10.0, &mut fx.sink);
        let daily = fx.engine.tasks().iter().find(|t| t.kind == TaskKind::Daily).unwrap();
        assert!(daily.completed);
        assert!((daily.progress_kg - 1.2).abs() < 1e-9);
        let task_notices = fx
            .sink
            .iter()
            .filter(|n| n.title == "Daily Task Completed!")
            .count();
        assert_eq!(task_notices, 1);
    }

    #[test]
    fn expired_tasks_are_inert() {
        let mut fx = fixture();
        fx.engine.generate_tasks(&mut fx.sink);
        fx.clock.set(at(2024, 1, 3, 0));

        let outcome = fx.engine.update_progress(2.0, &mut fx.sink);
        // Only the weekly task is still live; it is short of its 5kg target.
        assert!(outcome.completed.is_empty());
        let daily = fx.engine.tasks().iter().find(|t| t.kind == TaskKind::Daily).unwrap();
        assert_eq!(daily.progress_kg, 0.0);
    }

    #[test]
    fn non_positive_progress_is_ignored() {
        let mut fx = fixture();
        fx.engine.generate_tasks(&mut fx.sink);
        fx.engine.update_progress(-3.0, &mut fx.sink);
        fx.engine.update_progress(f64::NAN, &mut fx.sink);
        assert!(fx.engine.tasks().iter().all(|t| t.progress_kg == 0.0));
    }

    #[test]
    fn completing_the_day_after_extends_streak() {
        let mut fx = fixture();
        seed_streak(&mut fx, 3, date(2024, 1, 1));
        fx.engine.generate_tasks(&mut fx.sink);

        let outcome = fx.engine.update_progress(1.0, &mut fx.sink);
        assert_eq!(outcome.streak, Some(StreakChange::Extended { streak: 4 }));
        assert_eq!(
            fx.engine.streak(),
            StreakState {
                current_streak: 4,
                last_completion_date: Some(date(2024, 1, 2)),
            }
        );
    }

    #[test]
    fn completing_after_a_gap_resets_streak() {
        let mut fx = fixture_at(at(2024, 1, 4, 9), Calendar::utc());
        seed_streak(&mut fx, 3, date(2024, 1, 1));
        fx.engine.generate_tasks(&mut fx.sink);
        fx.engine.update_progress(1.5, &mut fx.sink);
        assert_eq!(fx.engine.streak().current_streak, 1);
        assert_eq!(fx.engine.streak().last_completion_date, Some(date(2024, 1, 4)));
    }

    #[test]
    fn check_streak_without_completion_changes_nothing() {
        let mut fx = fixture();
        fx.engine.generate_tasks(&mut fx.sink);
        assert_eq!(fx.engine.check_streak(&mut fx.sink), None);
        assert_eq!(fx.engine.streak(), StreakState::default());
    }

    #[test]
    fn seventh_day_celebrates() {
        let mut fx = fixture();
        seed_streak(&mut fx, 6, date(2024, 1, 1));
        fx.engine.generate_tasks(&mut fx.sink);
        fx.sink.clear();

        fx.engine.update_progress(1.0, &mut fx.sink);
        let streak_notice = fx
            .sink
            .iter()
            .find(|n| n.kind == NotificationKind::Streak)
            .unwrap();
        assert!(streak_notice.message.contains("7 days"));
    }

    #[test]
    fn restart_never_celebrates() {
        let mut fx = fixture();
        fx.engine.generate_tasks(&mut fx.sink);
        fx.engine.update_progress(1.0, &mut fx.sink);
        assert!(fx.sink.iter().all(|n| n.kind != NotificationKind::Streak));
    }

    #[test]
    fn effective_streak_lapses() {
        let mut fx = fixture();
        seed_streak(&mut fx, 4, date(2024, 1, 1));
        assert_eq!(fx.engine.effective_streak(), 4);
        fx.clock.set(at(2024, 1, 3, 8));
        assert_eq!(fx.engine.effective_streak(), 0);
        assert_eq!(fx.engine.streak().current_streak, 4);
    }

    #[test]
    fn state_survives_restart() {
        let mut fx = fixture();
        fx.engine.generate_tasks(&mut fx.sink);
        fx.engine.update_progress(1.0, &mut fx.sink);

        let reloaded = reload(&fx);
        assert_eq!(reloaded.tasks(), fx.engine.tasks());
        assert_eq!(reloaded.streak(), fx.engine.streak());
    }

    #[test]
    fn foreign_bytes_start_fresh() {
        let mut fx = fixture();
        fx.store
            .save_namespace(namespaces::TASKS, b"[1,2,3]")
            .unwrap();
        assert!(matches!(fx.engine.hydrate().unwrap(), Hydration::Discarded { .. }));
        assert!(fx.engine.tasks().is_empty());
    }
}
