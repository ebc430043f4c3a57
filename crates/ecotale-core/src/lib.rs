//! # EcoTale Core Library
//!
//! This library provides the client-side engine of the EcoTale recycling
//! tracker. Every component is an explicitly constructed service wired to
//! injected ports, so the same engine drives the CLI and any UI shell.
//!
//! ## Architecture
//!
//! - **Cache**: TTL key-value store mirrored into durable storage, with
//!   eviction under quota pressure
//! - **Fetch**: cached, de-duplicated, cancellable remote reads
//! - **Notifications**: capped, persisted alert list with read state
//! - **Tasks**: daily/weekly recycling goals and the day streak
//! - **Achievements**: pure milestone detection plus a ledger of what was
//!   already announced
//! - **Storage**: SQLite namespaces and entry history, TOML configuration
//!
//! ## Key Components
//!
//! - [`Tracker`]: Composition root for a session
//! - [`CacheService`]: TTL cache
//! - [`FetchCoordinator`]: Cached remote reads
//! - [`NotificationCenter`]: Alert list
//! - [`TaskEngine`]: Task generation, progress and streaks
//! - [`AchievementDetector`]: Milestone rules
//! - [`Database`]: SQLite persistence
//! - [`Config`]: Application configuration management

pub mod achievements;
pub mod cache;
pub mod calendar;
pub mod clock;
pub mod error;
pub mod fetch;
pub mod history;
pub mod notifications;
pub mod ports;
pub mod storage;
pub mod tasks;
pub mod tracker;

pub use achievements::{AchievementDetector, AchievementInput, AchievementLedger, AchievementPolicy, Milestone, MilestoneRule};
pub use cache::{CacheConfig, CacheService, CacheStats, SharedCache};
pub use calendar::Calendar;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ConfigError, CoreError, FetchError, StorageError, ValidationError};
pub use fetch::{FetchConfig, FetchCoordinator, FetchOptions, FetchPhase, FetchState, Query};
pub use history::{EntryOrder, EntryQuery, HistorySummary, RecyclingEntry};
pub use notifications::{NewNotification, Notification, NotificationCenter, NotificationConfig, NotificationKind, Notifier};
pub use storage::{Config, Database, Hydration};
pub use tasks::{StreakChange, StreakState, Task, TaskEngine, TaskKind, TaskPolicy};
pub use tracker::{InitReport, NewEntry, RecordOutcome, Services, Tracker};
