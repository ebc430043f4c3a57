//! Capped, persisted list of user-facing alerts.
//!
//! Newest first. Expired entries are purged before every insert and the list
//! is truncated to `max_retained` after it.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::StorageError;
use crate::ports::{AudioCue, Cue, DurableStore};
use crate::storage::{self, namespaces, Hydration};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_max_retained")]
    pub max_retained: usize,
    /// Play a cue for achievement and milestone notifications.
    #[serde(default = "default_audio_enabled")]
    pub audio_enabled: bool,
}

fn default_max_retained() -> usize {
    50
}

fn default_audio_enabled() -> bool {
    true
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            max_retained: default_max_retained(),
            audio_enabled: default_audio_enabled(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Achievement,
    Milestone,
    Info,
    Task,
    Streak,
}

impl NotificationKind {
    /// Kinds that trigger an audible cue.
    pub fn is_celebratory(self) -> bool {
        matches!(self, Self::Achievement | Self::Milestone)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Notification {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// A notification before the center assigns its id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewNotification {
    pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            expires_at: None,
        }
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }
}

/// Anything that accepts notifications.
///
/// The task engine and the achievement detector emit through this trait so
/// they can be driven against a plain `Vec` in tests.
pub trait Notifier {
    fn notify(&mut self, notification: NewNotification);
}

impl Notifier for Vec<NewNotification> {
    fn notify(&mut self, notification: NewNotification) {
        self.push(notification);
    }
}

pub struct NotificationCenter {
    config: NotificationConfig,
    store: Arc<dyn DurableStore>,
    clock: Arc<dyn Clock>,
    audio: Arc<dyn AudioCue>,
    items: Vec<Notification>,
}

impl NotificationCenter {
    pub fn new(
        config: NotificationConfig,
        store: Arc<dyn DurableStore>,
        clock: Arc<dyn Clock>,
        audio: Arc<dyn AudioCue>,
    ) -> Self {
        Self {
            config,
            store,
            clock,
            audio,
            items: Vec::new(),
        }
    }

    /// Reload the persisted list. Unreadable data starts an empty list.
    pub fn hydrate(&mut self) -> Result<Hydration, StorageError> {
        let (stored, discarded) =
            storage::load_json::<Vec<Notification>>(self.store.as_ref(), namespaces::NOTIFICATIONS)?;
        if let Some(reason) = discarded {
            self.items.clear();
            return Ok(Hydration::Discarded { reason });
        }
        let Some(mut items) = stored else {
            return Ok(Hydration::Empty);
        };

        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(self.config.max_retained);
        self.items = items;
        Ok(Hydration::Restored {
            items: self.items.len(),
        })
    }

    /// Insert a notification and return its id.
    pub fn add(&mut self, new: NewNotification) -> Uuid {
        let now = self.clock.now();
        self.items.retain(|n| !n.is_expired(now));

        let notification = Notification {
            id: Uuid::new_v4(),
            kind: new.kind,
            title: new.title,
            message: new.message,
            read: false,
            created_at: now,
            expires_at: new.expires_at,
        };
        let id = notification.id;
        debug!(%id, kind = ?notification.kind, title = %notification.title, "notification added");

        if self.config.audio_enabled && notification.kind.is_celebratory() {
            if let Err(e) = self.audio.play(Cue::Achievement) {
                warn!(error = %e, "could not play notification cue");
            }
        }

        self.items.insert(0, notification);
        self.items.truncate(self.config.max_retained);
        self.persist();
        id
    }

    /// Mark one notification read. Unknown ids are ignored.
    pub fn mark_as_read(&mut self, id: Uuid) {
        let Some(n) = self.items.iter_mut().find(|n| n.id == id) else {
            return;
        };
        if !n.read {
            n.read = true;
            self.persist();
        }
    }

    pub fn mark_all_as_read(&mut self) {
        if self.items.iter().all(|n| n.read) {
            return;
        }
        for n in &mut self.items {
            n.read = true;
        }
        self.persist();
    }

    pub fn clear_all(&mut self) {
        self.items.clear();
        self.persist();
    }

    /// Drop expired notifications now instead of on the next insert.
    pub fn remove_expired(&mut self) -> usize {
        let now = self.clock.now();
        let before = self.items.len();
        self.items.retain(|n| !n.is_expired(now));
        let removed = before - self.items.len();
        if removed > 0 {
            self.persist();
        }
        removed
    }

    /// Newest first.
    pub fn list(&self) -> &[Notification] {
        &self.items
    }

    pub fn unread_count(&self) -> usize {
        self.items.iter().filter(|n| !n.read).count()
    }

    fn persist(&self) {
        storage::persist_best_effort(self.store.as_ref(), namespaces::NOTIFICATIONS, &self.items);
    }
}

impl Notifier for NotificationCenter {
    fn notify(&mut self, notification: NewNotification) {
        self.add(notification);
    }
}
