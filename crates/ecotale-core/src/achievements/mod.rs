//! Achievement and milestone detection.
//!
//! [`AchievementDetector::evaluate`] is a pure function of the history after
//! an insert and the entry just recorded. Cumulative rules fire when the new
//! entry carries a total across its threshold; the detector keeps no memory
//! of what it reported before. Remembering that is the job of the
//! [`AchievementLedger`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::calendar::Calendar;
use crate::error::StorageError;
use crate::history::RecyclingEntry;
use crate::notifications::{NewNotification, NotificationKind};
use crate::ports::DurableStore;
use crate::storage::{self, namespaces, Hydration};

/// A cumulative-weight achievement level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub threshold_kg: f64,
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AchievementPolicy {
    #[serde(default = "default_tiers")]
    pub tiers: Vec<Tier>,
    /// kg of CO2 saved per kg recycled, used when no CO2 total is supplied.
    #[serde(default = "default_co2_factor")]
    pub co2_factor: f64,
    #[serde(default = "default_co2_threshold_kg")]
    pub co2_threshold_kg: f64,
    #[serde(default = "default_material_threshold_kg")]
    pub material_threshold_kg: f64,
    #[serde(default = "default_single_entry_threshold_kg")]
    pub single_entry_threshold_kg: f64,
    #[serde(default = "default_daily_threshold_kg")]
    pub daily_threshold_kg: f64,
}

fn default_tiers() -> Vec<Tier> {
    vec![
        Tier {
            threshold_kg: 100.0,
            title: "\u{1F331} Green Warrior Achievement".into(),
            message: "Great job! You've recycled over 100kg of materials!".into(),
        },
        Tier {
            threshold_kg: 500.0,
            title: "\u{1F31F} Pro Recycler Achievement".into(),
            message: "Amazing! You've recycled over 500kg of materials!".into(),
        },
        Tier {
            threshold_kg: 1000.0,
            title: "\u{1F3C6} Master Recycler Achievement".into(),
            message: "Congratulations! You've recycled over 1,000kg of materials!".into(),
        },
    ]
}

fn default_co2_factor() -> f64 {
    2.5
}

fn default_co2_threshold_kg() -> f64 {
    1000.0
}

fn default_material_threshold_kg() -> f64 {
    100.0
}

fn default_single_entry_threshold_kg() -> f64 {
    50.0
}

fn default_daily_threshold_kg() -> f64 {
    10.0
}

impl Default for AchievementPolicy {
    fn default() -> Self {
        Self {
            tiers: default_tiers(),
            co2_factor: default_co2_factor(),
            co2_threshold_kg: default_co2_threshold_kg(),
            material_threshold_kg: default_material_threshold_kg(),
            single_entry_threshold_kg: default_single_entry_threshold_kg(),
            daily_threshold_kg: default_daily_threshold_kg(),
        }
    }
}

/// Which rule produced a milestone.
#[derive(Debug, Clone, PartialEq)]
pub enum MilestoneRule {
    Tier { threshold_kg: f64 },
    ClimateChampion,
    MaterialSpecialist { material: String },
    BigEntry,
    DailyRecord { day: NaiveDate },
}

impl MilestoneRule {
    /// Ledger key for rules that should fire at most once.
    ///
    /// `None` for rules that fire on every qualifying entry.
    pub fn ledger_key(&self) -> Option<String> {
        match self {
            Self::Tier { threshold_kg } => Some(format!("tier:{threshold_kg}")),
            Self::ClimateChampion => Some("climate-champion".to_string()),
            Self::MaterialSpecialist { material } => {
                Some(format!("material:{}", material.to_lowercase()))
            }
            Self::BigEntry => None,
            Self::DailyRecord { day } => Some(format!("daily-record:{day}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Milestone {
    pub rule: MilestoneRule,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
}

impl Milestone {
    pub fn to_notification(&self) -> NewNotification {
        NewNotification::new(self.kind, self.title.clone(), self.message.clone())
    }
}

/// Everything the detector looks at for one recorded entry.
#[derive(Debug, Clone, Copy)]
pub struct AchievementInput<'a> {
    /// All entries, including `entry`.
    pub history: &'a [RecyclingEntry],
    pub entry: &'a RecyclingEntry,
    /// Total kg over `history`. The figure before `entry` is always summed
    /// from the other entries.
    pub cumulative_kg: f64,
    /// Total CO2 saved, if known. Derived from `cumulative_kg` otherwise.
    pub cumulative_co2_kg: Option<f64>,
}

impl<'a> AchievementInput<'a> {
    /// Build an input whose totals are summed from `history`.
    pub fn from_history(history: &'a [RecyclingEntry], entry: &'a RecyclingEntry) -> Self {
        Self {
            history,
            entry,
            cumulative_kg: history.iter().map(|e| e.weight_kg).sum(),
            cumulative_co2_kg: None,
        }
    }
}

fn crossed(before: f64, after: f64, threshold: f64) -> bool {
    before < threshold && threshold <= after
}

/// Materials match regardless of case, the same way ledger keys do.
fn same_material(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

#[derive(Debug, Clone)]
pub struct AchievementDetector {
    policy: AchievementPolicy,
    calendar: Calendar,
}

impl AchievementDetector {
    pub fn new(policy: AchievementPolicy, calendar: Calendar) -> Self {
        Self { policy, calendar }
    }

    pub fn policy(&self) -> &AchievementPolicy {
        &self.policy
    }

    /// Milestones reached by recording `input.entry`, in notification order.
    pub fn evaluate(&self, input: &AchievementInput<'_>) -> Vec<Milestone> {
        let entry = input.entry;
        let mut fired = Vec::new();

        // Totals before this entry are sums over the other entries, never
        // `total - entry`.
        let others = || input.history.iter().filter(move |e| e.id != entry.id);

        let total = input.cumulative_kg;
        let before: f64 = others().map(|e| e.weight_kg).sum();
        // Only the highest tier crossed by this entry.
        if let Some(tier) = self
            .policy
            .tiers
            .iter()
            .filter(|t| crossed(before, total, t.threshold_kg))
            .max_by(|a, b| a.threshold_kg.total_cmp(&b.threshold_kg))
        {
            fired.push(Milestone {
                rule: MilestoneRule::Tier {
                    threshold_kg: tier.threshold_kg,
                },
                kind: NotificationKind::Achievement,
                title: tier.title.clone(),
                message: tier.message.clone(),
            });
        }

        let (co2_before, co2_total) = match input.cumulative_co2_kg {
            Some(co2) => (others().map(|e| e.co2_saved_kg).sum(), co2),
            None => (before * self.policy.co2_factor, total * self.policy.co2_factor),
        };
        if crossed(co2_before, co2_total, self.policy.co2_threshold_kg) {
            fired.push(Milestone {
                rule: MilestoneRule::ClimateChampion,
                kind: NotificationKind::Achievement,
                title: "\u{1F30D} Climate Champion".to_string(),
                message: format!(
                    "Your recycling has saved over {}kg of CO2 emissions!",
                    self.policy.co2_threshold_kg
                ),
            });
        }

        let material_before: f64 = others()
            .filter(|e| same_material(&e.material_type, &entry.material_type))
            .map(|e| e.weight_kg)
            .sum();
        if crossed(
            material_before,
            material_before + entry.weight_kg,
            self.policy.material_threshold_kg,
        ) {
            let material = &entry.material_type;
            fired.push(Milestone {
                rule: MilestoneRule::MaterialSpecialist {
                    material: material.clone(),
                },
                kind: NotificationKind::Milestone,
                title: format!("\u{267B}\u{FE0F} {material} Specialist"),
                message: format!(
                    "You've recycled over {}kg of {material}!",
                    self.policy.material_threshold_kg
                ),
            });
        }

        if entry.weight_kg >= self.policy.single_entry_threshold_kg {
            fired.push(Milestone {
                rule: MilestoneRule::BigEntry,
                kind: NotificationKind::Milestone,
                title: "\u{1F3AF} Big Recycling Milestone".to_string(),
                message: format!("Wow! You just recycled {:.1}kg in one go!", entry.weight_kg),
            });
        }

        let day = self.calendar.day_of(entry.created_at);
        let day_before: f64 = others()
            .filter(|e| self.calendar.day_of(e.created_at) == day)
            .map(|e| e.weight_kg)
            .sum();
        if crossed(
            day_before,
            day_before + entry.weight_kg,
            self.policy.daily_threshold_kg,
        ) {
            fired.push(Milestone {
                rule: MilestoneRule::DailyRecord { day },
                kind: NotificationKind::Milestone,
                title: "\u{1F4C8} Daily Record".to_string(),
                message: format!(
                    "You've recycled over {}kg today! Keep up the momentum!",
                    self.policy.daily_threshold_kg
                ),
            });
        }

        debug!(entry = %entry.id, fired = fired.len(), "achievements evaluated");
        fired
    }
}

/// Persisted set of once-only milestones that have already been announced.
pub struct AchievementLedger {
    store: Arc<dyn DurableStore>,
    seen: BTreeSet<String>,
}

impl AchievementLedger {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self {
            store,
            seen: BTreeSet::new(),
        }
    }

    pub fn hydrate(&mut self) -> Result<Hydration, StorageError> {
        let (stored, discarded) =
            storage::load_json::<BTreeSet<String>>(self.store.as_ref(), namespaces::ACHIEVEMENTS)?;
        if let Some(reason) = discarded {
            self.seen.clear();
            return Ok(Hydration::Discarded { reason });
        }
        match stored {
            Some(seen) => {
                self.seen = seen;
                Ok(Hydration::Restored {
                    items: self.seen.len(),
                })
            }
            None => Ok(Hydration::Empty),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Drop once-only milestones already in the ledger and record the rest.
    pub fn filter(&mut self, milestones: Vec<Milestone>) -> Vec<Milestone> {
        let before = self.seen.len();
        let fresh: Vec<Milestone> = milestones
            .into_iter()
            .filter(|m| match m.rule.ledger_key() {
                Some(key) => self.seen.insert(key),
                None => true,
            })
            .collect();
        if self.seen.len() != before {
            storage::persist_best_effort(self.store.as_ref(), namespaces::ACHIEVEMENTS, &self.seen);
        }
        fresh
    }
}

/// Total kg per material type, keyed by the lowercased material.
pub fn material_totals(history: &[RecyclingEntry]) -> BTreeMap<String, f64> {
    let mut totals = BTreeMap::new();
    for e in history {
        *totals.entry(e.material_type.to_lowercase()).or_insert(0.0) += e.weight_kg;
    }
    totals
}
