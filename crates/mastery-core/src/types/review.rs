//! Spaced-repetition review records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Scheduling state of one learning item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewItem {
    /// The question id this record schedules.
    pub item_id: String,
    /// Course the item belonged to when first reviewed. May dangle.
    pub course_id: String,
    /// When the item is next due.
    pub next_review_at: DateTime<Utc>,
    /// Current interval in days.
    pub interval: u32,
    /// SM-2 ease factor, never below 1.3.
    pub ease_factor: f64,
    /// Consecutive correct answers at due time.
    pub streak: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReviewItem {
    /// Build a record from a freshly computed schedule.
    ///
    /// `created_at` is taken from the prior record when there is one.
    pub fn from_schedule(
        item_id: impl Into<String>,
        course_id: impl Into<String>,
        schedule: &ReviewSchedule,
        prior: Option<&ReviewItem>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            course_id: course_id.into(),
            next_review_at: schedule.next_review_at,
            interval: schedule.interval,
            ease_factor: schedule.ease_factor,
            streak: schedule.streak,
            created_at: prior.map_or(now, |p| p.created_at),
            updated_at: now,
        }
    }

    /// Whether the item is due at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_review_at <= now
    }
}

/// Output of the scheduler for one review outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSchedule {
    pub interval: u32,
    pub ease_factor: f64,
    pub next_review_at: DateTime<Utc>,
    pub streak: u32,
}
