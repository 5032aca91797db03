//! SM-2 review scheduler.
//!
//! Computes the next review of one learning item from its prior state and a
//! correct/incorrect outcome. Two review policies are supported:
//!
//! - **Due review**: the item is answered at or after its due date with
//!   progression allowed. Correct answers grow the interval, incorrect
//!   answers reset it.
//! - **Maintenance review**: a correct answer given ahead of schedule, or in
//!   a mode that must not affect long-term scheduling. Interval, streak and
//!   ease are carried over unchanged.

use chrono::{DateTime, Duration, Utc};

use crate::config::SrsConfig;
use crate::types::{ReviewItem, ReviewSchedule};

/// SM-2 quality for a correct answer.
pub const QUALITY_CORRECT: u8 = 4;
/// SM-2 quality for an incorrect answer.
pub const QUALITY_INCORRECT: u8 = 1;

/// First interval after a correct answer from streak 0.
const FIRST_INTERVAL_DAYS: u32 = 1;
/// Interval after the second consecutive correct answer.
const SECOND_INTERVAL_DAYS: u32 = 6;

/// `now + interval` days, saturating at the latest representable instant.
fn due_after(now: DateTime<Utc>, interval: u32) -> DateTime<Utc> {
    now.checked_add_signed(Duration::days(i64::from(interval)))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Which policy produced a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewBranch {
    Maintenance,
    Progression,
    Reset,
}

/// SM-2 scheduler.
///
/// Pure and deterministic: the same inputs always give the same schedule.
#[derive(Debug, Clone)]
pub struct SrsScheduler {
    initial_ease: f64,
    min_ease: f64,
}

impl SrsScheduler {
    /// Create a scheduler with the standard SM-2 parameters (ease 2.5, floor 1.3).
    pub fn new() -> Self {
        Self::with_config(&SrsConfig::default())
    }

    pub fn with_config(config: &SrsConfig) -> Self {
        Self {
            initial_ease: config.initial_ease,
            min_ease: config.min_ease,
        }
    }

    /// Compute the next review state of an item.
    ///
    /// # Arguments
    /// * `current` - Prior state, `None` for an item never reviewed
    /// * `was_correct` - Outcome of this review
    /// * `allow_progression` - `false` in modes that must not advance the schedule
    /// * `now` - Review time
    pub fn next_review(
        &self,
        current: Option<&ReviewItem>,
        was_correct: bool,
        allow_progression: bool,
        now: DateTime<Utc>,
    ) -> ReviewSchedule {
        self.next_review_with_branch(current, was_correct, allow_progression, now)
            .0
    }

    /// Like [`next_review`](Self::next_review), also reporting the branch taken.
    pub fn next_review_with_branch(
        &self,
        current: Option<&ReviewItem>,
        was_correct: bool,
        allow_progression: bool,
        now: DateTime<Utc>,
    ) -> (ReviewSchedule, ReviewBranch) {
        let branch = Self::branch(current, was_correct, allow_progression, now);

        let (interval, ease_factor, streak) = match (branch, current) {
            (ReviewBranch::Maintenance, Some(item)) => {
                (item.interval, item.ease_factor, item.streak)
            }
            (ReviewBranch::Progression, _) => {
                let (prev_interval, ease, streak) = current.map_or(
                    (0, self.initial_ease, 0),
                    |item| (item.interval, item.ease_factor, item.streak),
                );
                let interval = match streak {
                    0 => FIRST_INTERVAL_DAYS,
                    1 => SECOND_INTERVAL_DAYS,
                    _ => ((prev_interval as f64 * ease).round() as u32).max(1),
                };
                (
                    interval,
                    self.adjust_ease(ease, QUALITY_CORRECT),
                    streak.saturating_add(1),
                )
            }
            _ => {
                let ease = current.map_or(self.initial_ease, |item| item.ease_factor);
                (
                    FIRST_INTERVAL_DAYS,
                    self.adjust_ease(ease, QUALITY_INCORRECT),
                    0,
                )
            }
        };

        let schedule = ReviewSchedule {
            interval,
            ease_factor,
            next_review_at: due_after(now, interval),
            streak,
        };
        (schedule, branch)
    }

    /// Decide which policy applies.
    ///
    /// Incorrect answers always reset, so maintenance can never protect a
    /// streak from a wrong answer.
    pub fn branch(
        current: Option<&ReviewItem>,
        was_correct: bool,
        allow_progression: bool,
        now: DateTime<Utc>,
    ) -> ReviewBranch {
        if !was_correct {
            return ReviewBranch::Reset;
        }
        match current {
            Some(item) if item.next_review_at > now || !allow_progression => {
                ReviewBranch::Maintenance
            }
            _ => ReviewBranch::Progression,
        }
    }

    /// SM-2 ease update: `ease + 0.1 - (5-q)(0.08 + (5-q)0.02)`, floored.
    pub fn adjust_ease(&self, ease: f64, quality: u8) -> f64 {
        let d = 5.0 - quality.min(5) as f64;
        (ease + (0.1 - d * (0.08 + d * 0.02))).max(self.min_ease)
    }

    pub fn initial_ease(&self) -> f64 {
        self.initial_ease
    }

    pub fn min_ease(&self) -> f64 {
        self.min_ease
    }
}

impl Default for SrsScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
    }

    fn item(streak: u32, interval: u32, ease: f64, due: DateTime<Utc>) -> ReviewItem {
        ReviewItem {
            item_id: "q1".to_string(),
            course_id: "c1".to_string(),
            next_review_at: due,
            interval,
            ease_factor: ease,
            streak,
            created_at: t0() - Duration::days(60),
            updated_at: t0() - Duration::days(15),
        }
    }

    #[test]
    fn test_new_item_correct() {
        let s = SrsScheduler::new().next_review(None, true, true, t0());
        assert_eq!(s.interval, 1);
        assert_eq!(s.streak, 1);
        assert_eq!(s.next_review_at, t0() + Duration::days(1));
        assert!((s.ease_factor - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_new_item_incorrect_still_enters_schedule() {
        let s = SrsScheduler::new().next_review(None, false, true, t0());
        assert_eq!(s.interval, 1);
        assert_eq!(s.streak, 0);
        assert_eq!(s.next_review_at, t0() + Duration::days(1));
        assert!((s.ease_factor - 1.96).abs() < 1e-9);
    }

    #[test]
    fn test_new_item_correct_without_progression_still_progresses() {
        // Maintenance needs an existing item.
        let (s, branch) = SrsScheduler::new().next_review_with_branch(None, true, false, t0());
        assert_eq!(branch, ReviewBranch::Progression);
        assert_eq!(s.streak, 1);
    }

    #[test]
    fn test_deterministic() {
        let scheduler = SrsScheduler::new();
        let prior = item(2, 6, 2.36, t0());
        let a = scheduler.next_review(Some(&prior), true, true, t0());
        let b = scheduler.next_review(Some(&prior), true, true, t0());
        assert_eq!(a, b);
    }

    #[test]
    fn test_progression_sequence_at_due_dates() {
        let scheduler = SrsScheduler::new();
        let mut now = t0();
        let mut current: Option<ReviewItem> = None;
        let mut intervals = Vec::new();

        for _ in 0..5 {
            let s = scheduler.next_review(current.as_ref(), true, true, now);
            intervals.push(s.interval);
            let next = ReviewItem::from_schedule("q1", "c1", &s, current.as_ref(), now);
            now = s.next_review_at;
            current = Some(next);
        }

        // Quality 4 leaves the ease at 2.5.
        assert_eq!(intervals, vec![1, 6, 15, 38, 95]);
        assert!((current.unwrap().ease_factor - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_incorrect_resets_from_any_state() {
        let scheduler = SrsScheduler::new();
        for prior in [
            item(0, 1, 2.5, t0()),
            item(5, 120, 2.8, t0() - Duration::days(3)),
            item(3, 15, 1.3, t0() + Duration::days(4)),
        ] {
            let s = scheduler.next_review(Some(&prior), false, true, t0());
            assert_eq!(s.streak, 0);
            assert_eq!(s.interval, 1);
            assert!(s.ease_factor <= prior.ease_factor);
            assert!(s.ease_factor >= 1.3);
        }
    }

    #[test]
    fn test_ease_never_below_floor() {
        let scheduler = SrsScheduler::new();
        let mut current = item(0, 1, 1.35, t0());
        for _ in 0..5 {
            let s = scheduler.next_review(Some(&current), false, true, t0());
            assert!(s.ease_factor >= 1.3);
            current = ReviewItem::from_schedule("q1", "c1", &s, Some(&current), t0());
        }
        assert!((current.ease_factor - 1.3).abs() < 1e-9);
    }

    #[test]
    fn test_maintenance_without_progression_preserves_schedule() {
        let prior = item(3, 15, 2.5, t0() - Duration::days(1));
        let (s, branch) =
            SrsScheduler::new().next_review_with_branch(Some(&prior), true, false, t0());

        assert_eq!(branch, ReviewBranch::Maintenance);
        assert_eq!(s.interval, 15);
        assert_eq!(s.streak, 3);
        assert!((s.ease_factor - 2.5).abs() < 1e-9);
        assert_eq!(s.next_review_at, t0() + Duration::days(15));
    }

    #[test]
    fn test_early_review_preserves_schedule() {
        let prior = item(3, 15, 2.5, t0() + Duration::days(5));
        let (s, branch) =
            SrsScheduler::new().next_review_with_branch(Some(&prior), true, true, t0());

        assert_eq!(branch, ReviewBranch::Maintenance);
        assert_eq!((s.interval, s.streak), (15, 3));
        assert!((s.ease_factor - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_repeated_early_answers_do_not_grow_streak() {
        let scheduler = SrsScheduler::new();
        let mut current = item(2, 6, 2.5, t0() + Duration::days(3));
        for hour in 0..10 {
            let now = t0() + Duration::hours(hour);
            let s = scheduler.next_review(Some(&current), true, true, now);
            current = ReviewItem::from_schedule("q1", "c1", &s, Some(&current), now);
        }
        assert_eq!(current.streak, 2);
        assert_eq!(current.interval, 6);
    }

    #[test]
    fn test_incorrect_early_answer_still_resets() {
        let prior = item(4, 40, 2.5, t0() + Duration::days(20));
        let (s, branch) =
            SrsScheduler::new().next_review_with_branch(Some(&prior), false, false, t0());
        assert_eq!(branch, ReviewBranch::Reset);
        assert_eq!((s.interval, s.streak), (1, 0));
    }

    #[test]
    fn test_interval_rounded_to_whole_days() {
        let prior = item(2, 7, 1.3, t0());
        let s = SrsScheduler::new().next_review(Some(&prior), true, true, t0());
        // 7 * 1.3 = 9.1
        assert_eq!(s.interval, 9);
    }

    #[test]
    fn test_huge_interval_saturates_due_date() {
        let scheduler = SrsScheduler::new();
        let prior = item(5, 200_000_000, 2.5, t0());

        let kept = scheduler.next_review(Some(&prior), true, false, t0());
        assert_eq!(kept.interval, 200_000_000);
        assert_eq!(kept.next_review_at, DateTime::<Utc>::MAX_UTC);

        let grown = scheduler.next_review(Some(&prior), true, true, t0());
        assert_eq!(grown.interval, 500_000_000);
        assert_eq!(grown.next_review_at, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_saturated_streak_and_interval_do_not_overflow() {
        let prior = item(u32::MAX, u32::MAX, 2.5, t0());
        let s = SrsScheduler::new().next_review(Some(&prior), true, true, t0());
        assert_eq!(s.streak, u32::MAX);
        assert_eq!(s.interval, u32::MAX);
        assert_eq!(s.next_review_at, DateTime::<Utc>::MAX_UTC);
    }
}
