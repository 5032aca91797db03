//! The per-user state aggregate and partial updates to it.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::course::Course;
use super::trash::TrashItem;

/// Aggregate experience and streak statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserStats {
    pub total_experience: u64,
    pub level: u32,
    pub current_streak: u32,
    pub best_streak: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_study_date: Option<NaiveDate>,
    /// Experience earned per day.
    pub daily_experience: BTreeMap<NaiveDate, u64>,
    /// Questions answered per day.
    pub daily_answers: BTreeMap<NaiveDate, u32>,
}

/// Daily and weekly study goals with their running progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Goals {
    pub daily_target: u32,
    pub weekly_target: u32,
    pub daily_progress: u32,
    pub weekly_progress: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daily_reset_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weekly_reset_at: Option<DateTime<Utc>>,
}

impl Default for Goals {
    fn default() -> Self {
        Self {
            daily_target: 20,
            weekly_target: 100,
            daily_progress: 0,
            weekly_progress: 0,
            daily_reset_at: None,
            weekly_reset_at: None,
        }
    }
}

impl Goals {
    /// Reset progress counters whose period has ended.
    ///
    /// Daily progress resets on a new UTC day, weekly progress on a new ISO
    /// week. Returns true if anything changed.
    pub fn roll_over(&mut self, now: DateTime<Utc>) -> bool {
        let mut changed = false;

        let new_day = self
            .daily_reset_at
            .map_or(true, |reset| now.date_naive() > reset.date_naive());
        if new_day {
            self.daily_progress = 0;
            self.daily_reset_at = Some(now);
            changed = true;
        }

        let week_of = |t: DateTime<Utc>| {
            let week = t.iso_week();
            (week.year(), week.week())
        };
        let new_week = self
            .weekly_reset_at
            .map_or(true, |reset| week_of(now) > week_of(reset));
        if new_week {
            self.weekly_progress = 0;
            self.weekly_reset_at = Some(now);
            changed = true;
        }

        changed
    }

    /// Whether today's target has been reached.
    pub fn daily_met(&self) -> bool {
        self.daily_progress >= self.daily_target
    }
}

/// Everything a user owns and mutates, held in memory for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppState {
    pub courses: Vec<Course>,
    pub user_stats: UserStats,
    /// Item ids answered wrongly and not yet cleared.
    pub wrong_history: BTreeSet<String>,
    /// Mastered item ids, keyed by course id.
    pub mastered_questions: BTreeMap<String, BTreeSet<String>>,
    pub goals: Goals,
    /// How often each item id was answered wrongly.
    pub error_stats: BTreeMap<String, u32>,
    pub trash: Vec<TrashItem>,
}

impl AppState {
    /// Find a course by id.
    pub fn course(&self, course_id: &str) -> Option<&Course> {
        self.courses.iter().find(|c| c.id == course_id)
    }
}

/// A partial update to [`AppState`].
///
/// Each present field replaces the corresponding state field wholesale;
/// absent fields are left untouched. There is no deep merge: callers must
/// pass a complete replacement for every field they touch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub courses: Option<Vec<Course>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_stats: Option<UserStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wrong_history: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mastered_questions: Option<BTreeMap<String, BTreeSet<String>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goals: Option<Goals>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_stats: Option<BTreeMap<String, u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trash: Option<Vec<TrashItem>>,
}

impl AppStatePatch {
    /// Create an empty patch.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_courses(mut self, courses: Vec<Course>) -> Self {
        self.courses = Some(courses);
        self
    }

    pub fn with_user_stats(mut self, stats: UserStats) -> Self {
        self.user_stats = Some(stats);
        self
    }

    pub fn with_wrong_history(mut self, wrong_history: BTreeSet<String>) -> Self {
        self.wrong_history = Some(wrong_history);
        self
    }

    pub fn with_mastered_questions(
        mut self,
        mastered: BTreeMap<String, BTreeSet<String>>,
    ) -> Self {
        self.mastered_questions = Some(mastered);
        self
    }

    pub fn with_goals(mut self, goals: Goals) -> Self {
        self.goals = Some(goals);
        self
    }

    pub fn with_error_stats(mut self, error_stats: BTreeMap<String, u32>) -> Self {
        self.error_stats = Some(error_stats);
        self
    }

    pub fn with_trash(mut self, trash: Vec<TrashItem>) -> Self {
        self.trash = Some(trash);
        self
    }

    /// Whether the patch touches no field.
    pub fn is_empty(&self) -> bool {
        self.field_names().is_empty()
    }

    /// Names of the fields this patch replaces, for logging.
    pub fn field_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.courses.is_some() {
            names.push("courses");
        }
        if self.user_stats.is_some() {
            names.push("userStats");
        }
        if self.wrong_history.is_some() {
            names.push("wrongHistory");
        }
        if self.mastered_questions.is_some() {
            names.push("masteredQuestions");
        }
        if self.goals.is_some() {
            names.push("goals");
        }
        if self.error_stats.is_some() {
            names.push("errorStats");
        }
        if self.trash.is_some() {
            names.push("trash");
        }
        names
    }

    /// Fold a later patch into this one. The later value wins per field.
    pub fn merge(&mut self, later: AppStatePatch) {
        if later.courses.is_some() {
            self.courses = later.courses;
        }
        if later.user_stats.is_some() {
            self.user_stats = later.user_stats;
        }
        if later.wrong_history.is_some() {
            self.wrong_history = later.wrong_history;
        }
        if later.mastered_questions.is_some() {
            self.mastered_questions = later.mastered_questions;
        }
        if later.goals.is_some() {
            self.goals = later.goals;
        }
        if later.error_stats.is_some() {
            self.error_stats = later.error_stats;
        }
        if later.trash.is_some() {
            self.trash = later.trash;
        }
    }

    /// Apply this patch to a state.
    pub fn apply_to(self, state: &mut AppState) {
        if let Some(courses) = self.courses {
            state.courses = courses;
        }
        if let Some(stats) = self.user_stats {
            state.user_stats = stats;
        }
        if let Some(wrong_history) = self.wrong_history {
            state.wrong_history = wrong_history;
        }
        if let Some(mastered) = self.mastered_questions {
            state.mastered_questions = mastered;
        }
        if let Some(goals) = self.goals {
            state.goals = goals;
        }
        if let Some(error_stats) = self.error_stats {
            state.error_stats = error_stats;
        }
        if let Some(trash) = self.trash {
            state.trash = trash;
        }
    }
}

impl From<AppState> for AppStatePatch {
    fn from(state: AppState) -> Self {
        Self {
            courses: Some(state.courses),
            user_stats: Some(state.user_stats),
            wrong_history: Some(state.wrong_history),
            mastered_questions: Some(state.mastered_questions),
            goals: Some(state.goals),
            error_stats: Some(state.error_stats),
            trash: Some(state.trash),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_patch_merge_last_writer_per_field() {
        let mut first = AppStatePatch::new()
            .with_courses(vec![Course::new("c1", "One")])
            .with_error_stats(BTreeMap::from([("i1".to_string(), 1)]));
        let second = AppStatePatch::new()
            .with_courses(vec![Course::new("c2", "Two")])
            .with_goals(Goals::default());

        first.merge(second);

        assert_eq!(first.courses.as_ref().unwrap()[0].id, "c2");
        assert_eq!(first.error_stats.as_ref().unwrap()["i1"], 1);
        assert!(first.goals.is_some());
        assert_eq!(first.field_names(), vec!["courses", "goals", "errorStats"]);
    }

    #[test]
    fn test_patch_replaces_fields_wholesale() {
        let mut state = AppState::default();
        state.error_stats.insert("a".to_string(), 3);
        state.error_stats.insert("b".to_string(), 1);

        AppStatePatch::new()
            .with_error_stats(BTreeMap::from([("c".to_string(), 7)]))
            .apply_to(&mut state);

        // No deep merge: "a" and "b" are gone.
        assert_eq!(state.error_stats.len(), 1);
        assert_eq!(state.error_stats["c"], 7);
    }

    #[test]
    fn test_empty_patch() {
        assert!(AppStatePatch::new().is_empty());
        assert!(!AppStatePatch::from(AppState::default()).is_empty());
    }

    #[test]
    fn test_goals_roll_over_new_day_keeps_week() {
        // Tuesday and Wednesday of the same ISO week.
        let tuesday = Utc.with_ymd_and_hms(2024, 3, 5, 20, 0, 0).unwrap();
        let wednesday = Utc.with_ymd_and_hms(2024, 3, 6, 8, 0, 0).unwrap();

        let mut goals = Goals::default();
        assert!(goals.roll_over(tuesday));
        goals.daily_progress = 12;
        goals.weekly_progress = 40;

        assert!(!goals.roll_over(tuesday + chrono::Duration::hours(2)));
        assert_eq!(goals.daily_progress, 12);

        assert!(goals.roll_over(wednesday));
        assert_eq!(goals.daily_progress, 0);
        assert_eq!(goals.weekly_progress, 40);
    }

    #[test]
    fn test_goals_roll_over_new_week() {
        let sunday = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let monday = Utc.with_ymd_and_hms(2024, 3, 11, 12, 0, 0).unwrap();

        let mut goals = Goals::default();
        goals.roll_over(sunday);
        goals.weekly_progress = 90;

        goals.roll_over(monday);
        assert_eq!(goals.weekly_progress, 0);
        assert_eq!(goals.weekly_reset_at, Some(monday));
    }

    #[test]
    fn test_app_state_round_trips_through_json() {
        let mut state = AppState::default();
        state.courses.push(Course::new("c1", "Biology"));
        state.wrong_history.insert("q9".to_string());
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        state.user_stats.daily_experience.insert(day, 50);

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["userStats"]["dailyExperience"]["2024-01-02"], 50);

        let back: AppState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
