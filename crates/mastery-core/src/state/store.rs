//! In-memory holder of the session's [`AppState`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::trace;

use crate::types::{AppState, AppStatePatch, Course, Goals, TrashItem, UserStats};

/// Owns the state aggregate for one user session.
///
/// Reads always observe the latest applied update: every mutation is applied
/// synchronously, before any persistence starts. The lock is never held
/// across an await point.
#[derive(Debug, Default)]
pub struct AppStateStore {
    state: RwLock<AppState>,
}

impl AppStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_state(state: AppState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, AppState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, AppState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a partial update. Present fields are replaced wholesale.
    pub fn apply_update(&self, patch: AppStatePatch) {
        if patch.is_empty() {
            return;
        }
        trace!(fields = ?patch.field_names(), "Applying state update");
        patch.apply_to(&mut self.write());
    }

    /// Replace the whole aggregate, e.g. after a remote reload.
    pub fn replace(&self, state: AppState) {
        *self.write() = state;
    }

    /// Reset to an empty aggregate.
    pub fn clear(&self) {
        self.replace(AppState::default());
    }

    /// Copy of the whole aggregate.
    pub fn snapshot(&self) -> AppState {
        self.read().clone()
    }

    /// Run a closure against the current state without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&AppState) -> R) -> R {
        f(&self.read())
    }

    pub fn courses(&self) -> Vec<Course> {
        self.read().courses.clone()
    }

    pub fn set_courses(&self, courses: Vec<Course>) {
        self.write().courses = courses;
    }

    pub fn user_stats(&self) -> UserStats {
        self.read().user_stats.clone()
    }

    pub fn set_user_stats(&self, stats: UserStats) {
        self.write().user_stats = stats;
    }

    pub fn wrong_history(&self) -> BTreeSet<String> {
        self.read().wrong_history.clone()
    }

    pub fn set_wrong_history(&self, wrong_history: BTreeSet<String>) {
        self.write().wrong_history = wrong_history;
    }

    pub fn mastered_questions(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.read().mastered_questions.clone()
    }

    pub fn set_mastered_questions(&self, mastered: BTreeMap<String, BTreeSet<String>>) {
        self.write().mastered_questions = mastered;
    }

    pub fn goals(&self) -> Goals {
        self.read().goals.clone()
    }

    pub fn set_goals(&self, goals: Goals) {
        self.write().goals = goals;
    }

    pub fn error_stats(&self) -> BTreeMap<String, u32> {
        self.read().error_stats.clone()
    }

    pub fn set_error_stats(&self, error_stats: BTreeMap<String, u32>) {
        self.write().error_stats = error_stats;
    }

    pub fn trash(&self) -> Vec<TrashItem> {
        self.read().trash.clone()
    }

    pub fn set_trash(&self, trash: Vec<TrashItem>) {
        self.write().trash = trash;
    }

    pub fn course(&self, course_id: &str) -> Option<Course> {
        self.read().course(course_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_update_touches_only_present_fields() {
        let store = AppStateStore::new();
        store.set_wrong_history(BTreeSet::from(["q1".to_string()]));

        store.apply_update(AppStatePatch::new().with_courses(vec![Course::new("c1", "History")]));

        assert_eq!(store.courses().len(), 1);
        assert!(store.wrong_history().contains("q1"));
    }

    #[test]
    fn test_reads_see_update_immediately() {
        let store = AppStateStore::new();
        let mut goals = Goals::default();
        goals.daily_target = 5;
        store.apply_update(AppStatePatch::new().with_goals(goals));
        assert_eq!(store.goals().daily_target, 5);
        assert_eq!(store.with(|s| s.goals.daily_target), 5);
    }

    #[test]
    fn test_replace_and_clear() {
        let store = AppStateStore::new();
        let mut state = AppState::default();
        state.courses.push(Course::new("c9", "Chem"));
        store.replace(state.clone());
        assert_eq!(store.snapshot(), state);
        assert!(store.course("c9").is_some());

        store.clear();
        assert!(store.courses().is_empty());
    }
}
