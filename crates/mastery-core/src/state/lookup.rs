//! Resolution of item ids referenced from progress maps.
//!
//! `wrong_history`, `mastered_questions` and `error_stats` hold bare item ids
//! that may outlive the question they point to. Lookups report such ids as
//! deleted instead of failing.

use crate::types::{AppState, Question};

use super::store::AppStateStore;

/// Result of resolving an item id against the course library.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemLookup {
    Live {
        course_id: String,
        quiz_id: String,
        question: Question,
    },
    Deleted,
}

impl ItemLookup {
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Live { .. })
    }
}

/// Find a question anywhere in the library.
pub fn lookup_item(state: &AppState, item_id: &str) -> ItemLookup {
    for course in &state.courses {
        for quiz in &course.quizzes {
            if let Some(question) = quiz.question(item_id) {
                return ItemLookup::Live {
                    course_id: course.id.clone(),
                    quiz_id: quiz.id.clone(),
                    question: question.clone(),
                };
            }
        }
    }
    ItemLookup::Deleted
}

impl AppStateStore {
    pub fn lookup_item(&self, item_id: &str) -> ItemLookup {
        self.with(|state| lookup_item(state, item_id))
    }

    /// Every id in the wrong-answer history with its resolution.
    pub fn resolve_wrong_history(&self) -> Vec<(String, ItemLookup)> {
        self.with(|state| {
            state
                .wrong_history
                .iter()
                .map(|id| (id.clone(), lookup_item(state, id)))
                .collect()
        })
    }

    /// Every mastered id of a course with its resolution. Unknown course → empty.
    pub fn resolve_mastered(&self, course_id: &str) -> Vec<(String, ItemLookup)> {
        self.with(|state| {
            state
                .mastered_questions
                .get(course_id)
                .map(|ids| {
                    ids.iter()
                        .map(|id| (id.clone(), lookup_item(state, id)))
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    /// Error counts for ids that still resolve, most frequent first.
    pub fn live_error_stats(&self) -> Vec<(String, u32)> {
        self.with(|state| {
            let mut live: Vec<(String, u32)> = state
                .error_stats
                .iter()
                .filter(|(id, _)| lookup_item(state, id).is_live())
                .map(|(id, count)| (id.clone(), *count))
                .collect();
            live.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            live
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Course, Quiz};
    use std::collections::{BTreeMap, BTreeSet};

    fn store() -> AppStateStore {
        let mut state = AppState::default();
        state.courses.push(Course::new("c1", "Geo").with_quizzes(vec![Quiz::new("z1", "Capitals")
            .with_questions(vec![Question::new("q1", "France?", "Paris")])]));
        state.wrong_history = BTreeSet::from(["q1".to_string(), "gone".to_string()]);
        state.mastered_questions =
            BTreeMap::from([("c1".to_string(), BTreeSet::from(["gone".to_string()]))]);
        state.error_stats = BTreeMap::from([("q1".to_string(), 2), ("gone".to_string(), 9)]);
        AppStateStore::with_state(state)
    }

    #[test]
    fn test_dangling_ids_resolve_as_deleted() {
        let store = store();
        let resolved = store.resolve_wrong_history();
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].1, ItemLookup::Deleted);
        assert!(resolved[1].1.is_live());

        assert_eq!(store.resolve_mastered("c1")[0].1, ItemLookup::Deleted);
        assert!(store.resolve_mastered("no-such-course").is_empty());
    }

    #[test]
    fn test_live_lookup_reports_location() {
        match store().lookup_item("q1") {
            ItemLookup::Live {
                course_id, quiz_id, ..
            } => {
                assert_eq!(course_id, "c1");
                assert_eq!(quiz_id, "z1");
            }
            ItemLookup::Deleted => panic!("q1 should resolve"),
        }
    }

    #[test]
    fn test_live_error_stats_skip_deleted() {
        assert_eq!(store().live_error_stats(), vec![("q1".to_string(), 2)]);
    }
}
