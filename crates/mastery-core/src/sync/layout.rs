//! Mapping between the state aggregate and remote documents.
//!
//! The aggregate normally lives whole in the user's root document. Older
//! accounts keep their courses in a `courses` subcollection, each course
//! with its own `quizzes` subcollection; those are read when the root
//! document has no `courses` field.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use super::sanitize::strip_nulls;
use super::state::{UPDATED_AT_FIELD, WRITE_TOKEN_FIELD};
use crate::error::{MasteryError, MasteryResult};
use crate::traits::{DocPath, RemoteStore};
use crate::types::{AppState, Course, Quiz};

/// State read from the remote store.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSnapshot {
    pub state: AppState,
    /// Server time of the root document's last write.
    pub written_at: DateTime<Utc>,
}

/// Serialize the aggregate into a root-document payload without nulls.
pub fn build_payload(state: &AppState) -> MasteryResult<Value> {
    Ok(strip_nulls(serde_json::to_value(state)?))
}

/// Add write metadata to a payload.
pub fn stamp(mut payload: Value, now: DateTime<Utc>, token: &str) -> Value {
    if let Value::Object(fields) = &mut payload {
        fields.insert(UPDATED_AT_FIELD.to_string(), Value::String(now.to_rfc3339()));
        fields.insert(WRITE_TOKEN_FIELD.to_string(), Value::String(token.to_string()));
    }
    payload
}

/// Load the full state of a user. `None` when the root document does not exist.
pub async fn load_remote_state(
    remote: &dyn RemoteStore,
    uid: &str,
) -> MasteryResult<Option<RemoteSnapshot>> {
    let Some(root) = remote.get(&DocPath::user_root(uid)).await? else {
        return Ok(None);
    };

    let split_layout = root.data.get("courses").is_none();
    let mut state: AppState = serde_json::from_value(root.data)
        .map_err(|e| MasteryError::parse(format!("user document for {}: {}", uid, e)))?;

    if split_layout {
        state.courses = load_course_collection(remote, uid).await?;
        debug!(uid, courses = state.courses.len(), "Loaded courses from subcollections");
    }

    Ok(Some(RemoteSnapshot {
        state,
        written_at: root.written_at,
    }))
}

async fn load_course_collection(remote: &dyn RemoteStore, uid: &str) -> MasteryResult<Vec<Course>> {
    let mut courses = Vec::new();
    for doc in remote.list_collection(&DocPath::courses(uid)).await? {
        let mut course: Course = serde_json::from_value(doc.data)
            .map_err(|e| MasteryError::parse(format!("course {}: {}", doc.path, e)))?;

        let quizzes = remote
            .list_collection(&DocPath::quizzes(uid, &course.id))
            .await?
            .into_iter()
            .map(|doc| {
                serde_json::from_value::<Quiz>(doc.data)
                    .map_err(|e| MasteryError::parse(format!("quiz {}: {}", doc.path, e)))
            })
            .collect::<MasteryResult<Vec<_>>>()?;
        if !quizzes.is_empty() {
            course.quizzes = quizzes;
        }
        courses.push(course);
    }
    Ok(courses)
}
