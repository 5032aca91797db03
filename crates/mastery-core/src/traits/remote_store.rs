//! Remote document store trait and related types.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::MasteryResult;

/// Slash-separated path of a document or collection in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocPath(String);

impl DocPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// `users/{uid}` - the root document holding the state aggregate.
    pub fn user_root(uid: &str) -> Self {
        Self(format!("users/{}", uid))
    }

    /// `users/{uid}/courses`
    pub fn courses(uid: &str) -> Self {
        Self(format!("users/{}/courses", uid))
    }

    /// `users/{uid}/courses/{courseId}`
    pub fn course(uid: &str, course_id: &str) -> Self {
        Self(format!("users/{}/courses/{}", uid, course_id))
    }

    /// `users/{uid}/courses/{courseId}/quizzes`
    pub fn quizzes(uid: &str, course_id: &str) -> Self {
        Self(format!("users/{}/courses/{}/quizzes", uid, course_id))
    }

    /// `users/{uid}/courses/{courseId}/quizzes/{quizId}`
    pub fn quiz(uid: &str, course_id: &str, quiz_id: &str) -> Self {
        Self(format!("users/{}/courses/{}/quizzes/{}", uid, course_id, quiz_id))
    }

    /// `users/{uid}/reviews`
    pub fn reviews(uid: &str) -> Self {
        Self(format!("users/{}/reviews", uid))
    }

    /// `users/{uid}/reviews/{itemId}`
    pub fn review(uid: &str, item_id: &str) -> Self {
        Self(format!("users/{}/reviews/{}", uid, item_id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment, i.e. the document id.
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Whether this path names a direct child document of `collection`.
    pub fn is_child_of(&self, collection: &DocPath) -> bool {
        self.0
            .strip_prefix(collection.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .is_some_and(|id| !id.is_empty() && !id.contains('/'))
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub path: DocPath,
    pub data: serde_json::Value,
    /// Server-assigned time of the last write.
    pub written_at: DateTime<Utc>,
}

impl Document {
    pub fn id(&self) -> &str {
        self.path.id()
    }
}

/// Notification that a subscribed document changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteChange {
    pub path: DocPath,
    /// Server-assigned time of the write that caused this notification.
    pub written_at: DateTime<Utc>,
    /// New document contents, `None` if it was removed.
    pub data: Option<serde_json::Value>,
}

/// Stream of change notifications. Dropping it unsubscribes.
pub type RemoteSubscription = BoxStream<'static, RemoteChange>;

/// The authoritative per-user document store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read a document.
    async fn get(&self, path: &DocPath) -> MasteryResult<Option<Document>>;

    /// Write a document and return the server-assigned write time.
    ///
    /// With `merge`, top-level fields of `data` are merged into the existing
    /// document; otherwise the document is replaced.
    async fn set(
        &self,
        path: &DocPath,
        data: serde_json::Value,
        merge: bool,
    ) -> MasteryResult<DateTime<Utc>>;

    /// Subscribe to changes of a single document.
    async fn subscribe(&self, path: &DocPath) -> MasteryResult<RemoteSubscription>;

    /// List the direct child documents of a collection.
    async fn list_collection(&self, path: &DocPath) -> MasteryResult<Vec<Document>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(DocPath::user_root("u1").as_str(), "users/u1");
        assert_eq!(
            DocPath::quiz("u1", "c1", "q1").as_str(),
            "users/u1/courses/c1/quizzes/q1"
        );
        assert_eq!(DocPath::review("u1", "item-7").id(), "item-7");
    }

    #[test]
    fn test_is_child_of() {
        let reviews = DocPath::reviews("u1");
        assert!(DocPath::review("u1", "a").is_child_of(&reviews));
        assert!(!DocPath::user_root("u1").is_child_of(&reviews));
        assert!(!DocPath::new("users/u1/reviews/a/nested").is_child_of(&reviews));
        assert!(!DocPath::new("users/u1/reviewsx/a").is_child_of(&reviews));
        assert!(DocPath::course("u1", "c1").is_child_of(&DocPath::courses("u1")));
        assert!(!DocPath::quiz("u1", "c1", "q").is_child_of(&DocPath::courses("u1")));
    }
}
