//! Soft-deleted courses and quizzes.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::course::{Course, Quiz};

/// Default number of days a deleted item stays restorable.
pub const TRASH_RETENTION_DAYS: i64 = 30;

/// Kind of entity held in the trash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TrashKind {
    Course,
    Quiz,
}

/// Deep copy of the deleted entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum TrashEntity {
    Course(Course),
    Quiz(Quiz),
}

impl TrashEntity {
    pub fn kind(&self) -> TrashKind {
        match self {
            Self::Course(_) => TrashKind::Course,
            Self::Quiz(_) => TrashKind::Quiz,
        }
    }

    /// Id of the wrapped course or quiz.
    pub fn entity_id(&self) -> &str {
        match self {
            Self::Course(c) => &c.id,
            Self::Quiz(q) => &q.id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Self::Course(c) => &c.title,
            Self::Quiz(q) => &q.title,
        }
    }

    /// The wrapped course, if it is publicly listed.
    pub fn public_course(&self) -> Option<&Course> {
        match self {
            Self::Course(c) if c.is_public => Some(c),
            _ => None,
        }
    }
}

/// Where a deleted entity lived, used to put it back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginPath {
    /// Parent course for a quiz. `None` for a course at the library root.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
    /// Position inside the parent when deleted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

impl OriginPath {
    /// Origin of a course in the library.
    pub fn library(index: Option<usize>) -> Self {
        Self {
            course_id: None,
            index,
        }
    }

    /// Origin of a quiz inside a course.
    pub fn in_course(course_id: impl Into<String>, index: Option<usize>) -> Self {
        Self {
            course_id: Some(course_id.into()),
            index,
        }
    }
}

/// An entry in the trash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrashItem {
    pub id: String,
    #[serde(flatten)]
    pub entity: TrashEntity,
    pub origin_path: OriginPath,
    pub deleted_at: DateTime<Utc>,
    /// Fixed at deletion time. Items past this instant may be purged.
    pub expires_at: DateTime<Utc>,
}

impl TrashItem {
    /// Wrap a deleted entity, expiring `retention_days` after `now`.
    pub fn new(
        entity: TrashEntity,
        origin_path: OriginPath,
        now: DateTime<Utc>,
        retention_days: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            entity,
            origin_path,
            deleted_at: now,
            expires_at: now + Duration::days(retention_days),
        }
    }

    pub fn kind(&self) -> TrashKind {
        self.entity.kind()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
