//! Course and quiz export/import.
//!
//! Exports are self-contained JSON documents. Importing always produces a
//! private copy with fresh ids, so an import can never collide with or
//! overwrite the library it is imported into. Apart from ids and ownership
//! (`is_public`, `author_id`, `original_author_id`) the copy equals the
//! exported entity, timestamps included.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{MasteryError, MasteryResult};
use crate::types::{Course, Question, Quiz};

/// Current export format version.
pub const EXPORT_FORMAT_VERSION: u32 = 1;

/// An exported course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseExport {
    pub format_version: u32,
    pub exported_at: DateTime<Utc>,
    pub course: Course,
}

/// An exported quiz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizExport {
    pub format_version: u32,
    pub exported_at: DateTime<Utc>,
    pub quiz: Quiz,
}

fn check_version(version: u32) -> MasteryResult<()> {
    if version == 0 || version > EXPORT_FORMAT_VERSION {
        return Err(MasteryError::validation_with_suggestion(
            format!("Unsupported export format version {}", version),
            format!("Export the content again with format version {}", EXPORT_FORMAT_VERSION),
        ));
    }
    Ok(())
}

fn parse<T: serde::de::DeserializeOwned>(json: &str, what: &str) -> MasteryResult<T> {
    serde_json::from_str(json)
        .map_err(|e| MasteryError::parse(format!("Invalid {} export: {}", what, e)))
}

impl CourseExport {
    pub fn to_json(&self) -> MasteryResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> MasteryResult<Self> {
        let export: Self = parse(json, "course")?;
        check_version(export.format_version)?;
        Ok(export)
    }
}

impl QuizExport {
    pub fn to_json(&self) -> MasteryResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> MasteryResult<Self> {
        let export: Self = parse(json, "quiz")?;
        check_version(export.format_version)?;
        Ok(export)
    }
}

pub fn export_course(course: &Course, now: DateTime<Utc>) -> CourseExport {
    CourseExport {
        format_version: EXPORT_FORMAT_VERSION,
        exported_at: now,
        course: course.clone(),
    }
}

pub fn export_quiz(quiz: &Quiz, now: DateTime<Utc>) -> QuizExport {
    QuizExport {
        format_version: EXPORT_FORMAT_VERSION,
        exported_at: now,
        quiz: quiz.clone(),
    }
}

fn fresh_id() -> String {
    Uuid::new_v4().to_string()
}

fn copy_question(question: &Question) -> Question {
    Question {
        id: fresh_id(),
        ..question.clone()
    }
}

fn copy_quiz(quiz: &Quiz) -> Quiz {
    Quiz {
        id: fresh_id(),
        questions: quiz.questions.iter().map(copy_question).collect(),
        ..quiz.clone()
    }
}

/// Turn an export into a private course owned by `importer_uid`.
///
/// Courses authored by someone else remember that author in
/// `original_author_id`, which blocks publishing the copy.
pub fn import_course(export: &CourseExport, importer_uid: &str) -> Course {
    let source = &export.course;
    let original_author = source
        .original_author_id
        .clone()
        .or_else(|| source.author_id.clone())
        .filter(|author| author != importer_uid);

    let course = Course {
        id: fresh_id(),
        quizzes: source.quizzes.iter().map(copy_quiz).collect(),
        is_public: false,
        author_id: Some(importer_uid.to_string()),
        original_author_id: original_author,
        ..source.clone()
    };
    debug!(
        source_id = %source.id,
        course_id = %course.id,
        quizzes = course.quizzes.len(),
        "Imported course"
    );
    course
}

/// Turn an export into a quiz with fresh ids.
pub fn import_quiz(export: &QuizExport) -> Quiz {
    copy_quiz(&export.quiz)
}

/// Whether `uid` may list `course` on the marketplace.
pub fn can_publish(course: &Course, uid: &str) -> bool {
    let owns = course.author_id.as_deref().map_or(true, |author| author == uid);
    let imported = course
        .original_author_id
        .as_deref()
        .is_some_and(|original| original != uid);
    owns && !imported
}
