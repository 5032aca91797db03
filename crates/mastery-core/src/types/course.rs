//! Course library types.
//!
//! A course owns an ordered list of quizzes and a quiz owns an ordered list
//! of questions. The tree has no cross references apart from
//! `original_author_id`, which only records where an imported course came from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single learning item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Unique identifier, also used as the SRS item id.
    pub id: String,
    /// Prompt shown to the learner.
    pub prompt: String,
    /// Answer options for choice questions. Empty for free-text questions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    /// The expected answer.
    pub answer: String,
    /// Optional explanation shown after answering.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl Question {
    /// Create a new question.
    pub fn new(id: impl Into<String>, prompt: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            options: Vec::new(),
            answer: answer.into(),
            explanation: None,
        }
    }

    /// Set answer options.
    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    /// Set the explanation.
    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }
}

/// An ordered set of questions inside a course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quiz {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Quiz {
    /// Create an empty quiz.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            questions: Vec::new(),
            created_at: None,
        }
    }

    /// Set the questions.
    pub fn with_questions(mut self, questions: Vec<Question>) -> Self {
        self.questions = questions;
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Find a question by id.
    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }
}

/// A folder of quizzes owned by one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub quizzes: Vec<Quiz>,
    /// Whether the course is listed on the public marketplace.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_public: bool,
    /// User who created this copy of the course.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    /// Author of the course this one was imported from. Blocks re-publishing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_author_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Course {
    /// Create an empty private course.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            quizzes: Vec::new(),
            is_public: false,
            author_id: None,
            original_author_id: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Set the quizzes.
    pub fn with_quizzes(mut self, quizzes: Vec<Quiz>) -> Self {
        self.quizzes = quizzes;
        self
    }

    /// Set the author.
    pub fn with_author(mut self, author_id: impl Into<String>) -> Self {
        self.author_id = Some(author_id.into());
        self
    }

    /// Mark the course as publicly listed.
    pub fn with_public(mut self, is_public: bool) -> Self {
        self.is_public = is_public;
        self
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Find a quiz by id.
    pub fn quiz(&self, quiz_id: &str) -> Option<&Quiz> {
        self.quizzes.iter().find(|q| q.id == quiz_id)
    }

    /// Find a quiz by id, mutably.
    pub fn quiz_mut(&mut self, quiz_id: &str) -> Option<&mut Quiz> {
        self.quizzes.iter_mut().find(|q| q.id == quiz_id)
    }

    /// Total number of questions across all quizzes.
    pub fn question_count(&self) -> usize {
        self.quizzes.iter().map(|q| q.questions.len()).sum()
    }
}
