//! Soft deletion and restoration of courses and quizzes.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};

use crate::config::TrashConfig;
use crate::error::{MasteryError, MasteryResult};
use crate::events::SyncEvent;
use crate::sync::SyncCoordinator;
use crate::traits::Marketplace;
use crate::types::{AppStatePatch, Course, OriginPath, TrashEntity, TrashItem, TrashKind};

/// What a restore did.
#[derive(Debug, Clone, PartialEq)]
pub struct RestoreReport {
    /// Id of the trash entry that was restored.
    pub trash_id: String,
    pub kind: TrashKind,
    /// Id the entity has in the library now.
    pub restored_id: String,
    /// Course a restored quiz was put into.
    pub course_id: Option<String>,
    /// The entity got a fresh id because its old one was taken.
    pub id_reassigned: bool,
    /// Set when the quiz had to go into the fallback course.
    pub warning: Option<String>,
}

/// Outcome of an expiry sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub removed: usize,
    /// The previous sweep was too recent; nothing was checked.
    pub skipped: bool,
}

/// Moves entities between the course library and the trash.
///
/// Every change is persisted through the [`SyncCoordinator`]. Marketplace
/// unlisting is best-effort: failures are logged and never stop a deletion.
pub struct TrashManager {
    coordinator: Arc<SyncCoordinator>,
    marketplace: Option<Arc<dyn Marketplace>>,
    config: TrashConfig,
    last_sweep: Mutex<Option<DateTime<Utc>>>,
}

impl TrashManager {
    pub fn new(
        coordinator: Arc<SyncCoordinator>,
        marketplace: Option<Arc<dyn Marketplace>>,
        config: TrashConfig,
    ) -> Self {
        Self {
            coordinator,
            marketplace,
            config,
            last_sweep: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &TrashConfig {
        &self.config
    }

    fn now(&self) -> DateTime<Utc> {
        self.coordinator.clock().now()
    }

    /// Current trash contents.
    pub fn items(&self) -> Vec<TrashItem> {
        self.coordinator.store().trash()
    }

    async fn unlist(&self, course: &Course) {
        let Some(marketplace) = &self.marketplace else {
            return;
        };
        match marketplace.unlist(&course.id).await {
            Ok(()) => debug!(course_id = %course.id, "Unlisted course"),
            Err(e) => warn!(course_id = %course.id, error = %e, "Failed to unlist course"),
        }
    }

    async fn unlist_all(&self, items: &[TrashItem]) {
        for item in items {
            if let Some(course) = item.entity.public_course() {
                self.unlist(course).await;
            }
        }
    }

    /// Remove an entity from the library and keep a copy in the trash.
    ///
    /// The position recorded in `origin` is replaced by the entity's actual
    /// position when it is found in the library. Returns the new trash list.
    pub async fn move_to_trash(
        &self,
        entity: TrashEntity,
        origin: OriginPath,
    ) -> MasteryResult<Vec<TrashItem>> {
        if matches!(entity, TrashEntity::Quiz(_)) && origin.course_id.is_none() {
            return Err(MasteryError::validation_with_suggestion(
                "A quiz can only be trashed from a course",
                "Pass the id of the course the quiz belongs to",
            ));
        }
        if let Some(course) = entity.public_course() {
            self.unlist(course).await;
        }

        let now = self.now();
        let retention_days = self.config.retention_days;
        let (trash, saved) = self
            .coordinator
            .save_with(|state| {
                let mut courses = state.courses.clone();
                let origin = match &entity {
                    TrashEntity::Course(course) => {
                        let index = courses.iter().position(|c| c.id == course.id);
                        if let Some(i) = index {
                            courses.remove(i);
                        }
                        OriginPath::library(index.or(origin.index))
                    }
                    TrashEntity::Quiz(quiz) => {
                        let course_id = origin.course_id.clone().unwrap_or_default();
                        let index = courses
                            .iter_mut()
                            .find(|c| c.id == course_id)
                            .and_then(|course| {
                                let i = course.quizzes.iter().position(|q| q.id == quiz.id)?;
                                course.quizzes.remove(i);
                                Some(i)
                            });
                        OriginPath::in_course(course_id, index.or(origin.index))
                    }
                };

                let item = TrashItem::new(entity, origin, now, retention_days);
                info!(
                    trash_id = %item.id,
                    kind = %item.kind(),
                    entity_id = item.entity.entity_id(),
                    "Moved to trash"
                );
                let mut trash = state.trash.clone();
                trash.push(item);
                let patch = AppStatePatch::new()
                    .with_courses(courses)
                    .with_trash(trash.clone());
                Ok((patch, trash))
            })
            .await?;
        saved?;
        Ok(trash)
    }

    /// Put a trashed entity back where it came from.
    ///
    /// Unknown or expired ids fail with [`MasteryError::NotFound`] and leave
    /// everything untouched.
    pub async fn restore_from_trash(&self, trash_id: &str) -> MasteryResult<RestoreReport> {
        let now = self.now();
        let fallback_title = &self.config.fallback_course_title;
        let (report, saved) = self
            .coordinator
            .save_with(|state| {
                let mut trash = state.trash.clone();
                let position = trash
                    .iter()
                    .position(|t| t.id == trash_id && !t.is_expired(now))
                    .ok_or_else(|| MasteryError::not_found("Trash item", trash_id))?;
                let item = trash.remove(position);
                let mut courses = state.courses.clone();
                let report = restore_into(&mut courses, item, fallback_title, now);
                let patch = AppStatePatch::new().with_courses(courses).with_trash(trash);
                Ok((patch, report))
            })
            .await?;

        if let Some(warning) = &report.warning {
            warn!(trash_id, "{}", warning);
            self.coordinator.events().emit(SyncEvent::TrashWarning {
                message: warning.clone(),
            });
        }
        info!(trash_id, kind = %report.kind, restored_id = %report.restored_id, "Restored from trash");
        saved?;
        Ok(report)
    }

    /// Permanently remove one trash entry.
    pub async fn delete_from_trash(&self, trash_id: &str) -> MasteryResult<Vec<TrashItem>> {
        let ((removed, trash), saved) = self
            .coordinator
            .save_with(|state| {
                let mut trash = state.trash.clone();
                let position = trash
                    .iter()
                    .position(|t| t.id == trash_id)
                    .ok_or_else(|| MasteryError::not_found("Trash item", trash_id))?;
                let removed = trash.remove(position);
                Ok((AppStatePatch::new().with_trash(trash.clone()), (removed, trash)))
            })
            .await?;
        info!(trash_id, "Deleted from trash");

        self.unlist_all(std::slice::from_ref(&removed)).await;
        saved?;
        Ok(trash)
    }

    /// Permanently remove everything in the trash. Returns how many entries went.
    pub async fn empty_trash(&self) -> MasteryResult<usize> {
        if self.items().is_empty() {
            return Ok(0);
        }
        let (removed, saved) = self
            .coordinator
            .save_with(|state| Ok((AppStatePatch::new().with_trash(Vec::new()), state.trash.clone())))
            .await?;
        info!(count = removed.len(), "Emptied trash");

        self.unlist_all(&removed).await;
        saved?;
        Ok(removed.len())
    }

    /// Purge entries past their expiry.
    ///
    /// Runs at most once per `min_sweep_gap_secs`; calls inside that gap
    /// report `skipped`.
    pub async fn sweep_expired(&self) -> MasteryResult<SweepReport> {
        let now = self.now();
        {
            let mut last = self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner);
            let gap = Duration::seconds(self.config.min_sweep_gap_secs);
            if last.is_some_and(|at| now - at < gap) {
                debug!("Trash sweep skipped, ran recently");
                return Ok(SweepReport {
                    removed: 0,
                    skipped: true,
                });
            }
            *last = Some(now);
        }

        if !self.items().iter().any(|t| t.is_expired(now)) {
            return Ok(SweepReport::default());
        }

        let (expired, saved) = self
            .coordinator
            .save_with(|state| {
                let (expired, kept): (Vec<_>, Vec<_>) =
                    state.trash.iter().cloned().partition(|t| t.is_expired(now));
                Ok((AppStatePatch::new().with_trash(kept), expired))
            })
            .await?;
        info!(removed = expired.len(), "Purged expired trash");
        self.coordinator
            .events()
            .emit(SyncEvent::TrashExpired {
                count: expired.len(),
            });

        self.unlist_all(&expired).await;
        saved?;
        Ok(SweepReport {
            removed: expired.len(),
            skipped: false,
        })
    }
}

/// Re-insert a trashed entity into `courses` and describe where it went.
fn restore_into(
    courses: &mut Vec<Course>,
    item: TrashItem,
    fallback_title: &str,
    now: DateTime<Utc>,
) -> RestoreReport {
    let mut report = RestoreReport {
        trash_id: item.id.clone(),
        kind: item.kind(),
        restored_id: item.entity.entity_id().to_string(),
        course_id: None,
        id_reassigned: false,
        warning: None,
    };

    match item.entity {
        TrashEntity::Course(mut course) => {
            // Its listing was removed when it was trashed.
            course.is_public = false;
            if courses.iter().any(|c| c.id == course.id) {
                course.id = uuid::Uuid::new_v4().to_string();
                report.id_reassigned = true;
            }
            let index = item.origin_path.index.unwrap_or(courses.len()).min(courses.len());
            report.restored_id = course.id.clone();
            courses.insert(index, course);
        }
        TrashEntity::Quiz(mut quiz) => {
            if courses.iter().flat_map(|c| &c.quizzes).any(|q| q.id == quiz.id) {
                quiz.id = uuid::Uuid::new_v4().to_string();
                report.id_reassigned = true;
            }
            let original = item
                .origin_path
                .course_id
                .as_deref()
                .and_then(|id| courses.iter().position(|c| c.id == id));

            let (course_index, quiz_index) = match original {
                Some(ci) => (ci, item.origin_path.index),
                None => {
                    let ci = match courses.iter().position(|c| c.title == fallback_title) {
                        Some(ci) => ci,
                        None => {
                            let mut fallback =
                                Course::new(uuid::Uuid::new_v4().to_string(), fallback_title);
                            fallback.created_at = Some(now);
                            courses.push(fallback);
                            courses.len() - 1
                        }
                    };
                    report.warning = Some(format!(
                        "The course of \"{}\" no longer exists, so it was restored into \"{}\".",
                        quiz.title, fallback_title
                    ));
                    (ci, None)
                }
            };

            let course = &mut courses[course_index];
            let at = quiz_index
                .unwrap_or(course.quizzes.len())
                .min(course.quizzes.len());
            report.restored_id = quiz.id.clone();
            report.course_id = Some(course.id.clone());
            course.quizzes.insert(at, quiz);
        }
    }
    report
}
