//! Persistence of review records in the remote store.
//!
//! Each item's record lives at `users/{uid}/reviews/{itemId}`.

use std::sync::Arc;

use tracing::{debug, warn};

use super::scheduler::SrsScheduler;
use crate::error::MasteryResult;
use crate::traits::{Clock, DocPath, RemoteStore};
use crate::types::ReviewItem;

/// Reads, schedules and writes review records.
pub struct ReviewRecorder {
    remote: Arc<dyn RemoteStore>,
    clock: Arc<dyn Clock>,
    scheduler: SrsScheduler,
}

impl ReviewRecorder {
    pub fn new(remote: Arc<dyn RemoteStore>, clock: Arc<dyn Clock>, scheduler: SrsScheduler) -> Self {
        Self {
            remote,
            clock,
            scheduler,
        }
    }

    /// Load the record for an item, if any.
    ///
    /// A record that no longer parses is treated as missing.
    pub async fn load(&self, uid: &str, item_id: &str) -> MasteryResult<Option<ReviewItem>> {
        let Some(doc) = self.remote.get(&DocPath::review(uid, item_id)).await? else {
            return Ok(None);
        };
        match serde_json::from_value(doc.data) {
            Ok(item) => Ok(Some(item)),
            Err(e) => {
                warn!(item_id, error = %e, "Unreadable review record, starting fresh");
                Ok(None)
            }
        }
    }

    /// Record one review outcome and return the updated record.
    pub async fn record_outcome(
        &self,
        uid: &str,
        item_id: &str,
        course_id: &str,
        was_correct: bool,
        allow_progression: bool,
    ) -> MasteryResult<ReviewItem> {
        let prior = self.load(uid, item_id).await?;
        let now = self.clock.now();

        let (schedule, branch) = self.scheduler.next_review_with_branch(
            prior.as_ref(),
            was_correct,
            allow_progression,
            now,
        );
        let item = ReviewItem::from_schedule(item_id, course_id, &schedule, prior.as_ref(), now);

        self.remote
            .set(&DocPath::review(uid, item_id), serde_json::to_value(&item)?, false)
            .await?;

        debug!(
            item_id,
            ?branch,
            interval = item.interval,
            streak = item.streak,
            ease = item.ease_factor,
            "Review recorded"
        );
        Ok(item)
    }

    /// All records, unparseable ones skipped.
    pub async fn all_items(&self, uid: &str) -> MasteryResult<Vec<ReviewItem>> {
        let docs = self.remote.list_collection(&DocPath::reviews(uid)).await?;
        Ok(docs
            .into_iter()
            .filter_map(|doc| serde_json::from_value::<ReviewItem>(doc.data).ok())
            .collect())
    }

    /// Items due now, the most overdue first.
    pub async fn due_items(&self, uid: &str) -> MasteryResult<Vec<ReviewItem>> {
        let now = self.clock.now();
        let mut due: Vec<ReviewItem> = self
            .all_items(uid)
            .await?
            .into_iter()
            .filter(|item| item.is_due(now))
            .collect();
        due.sort_by(|a, b| {
            a.next_review_at
                .cmp(&b.next_review_at)
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        Ok(due)
    }

    /// Due items recorded under one course. Records whose course was
    /// deleted are still returned when asked for by that course id.
    pub async fn due_items_for_course(
        &self,
        uid: &str,
        course_id: &str,
    ) -> MasteryResult<Vec<ReviewItem>> {
        let mut due = self.due_items(uid).await?;
        due.retain(|item| item.course_id == course_id);
        Ok(due)
    }

    pub fn scheduler(&self) -> &SrsScheduler {
        &self.scheduler
    }
}
