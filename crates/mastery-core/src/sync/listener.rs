//! Background consumption of remote change notifications.

use futures::StreamExt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::coordinator::{ChangeDecision, SyncCoordinator};
use crate::error::MasteryResult;
use crate::traits::{DocPath, RemoteStore};

/// Watches the user's root document and hands each change to the coordinator.
///
/// Notifications are processed one at a time on a dedicated task, so a
/// reload never overlaps another reload.
pub struct RemoteChangeListener {
    uid: String,
    handle: Option<JoinHandle<()>>,
}

impl RemoteChangeListener {
    /// Subscribe to `users/{uid}` and start processing notifications.
    pub async fn start(
        remote: Arc<dyn RemoteStore>,
        coordinator: Arc<SyncCoordinator>,
        uid: &str,
    ) -> MasteryResult<Self> {
        let path = DocPath::user_root(uid);
        let mut changes = remote.subscribe(&path).await?;
        info!(path = %path, "Listening for remote changes");

        let handle = tokio::spawn(async move {
            while let Some(change) = changes.next().await {
                match coordinator.handle_remote_change(change).await {
                    Ok(ChangeDecision::Reloaded) => debug!("Remote change applied"),
                    Ok(decision) => debug!(?decision, "Remote change skipped"),
                    Err(e) => warn!(error = %e, "Failed to apply remote change"),
                }
            }
            debug!("Remote change stream ended");
        });

        Ok(Self {
            uid: uid.to_string(),
            handle: Some(handle),
        })
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Unsubscribe. Dropping the listener has the same effect.
    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            info!(uid = %self.uid, "Stopped listening for remote changes");
        }
    }
}

impl Drop for RemoteChangeListener {
    fn drop(&mut self) {
        self.stop();
    }
}
