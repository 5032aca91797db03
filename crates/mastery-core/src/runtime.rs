//! Per-session wiring of the sync engine and its background tasks.
//!
//! Owns the state store, the coordinator, the trash manager and the review
//! recorder, and starts/stops the remote change listener, the trash sweeper
//! and the network watcher together.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::MasteryConfig;
use crate::error::{MasteryError, MasteryResult};
use crate::events::EventBus;
use crate::srs::{ReviewRecorder, SrsScheduler};
use crate::state::AppStateStore;
use crate::stores::SqliteLocalStore;
use crate::sync::{LoadSource, RemoteChangeListener, SyncCoordinator};
use crate::traits::{Clock, LocalDurableStore, Marketplace, NetworkMonitor, RemoteStore, SystemClock};
use crate::trash::{TrashManager, TrashSweeper};
use crate::types::ReviewItem;

/// External services a session talks to.
#[derive(Clone)]
pub struct SessionCollaborators {
    pub remote: Arc<dyn RemoteStore>,
    pub local: Arc<dyn LocalDurableStore>,
    pub network: Arc<NetworkMonitor>,
    pub clock: Arc<dyn Clock>,
    pub marketplace: Option<Arc<dyn Marketplace>>,
}

impl SessionCollaborators {
    /// Collaborators with the system clock and no marketplace.
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        local: Arc<dyn LocalDurableStore>,
        network: Arc<NetworkMonitor>,
    ) -> Self {
        Self {
            remote,
            local,
            network,
            clock: Arc::new(SystemClock),
            marketplace: None,
        }
    }

    /// Use the SQLite local store at the configured path.
    pub fn with_sqlite(
        remote: Arc<dyn RemoteStore>,
        network: Arc<NetworkMonitor>,
        config: &MasteryConfig,
    ) -> MasteryResult<Self> {
        debug!(path = %config.local_db_path.display(), "Opening local store");
        let local = Arc::new(SqliteLocalStore::new(&config.local_db_path)?);
        Ok(Self::new(remote, local, network))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_marketplace(mut self, marketplace: Arc<dyn Marketplace>) -> Self {
        self.marketplace = Some(marketplace);
        self
    }
}

/// One user session.
///
/// # Example
///
/// ```ignore
/// use mastery_core::{MasteryConfig, SessionCollaborators, SessionRuntime};
///
/// let mut session = SessionRuntime::new(MasteryConfig::default(), collaborators);
/// session.start(Some("uid-123".to_string())).await?;
///
/// // ... the app edits state through session.coordinator() ...
///
/// session.shutdown().await?;
/// ```
pub struct SessionRuntime {
    config: MasteryConfig,
    collaborators: SessionCollaborators,
    store: Arc<AppStateStore>,
    events: EventBus,
    coordinator: Arc<SyncCoordinator>,
    trash: Arc<TrashManager>,
    recorder: ReviewRecorder,
    listener: Option<RemoteChangeListener>,
    sweeper: Option<TrashSweeper>,
    network_task: Option<JoinHandle<()>>,
}

impl SessionRuntime {
    /// Wire the components. Nothing runs until `start()`.
    pub fn new(config: MasteryConfig, collaborators: SessionCollaborators) -> Self {
        debug!(
            echo_detection = ?config.sync.echo_detection,
            sweep_interval = config.trash.sweep_interval_minutes,
            "Creating SessionRuntime"
        );

        let store = Arc::new(AppStateStore::new());
        let events = EventBus::new();
        let coordinator = Arc::new(SyncCoordinator::new(
            store.clone(),
            collaborators.remote.clone(),
            collaborators.local.clone(),
            collaborators.network.clone(),
            collaborators.clock.clone(),
            events.clone(),
            config.sync.clone(),
        ));
        let trash = Arc::new(TrashManager::new(
            coordinator.clone(),
            collaborators.marketplace.clone(),
            config.trash.clone(),
        ));
        let recorder = ReviewRecorder::new(
            collaborators.remote.clone(),
            collaborators.clock.clone(),
            SrsScheduler::with_config(&config.srs),
        );

        Self {
            config,
            collaborators,
            store,
            events,
            coordinator,
            trash,
            recorder,
            listener: None,
            sweeper: None,
            network_task: None,
        }
    }

    /// Load the user's state and start the background tasks.
    ///
    /// `None` starts a guest session, which has no remote listener.
    pub async fn start(&mut self, uid: Option<String>) -> MasteryResult<LoadSource> {
        self.stop().await;
        self.coordinator.set_user(uid.clone());

        let source = self.coordinator.load().await?;
        info!(uid = ?uid, ?source, "Session state loaded");

        if let Some(uid) = &uid {
            self.listener = Some(
                RemoteChangeListener::start(
                    self.collaborators.remote.clone(),
                    self.coordinator.clone(),
                    uid,
                )
                .await?,
            );
        }

        let sweeper = TrashSweeper::new(self.trash.clone())
            .await
            .map_err(|e| MasteryError::internal(format!("Failed to create trash sweeper: {}", e)))?;
        sweeper
            .start()
            .await
            .map_err(|e| MasteryError::internal(format!("Failed to start trash sweeper: {}", e)))?;
        self.sweeper = Some(sweeper);

        self.network_task = Some(self.watch_network());

        info!("Session started");
        Ok(source)
    }

    fn watch_network(&self) -> JoinHandle<()> {
        let mut transitions = self.collaborators.network.subscribe();
        let coordinator = self.coordinator.clone();
        tokio::spawn(async move {
            while transitions.changed().await.is_ok() {
                let online = *transitions.borrow_and_update();
                if !online {
                    debug!("Network went offline");
                    continue;
                }
                match coordinator.resume_online().await {
                    Ok(Some(outcome)) => debug!(?outcome, "Synced after reconnecting"),
                    Ok(None) => debug!("Back online, nothing to sync"),
                    Err(e) => warn!(error = %e, "Sync after reconnecting failed"),
                }
            }
        })
    }

    fn stop_listener(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            listener.stop();
        }
    }

    async fn stop(&mut self) {
        self.stop_listener();
        if let Some(task) = self.network_task.take() {
            task.abort();
        }
        if let Some(mut sweeper) = self.sweeper.take() {
            if let Err(e) = sweeper.shutdown().await {
                warn!(error = %e, "Failed to stop trash sweeper");
            }
        }
    }

    /// Switch to another account (or to guest mode).
    pub async fn switch_user(&mut self, uid: Option<String>) -> MasteryResult<LoadSource> {
        info!(from = ?self.coordinator.uid(), to = ?uid, "Switching user");
        self.stop_listener();
        self.coordinator.wait_until_idle().await;
        self.stop().await;
        self.store.clear();
        self.start(uid).await
    }

    /// Let the save in flight finish, then stop all background tasks.
    pub async fn shutdown(&mut self) -> MasteryResult<()> {
        debug!("Shutting down session");
        // No reload may start once the last save is waited for.
        self.stop_listener();
        self.coordinator.wait_until_idle().await;
        self.stop().await;
        info!("Session stopped");
        Ok(())
    }

    /// Record a review outcome for the signed-in user.
    pub async fn record_review(
        &self,
        item_id: &str,
        course_id: &str,
        was_correct: bool,
        allow_progression: bool,
    ) -> MasteryResult<ReviewItem> {
        let uid = self.coordinator.uid().ok_or_else(|| {
            MasteryError::validation_with_suggestion(
                "Review history is only kept for signed-in users",
                "Sign in to track reviews",
            )
        })?;
        self.recorder
            .record_outcome(&uid, item_id, course_id, was_correct, allow_progression)
            .await
    }

    pub fn is_listening(&self) -> bool {
        self.listener.as_ref().is_some_and(|l| l.is_running())
    }

    pub fn store(&self) -> &Arc<AppStateStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<SyncCoordinator> {
        &self.coordinator
    }

    pub fn trash(&self) -> &Arc<TrashManager> {
        &self.trash
    }

    pub fn recorder(&self) -> &ReviewRecorder {
        &self.recorder
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &MasteryConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::{InMemoryRemoteStore, MemoryLocalStore};
    use crate::traits::ManualClock;
    use chrono::Utc;

    fn session() -> (SessionRuntime, Arc<InMemoryRemoteStore>) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let remote = Arc::new(InMemoryRemoteStore::new(clock.clone()));
        let collaborators = SessionCollaborators::new(
            remote.clone(),
            Arc::new(MemoryLocalStore::new()),
            Arc::new(NetworkMonitor::new(true)),
        )
        .with_clock(clock);
        (SessionRuntime::new(MasteryConfig::default(), collaborators), remote)
    }

    #[tokio::test]
    async fn test_guest_session_has_no_listener() {
        let (mut session, _) = session();
        let source = session.start(None).await.unwrap();

        assert_eq!(source, LoadSource::Guest);
        assert!(!session.is_listening());
        assert!(session.record_review("q1", "c1", true, true).await.is_err());
        session.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_signed_in_session_start_and_shutdown() {
        let (mut session, _) = session();
        let source = session.start(Some("u1".to_string())).await.unwrap();

        assert_eq!(source, LoadSource::Empty);
        assert!(session.is_listening());

        let item = session.record_review("q1", "c1", true, true).await.unwrap();
        assert_eq!(item.interval, 1);

        session.shutdown().await.unwrap();
        assert!(!session.is_listening());
    }

    #[tokio::test]
    async fn test_switch_user_clears_previous_state() {
        let (mut session, _) = session();
        session.start(Some("u1".to_string())).await.unwrap();
        session
            .coordinator()
            .save_data(
                crate::types::AppStatePatch::new()
                    .with_courses(vec![crate::types::Course::new("c1", "Mine")]),
            )
            .await
            .unwrap();

        let source = session.switch_user(Some("u2".to_string())).await.unwrap();

        assert_eq!(source, LoadSource::Empty);
        assert!(session.store().courses().is_empty());
        assert_eq!(session.coordinator().uid().as_deref(), Some("u2"));
        session.shutdown().await.unwrap();
    }
}
