//! In-process remote document store.
//!
//! Behaves like the hosted store as far as the sync engine can tell: writes
//! get a server timestamp, subscribers are notified of every write to the
//! document they watch, and merge writes only touch top-level fields. Tests
//! can inject failures and hold reads or writes open to observe in-flight
//! behavior.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, watch};
use tracing::{trace, warn};

use crate::error::{MasteryError, MasteryResult, RemoteErrorCode};
use crate::traits::{Clock, DocPath, Document, RemoteChange, RemoteStore, RemoteSubscription};

/// Notification channel capacity.
const CHANGE_CAPACITY: usize = 256;

/// A failure to return from an upcoming write.
#[derive(Debug, Clone, PartialEq)]
enum InjectedFailure {
    Remote(RemoteErrorCode, String),
    Network(String),
}

impl InjectedFailure {
    fn into_error(self) -> MasteryError {
        match self {
            Self::Remote(code, message) => MasteryError::remote(code, message),
            Self::Network(message) => MasteryError::network(message),
        }
    }
}

#[derive(Default)]
struct Inner {
    docs: BTreeMap<DocPath, Document>,
    writes: Vec<Document>,
    attempts: usize,
    failures: VecDeque<InjectedFailure>,
}

/// Remote store held entirely in memory.
pub struct InMemoryRemoteStore {
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
    changes: broadcast::Sender<RemoteChange>,
    gate: watch::Sender<bool>,
    blocked: watch::Sender<usize>,
    read_gate: watch::Sender<bool>,
    blocked_reads: watch::Sender<usize>,
}

impl InMemoryRemoteStore {
    /// Create an empty store stamping writes with `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        let (gate, _) = watch::channel(true);
        let (blocked, _) = watch::channel(0);
        let (read_gate, _) = watch::channel(true);
        let (blocked_reads, _) = watch::channel(0);
        Self {
            clock,
            inner: Mutex::new(Inner::default()),
            changes,
            gate,
            blocked,
            read_gate,
            blocked_reads,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `count` write attempts with a remote status code.
    pub fn fail_next(&self, count: usize, code: RemoteErrorCode) {
        let mut inner = self.lock();
        for _ in 0..count {
            inner.failures.push_back(InjectedFailure::Remote(
                code,
                format!("injected {} failure", code),
            ));
        }
    }

    /// Fail the next `count` write attempts with a transport error.
    pub fn fail_next_network(&self, count: usize) {
        let mut inner = self.lock();
        for _ in 0..count {
            inner
                .failures
                .push_back(InjectedFailure::Network("connection reset".to_string()));
        }
    }

    /// Make writes wait until [`release_writes`](Self::release_writes).
    pub fn hold_writes(&self) {
        self.gate.send_replace(false);
    }

    /// Let held and future writes through.
    pub fn release_writes(&self) {
        self.gate.send_replace(true);
    }

    /// Number of writes currently waiting on a held gate.
    pub fn blocked_writes(&self) -> usize {
        *self.blocked.borrow()
    }

    /// Wait until at least one write is parked on the gate.
    pub async fn wait_for_blocked_write(&self) {
        let mut rx = self.blocked.subscribe();
        let _ = rx.wait_for(|n| *n > 0).await;
    }

    /// Make document reads wait until [`release_reads`](Self::release_reads).
    pub fn hold_reads(&self) {
        self.read_gate.send_replace(false);
    }

    pub fn release_reads(&self) {
        self.read_gate.send_replace(true);
    }

    pub fn blocked_reads(&self) -> usize {
        *self.blocked_reads.borrow()
    }

    /// Wait until at least one read is parked on the gate.
    pub async fn wait_for_blocked_read(&self) {
        let mut rx = self.blocked_reads.subscribe();
        let _ = rx.wait_for(|n| *n > 0).await;
    }

    /// Successful writes, oldest first.
    pub fn writes(&self) -> Vec<Document> {
        self.lock().writes.clone()
    }

    /// Successful writes to one document.
    pub fn writes_to(&self, path: &DocPath) -> Vec<Document> {
        self.lock()
            .writes
            .iter()
            .filter(|doc| &doc.path == path)
            .cloned()
            .collect()
    }

    pub fn write_count(&self) -> usize {
        self.lock().writes.len()
    }

    /// Write attempts, including failed ones.
    pub fn attempt_count(&self) -> usize {
        self.lock().attempts
    }

    /// Current contents of a document.
    pub fn document(&self, path: &DocPath) -> Option<Document> {
        self.lock().docs.get(path).cloned()
    }

    /// Delete a document and notify subscribers.
    pub fn remove(&self, path: &DocPath) {
        let removed = self.lock().docs.remove(path);
        if removed.is_some() {
            self.publish(RemoteChange {
                path: path.clone(),
                written_at: self.clock.now(),
                data: None,
            });
        }
    }

    /// Deliver a notification as if the server had sent it.
    ///
    /// The stored documents are not touched.
    pub fn inject_change(&self, change: RemoteChange) {
        self.publish(change);
    }

    fn publish(&self, change: RemoteChange) {
        trace!(path = %change.path, "Publishing remote change");
        let _ = self.changes.send(change);
    }
}

/// Counts a caller parked on a gate until it leaves, even by cancellation.
struct Parked<'a>(&'a watch::Sender<usize>);

impl<'a> Parked<'a> {
    fn enter(counter: &'a watch::Sender<usize>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self(counter)
    }
}

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

async fn pass_gate(gate: &watch::Sender<bool>, blocked: &watch::Sender<usize>) {
    let mut gate = gate.subscribe();
    if *gate.borrow_and_update() {
        return;
    }
    let _parked = Parked::enter(blocked);
    let _ = gate.wait_for(|open| *open).await;
}

fn merge_top_level(existing: Option<Value>, incoming: Value) -> Value {
    match (existing, incoming) {
        (Some(Value::Object(mut base)), Value::Object(fields)) => {
            for (key, value) in fields {
                base.insert(key, value);
            }
            Value::Object(base)
        }
        (_, incoming) => incoming,
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn get(&self, path: &DocPath) -> MasteryResult<Option<Document>> {
        pass_gate(&self.read_gate, &self.blocked_reads).await;
        Ok(self.document(path))
    }

    async fn set(&self, path: &DocPath, data: Value, merge: bool) -> MasteryResult<DateTime<Utc>> {
        pass_gate(&self.gate, &self.blocked).await;

        let doc = {
            let mut inner = self.lock();
            inner.attempts += 1;
            if let Some(failure) = inner.failures.pop_front() {
                return Err(failure.into_error());
            }

            let written_at = self.clock.now();
            let data = if merge {
                merge_top_level(inner.docs.get(path).map(|d| d.data.clone()), data)
            } else {
                data
            };
            let doc = Document {
                path: path.clone(),
                data,
                written_at,
            };
            inner.docs.insert(path.clone(), doc.clone());
            inner.writes.push(doc.clone());
            doc
        };

        self.publish(RemoteChange {
            path: doc.path,
            written_at: doc.written_at,
            data: Some(doc.data),
        });
        Ok(doc.written_at)
    }

    async fn subscribe(&self, path: &DocPath) -> MasteryResult<RemoteSubscription> {
        let receiver = self.changes.subscribe();
        let path = path.clone();
        let changes = stream::unfold(receiver, move |mut receiver| {
            let path = path.clone();
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(change) if change.path == path => return Some((change, receiver)),
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Closed) => return None,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Remote change subscriber lagged by {} notifications", n);
                            continue;
                        }
                    }
                }
            }
        });
        Ok(changes.boxed())
    }

    async fn list_collection(&self, path: &DocPath) -> MasteryResult<Vec<Document>> {
        Ok(self
            .lock()
            .docs
            .values()
            .filter(|doc| doc.path.is_child_of(path))
            .cloned()
            .collect())
    }
}
