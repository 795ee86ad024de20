//! Bridge tracker
//!
//! The tracker:
//! 1. Starts one polling task per bridge hash while a view is open
//! 2. Advances both provider clients on a fixed interval
//! 3. Merges their stages into a human readable view
//! 4. Writes the record back whenever a client changed
//!
//! Polling stops when the view closes or the relay reaches a terminal
//! stage. Closing a view never cancels the bridge itself.

pub mod session;
pub mod view;

#[cfg(test)]
pub(crate) mod testing;

pub use session::BridgeSession;
pub use view::BridgeView;

use crate::error::{TrackerError, TrackerResult};
use crate::providers::ProviderFactory;
use crate::state::{lookup_or_placeholder, TransactionStore};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, Instrument};

/// Handle owned by the registry for one open view
struct WatchHandle {
    id: u64,
    /// The session polls while this is true
    active: watch::Sender<bool>,
    /// Closes once the session task has released its entry
    done: watch::Receiver<()>,
    /// Polling reached a terminal stage while the view stayed open
    ended: bool,
    task: JoinHandle<()>,
}

impl WatchHandle {
    fn is_open(&self) -> bool {
        *self.active.borrow()
    }

    fn is_polling(&self) -> bool {
        self.is_open() && !self.ended && !self.task.is_finished()
    }
}

type Sessions = Arc<DashMap<String, WatchHandle>>;
type Views = Arc<DashMap<String, BridgeView>>;

/// Registry of bridge sessions keyed by hash
pub struct BridgeTracker {
    store: Arc<dyn TransactionStore>,
    factory: Arc<dyn ProviderFactory>,
    poll_interval: Duration,
    chain_names: HashMap<u64, String>,
    sessions: Sessions,
    views: Views,
    next_id: AtomicU64,
}

impl BridgeTracker {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        factory: Arc<dyn ProviderFactory>,
        poll_interval: Duration,
        chain_names: HashMap<u64, String>,
    ) -> Self {
        Self {
            store,
            factory,
            poll_interval,
            chain_names,
            sessions: Arc::new(DashMap::new()),
            views: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Open a view on a bridge. Starts polling unless the view is already
    /// open. A session still finishing its last cycle after a close is
    /// awaited first, so at most one session advances a hash.
    pub async fn watch(&self, hash: &str) -> TrackerResult<BridgeView> {
        loop {
            if let Some(view) = self.reuse_or_wait(hash).await {
                return Ok(view);
            }

            let record = lookup_or_placeholder(self.store.as_ref(), hash).await?;
            if record.is_placeholder() {
                return Err(TrackerError::TransactionNotFound {
                    hash: hash.to_string(),
                });
            }

            let chain_name = self.chain_names.get(&record.src_chain_id).cloned();
            let session = BridgeSession::new(record, self.factory.as_ref(), chain_name);
            let initial_view = session.view();

            // another watch may have started a session while the record was loading
            let entry = match self.sessions.entry(hash.to_string()) {
                Entry::Occupied(entry) if !entry.get().task.is_finished() => continue,
                entry => entry,
            };

            self.views.insert(hash.to_string(), initial_view.clone());

            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let (active, active_rx) = watch::channel(true);
            let (done_tx, done) = watch::channel(());
            let task = tokio::spawn(
                {
                    let sessions = self.sessions.clone();
                    let views = self.views.clone();
                    let store = self.store.clone();
                    let poll_interval = self.poll_interval;
                    let hash = hash.to_string();
                    async move {
                        run_session(session, store, active_rx, poll_interval, views.clone())
                            .await;
                        release(&sessions, &views, &hash, id);
                        drop(done_tx);
                    }
                }
                .instrument(info_span!("bridge", hash = %hash)),
            );

            entry.insert(WatchHandle {
                id,
                active,
                done,
                ended: false,
                task,
            });
            crate::metrics::set_active_sessions(self.active_sessions());

            info!("Watching bridge transaction {}", hash);
            return Ok(initial_view);
        }
    }

    /// Returns the cached view when the view is already open. Waits for a
    /// closed session that is still finishing its cycle.
    async fn reuse_or_wait(&self, hash: &str) -> Option<BridgeView> {
        loop {
            let mut done = match self.sessions.get(hash) {
                Some(h) if h.is_open() && (h.ended || !h.task.is_finished()) => {
                    return Some(self.view(hash).unwrap_or_default());
                }
                Some(h) if !h.task.is_finished() => h.done.clone(),
                _ => return None,
            };

            debug!("Waiting for the previous session of {} to finish", hash);
            // errors once the session task dropped its sender
            let _ = done.changed().await;
        }
    }

    /// Close the view on a bridge. The current cycle finishes, no further
    /// cycle is scheduled. Returns false when no view was open.
    pub fn unwatch(&self, hash: &str) -> bool {
        let closed = match self.sessions.entry(hash.to_string()) {
            Entry::Occupied(entry) => {
                let was_open = entry.get().active.send_replace(false);
                if entry.get().ended || entry.get().task.is_finished() {
                    entry.remove();
                    self.views.remove(hash);
                }
                was_open
            }
            Entry::Vacant(_) => false,
        };

        if closed {
            info!("Stopped watching bridge transaction {}", hash);
        }
        crate::metrics::set_active_sessions(self.active_sessions());
        closed
    }

    /// Last rendered view for a hash
    pub fn view(&self, hash: &str) -> Option<BridgeView> {
        self.views.get(hash).map(|v| v.clone())
    }

    /// Whether a session for the hash is still polling
    pub fn is_polling(&self, hash: &str) -> bool {
        self.sessions
            .get(hash)
            .map(|h| h.is_polling())
            .unwrap_or(false)
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.iter().filter(|h| h.is_polling()).count()
    }

    /// Close every view and wait for in-flight cycles to finish
    pub async fn stop(&self) {
        let hashes: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let mut tasks = Vec::new();

        for hash in hashes {
            if let Some((_, handle)) = self.sessions.remove(&hash) {
                handle.active.send_replace(false);
                tasks.push(handle.task);
            }
        }

        futures::future::join_all(tasks).await;
        self.views.clear();
        crate::metrics::set_active_sessions(0);
        info!("Bridge tracker stopped");
    }
}

/// Drop a finished session from the registry. A view that is still open
/// keeps its entry and last rendered view until it is closed.
fn release(sessions: &Sessions, views: &Views, hash: &str, id: u64) {
    match sessions.entry(hash.to_string()) {
        Entry::Occupied(mut entry) if entry.get().id == id => {
            if entry.get().is_open() {
                entry.get_mut().ended = true;
            } else {
                views.remove(hash);
                entry.remove();
            }
        }
        // stopped, or the hash belongs to a newer session
        _ => {}
    }

    crate::metrics::set_active_sessions(sessions.iter().filter(|h| h.is_polling()).count());
}

/// Polling loop for one session. A cycle always runs to completion; the
/// active flag is only consulted between cycles.
async fn run_session(
    mut session: BridgeSession,
    store: Arc<dyn TransactionStore>,
    mut active: watch::Receiver<bool>,
    poll_interval: Duration,
    views: Views,
) {
    let hash = session.hash().to_string();

    loop {
        if !*active.borrow_and_update() {
            debug!("View closed, polling stopped");
            break;
        }

        let started = Instant::now();
        let outcome = session.advance(store.as_ref()).await;
        crate::metrics::record_cycle(started.elapsed().as_secs_f64());
        views.insert(hash.clone(), session.view());

        match outcome {
            Ok(outcome) if !outcome.reschedule => {
                info!("Bridge reached {:?}, polling stopped", session.relay_stage());
                break;
            }
            Ok(_) => {}
            Err(e) => error!("Bridge cycle failed: {}", e),
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            changed = active.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}
