use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::channel::{EventPublisher, StreamChannel};
use super::session::SessionOutcome;

struct SessionEntry {
    channel: Arc<StreamChannel>,
    cancel: CancellationToken,
    task: JoinHandle<SessionOutcome>,
}

impl SessionEntry {
    fn is_expired(&self, retention: Duration) -> bool {
        self.channel
            .terminated_at()
            .is_some_and(|at| at.elapsed() >= retention)
    }
}

/// Process-wide map from conversation id to its current stream.
///
/// At most one session per conversation is live: starting a new one cancels
/// the previous session and drains its channel before the replacement is
/// installed, all under the same lock.
pub struct SessionRegistry {
    entries: Mutex<HashMap<String, SessionEntry>>,
    installed: Notify,
    retention: Duration,
}

impl SessionRegistry {
    /// `retention` is how long a finished stream stays reachable for
    /// reconnecting subscribers.
    pub fn new(retention: Duration) -> Self {
        Self { entries: Mutex::new(HashMap::new()), installed: Notify::new(), retention }
    }

    /// Installs a fresh channel for `conversation_id` and spawns the session
    /// built by `factory` on it, superseding any previous stream.
    pub fn start_session<F, Fut>(&self, conversation_id: &str, factory: F) -> Arc<StreamChannel>
    where
        F: FnOnce(EventPublisher, CancellationToken) -> Fut,
        Fut: Future<Output = SessionOutcome> + Send + 'static,
    {
        let channel = Arc::new(StreamChannel::new(conversation_id));
        let cancel = CancellationToken::new();
        {
            let mut entries = self.entries.lock();
            Self::evict_expired_locked(&mut entries, self.retention);

            if let Some(previous) = entries.remove(conversation_id) {
                previous.cancel.cancel();
                let dropped = previous.channel.drain();
                info!(conversation_id = %conversation_id, dropped, "Superseding previous stream");
            }

            let session = factory(EventPublisher::new(Arc::clone(&channel)), cancel.clone());
            let task = tokio::spawn(session);
            entries.insert(
                conversation_id.to_string(),
                SessionEntry { channel: Arc::clone(&channel), cancel, task },
            );
        }
        self.installed.notify_waiters();
        channel
    }

    pub fn channel(&self, conversation_id: &str) -> Option<Arc<StreamChannel>> {
        self.entries
            .lock()
            .get(conversation_id)
            .map(|entry| Arc::clone(&entry.channel))
    }

    /// Channel that still has events to deliver, waiting up to `grace` for a
    /// stream that is about to be started. A finished stream whose events
    /// were all read counts as absent, so the next turn is awaited instead.
    pub async fn wait_for_channel(
        &self,
        conversation_id: &str,
        grace: Duration,
    ) -> Option<Arc<StreamChannel>> {
        let deadline = Instant::now() + grace;
        loop {
            let notified = self.installed.notified();
            tokio::pin!(notified);
            // Register interest before looking, so an install in between is not missed.
            notified.as_mut().enable();

            if let Some(channel) = self.readable_channel(conversation_id) {
                return Some(channel);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                debug!(conversation_id = %conversation_id, "No stream registered within grace period");
                return self.readable_channel(conversation_id);
            }
        }
    }

    fn readable_channel(&self, conversation_id: &str) -> Option<Arc<StreamChannel>> {
        self.channel(conversation_id).filter(|channel| !channel.is_exhausted())
    }

    /// Signals the live session of `conversation_id` to stop. Returns whether
    /// a running session was found.
    pub fn cancel(&self, conversation_id: &str) -> bool {
        let entries = self.entries.lock();
        match entries.get(conversation_id) {
            Some(entry) if !entry.task.is_finished() => {
                entry.cancel.cancel();
                info!(conversation_id = %conversation_id, "Stream cancellation requested");
                true
            }
            _ => false,
        }
    }

    pub fn is_running(&self, conversation_id: &str) -> bool {
        self.entries
            .lock()
            .get(conversation_id)
            .is_some_and(|entry| !entry.task.is_finished())
    }

    /// Drops streams that finished longer than the retention period ago.
    pub fn evict_expired(&self) -> usize {
        Self::evict_expired_locked(&mut self.entries.lock(), self.retention)
    }

    fn evict_expired_locked(entries: &mut HashMap<String, SessionEntry>, retention: Duration) -> usize {
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(retention));
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, "Evicted finished streams");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancels every session and waits for their tasks to finish.
    pub async fn shutdown(&self) {
        let entries: Vec<(String, SessionEntry)> = self.entries.lock().drain().collect();
        for (_, entry) in &entries {
            entry.cancel.cancel();
        }
        for (conversation_id, entry) in entries {
            match entry.task.await {
                Ok(outcome) => debug!(conversation_id = %conversation_id, ?outcome, "Session stopped"),
                Err(e) => warn!(conversation_id = %conversation_id, "Session task failed: {e}"),
            }
        }
    }
}
