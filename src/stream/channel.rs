use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use crate::models::StreamEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PopError {
    #[error("no stream event arrived within the wait window")]
    TimedOut,
}

/// Ordered event queue between one session and its subscribers.
///
/// `push` never blocks or drops; `pop` waits at most the given timeout. The
/// channel owns both halves of the queue, so it never reports closure: a
/// consumer that has seen a terminal event and pops again simply times out.
pub struct StreamChannel {
    conversation_id: String,
    tx: mpsc::UnboundedSender<StreamEvent>,
    rx: Mutex<mpsc::UnboundedReceiver<StreamEvent>>,
    terminated_at: SyncMutex<Option<Instant>>,
}

impl StreamChannel {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            conversation_id: conversation_id.into(),
            tx,
            rx: Mutex::new(rx),
            terminated_at: SyncMutex::new(None),
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn push(&self, event: StreamEvent) {
        if event.is_terminal() {
            self.terminated_at.lock().get_or_insert_with(Instant::now);
        }
        // The receiver lives in `self`, so the send cannot fail.
        let _ = self.tx.send(event);
    }

    /// Waits for the next event. Time spent waiting for another consumer to
    /// release the queue counts against `timeout`.
    pub async fn pop(&self, timeout: Duration) -> Result<StreamEvent, PopError> {
        let next = async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        };
        match tokio::time::timeout(timeout, next).await {
            Ok(Some(event)) => Ok(event),
            Ok(None) | Err(_) => Err(PopError::TimedOut),
        }
    }

    /// Discards every queued event without waiting and returns how many were
    /// dropped. Nothing is drained while a consumer is attached.
    pub fn drain(&self) -> usize {
        let Ok(mut rx) = self.rx.try_lock() else {
            warn!(conversation_id = %self.conversation_id, "Channel busy, skipping drain");
            return 0;
        };
        let mut dropped = 0;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        dropped
    }

    /// When the terminal event was pushed, if it has been.
    pub fn terminated_at(&self) -> Option<Instant> {
        *self.terminated_at.lock()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated_at().is_some()
    }

    /// Terminated with nothing left to read. A channel with an attached
    /// consumer is never exhausted.
    pub fn is_exhausted(&self) -> bool {
        if !self.is_terminated() {
            return false;
        }
        match self.rx.try_lock() {
            Ok(rx) => rx.is_empty(),
            Err(_) => false,
        }
    }
}

/// Write side handed to a session.
///
/// `done` and `fail` consume the publisher, so a session can emit at most one
/// terminal event. A publisher dropped without finishing (for example by a
/// panicking task) emits an `Error` so subscribers are not left waiting.
pub struct EventPublisher {
    channel: Arc<StreamChannel>,
    finished: bool,
}

impl EventPublisher {
    pub fn new(channel: Arc<StreamChannel>) -> Self {
        Self { channel, finished: false }
    }

    pub fn token(&self, text: impl Into<String>) {
        self.channel.push(StreamEvent::token(text));
    }

    pub fn done(self) {
        self.finish(StreamEvent::Done);
    }

    pub fn fail(self, message: impl Into<String>) {
        self.finish(StreamEvent::error(message));
    }

    fn finish(mut self, event: StreamEvent) {
        self.channel.push(event);
        self.finished = true;
    }
}

impl Drop for EventPublisher {
    fn drop(&mut self) {
        if !self.finished {
            warn!(conversation_id = %self.channel.conversation_id, "Session ended without a terminal event");
            self.channel.push(StreamEvent::error("La generazione si è interrotta inaspettatamente"));
        }
    }
}
