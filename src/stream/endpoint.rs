use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, Stream};
use tracing::{debug, info, warn};

use super::channel::{PopError, StreamChannel};
use super::registry::SessionRegistry;
use crate::models::StreamEvent;

#[derive(Debug, Clone, Copy)]
pub struct RelayConfig {
    /// How long to wait for a stream that has not been registered yet.
    pub attach_grace: Duration,
    /// Silence after which the relay gives up and reports `Done`.
    pub idle_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { attach_grace: Duration::from_secs(5), idle_timeout: Duration::from_secs(60) }
    }
}

enum RelayState {
    Attaching(Arc<SessionRegistry>, String),
    Relaying(Arc<StreamChannel>),
    Finished,
}

/// Events of the current stream of `conversation_id`, ending right after the
/// first terminal event.
///
/// A stream that never shows up yields a single `Error`; an idle one yields a
/// synthesized `Done`.
pub fn relay_events(
    registry: Arc<SessionRegistry>,
    conversation_id: String,
    config: RelayConfig,
) -> impl Stream<Item = StreamEvent> + Send + 'static {
    stream::unfold(
        RelayState::Attaching(registry, conversation_id),
        move |state| async move {
            match state {
                RelayState::Attaching(registry, conversation_id) => {
                    match registry.wait_for_channel(&conversation_id, config.attach_grace).await {
                        Some(channel) => {
                            debug!(conversation_id = %conversation_id, "Subscriber attached");
                            next_event(channel, config.idle_timeout).await
                        }
                        None => {
                            warn!(conversation_id = %conversation_id, "No stream to attach to");
                            let event = StreamEvent::error(format!(
                                "Nessuno stream attivo per la conversazione {conversation_id}"
                            ));
                            Some((event, RelayState::Finished))
                        }
                    }
                }
                RelayState::Relaying(channel) => next_event(channel, config.idle_timeout).await,
                RelayState::Finished => None,
            }
        },
    )
}

async fn next_event(
    channel: Arc<StreamChannel>,
    idle_timeout: Duration,
) -> Option<(StreamEvent, RelayState)> {
    match channel.pop(idle_timeout).await {
        Ok(event) if event.is_terminal() => Some((event, RelayState::Finished)),
        Ok(event) => Some((event, RelayState::Relaying(channel))),
        Err(PopError::TimedOut) => {
            info!(conversation_id = %channel.conversation_id(), "Stream idle, closing subscriber");
            Some((StreamEvent::Done, RelayState::Finished))
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use pretty_assertions::assert_eq;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::stream::channel::EventPublisher;
    use crate::stream::session::SessionOutcome;

    fn fast() -> RelayConfig {
        RelayConfig { attach_grace: Duration::from_millis(100), idle_timeout: Duration::from_millis(100) }
    }

    async fn say(publisher: EventPublisher, _cancel: CancellationToken, words: Vec<&'static str>) -> SessionOutcome {
        for word in words {
            publisher.token(word);
        }
        publisher.done();
        SessionOutcome::Completed
    }

    async fn stall(publisher: EventPublisher, cancel: CancellationToken) -> SessionOutcome {
        publisher.token("inizio");
        cancel.cancelled().await;
        publisher.done();
        SessionOutcome::Cancelled
    }

    #[tokio::test]
    async fn relays_until_done() {
        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(60)));
        registry.start_session("c1", |p, c| say(p, c, vec!["uno ", "due"]));

        let events: Vec<StreamEvent> = relay_events(registry, "c1".into(), fast()).collect().await;
        assert_eq!(
            events,
            vec![StreamEvent::token("uno "), StreamEvent::token("due"), StreamEvent::Done]
        );
    }

    #[tokio::test]
    async fn missing_stream_yields_single_error() {
        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(60)));

        let events: Vec<StreamEvent> = relay_events(registry, "nope".into(), fast()).collect().await;
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], StreamEvent::Error { text } if text.contains("nope")));
    }

    #[tokio::test]
    async fn idle_stream_is_closed_with_done() {
        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(60)));
        registry.start_session("c1", stall);

        let events: Vec<StreamEvent> = tokio::time::timeout(
            Duration::from_secs(2),
            relay_events(Arc::clone(&registry), "c1".into(), fast()).collect(),
        )
        .await
        .expect("relay hung on an idle stream");

        assert_eq!(events, vec![StreamEvent::token("inizio"), StreamEvent::Done]);
        assert!(registry.cancel("c1"));
    }

    #[tokio::test]
    async fn subscriber_may_attach_before_the_stream_starts() {
        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(60)));
        let relay = tokio::spawn(
            relay_events(Arc::clone(&registry), "c1".into(), fast()).collect::<Vec<_>>(),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.start_session("c1", |p, c| say(p, c, vec!["ciao"]));

        assert_eq!(relay.await.unwrap(), vec![StreamEvent::token("ciao"), StreamEvent::Done]);
    }

    #[tokio::test]
    async fn second_turn_subscriber_waits_for_the_new_stream() {
        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(60)));
        registry.start_session("c1", |p, c| say(p, c, vec!["turno1"]));
        let first: Vec<StreamEvent> =
            relay_events(Arc::clone(&registry), "c1".into(), fast()).collect().await;
        assert_eq!(first, vec![StreamEvent::token("turno1"), StreamEvent::Done]);

        let relay = tokio::spawn(
            relay_events(Arc::clone(&registry), "c1".into(), fast()).collect::<Vec<_>>(),
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.start_session("c1", |p, c| say(p, c, vec!["turno2"]));

        assert_eq!(relay.await.unwrap(), vec![StreamEvent::token("turno2"), StreamEvent::Done]);
    }

    #[tokio::test]
    async fn fully_read_stream_is_reported_missing_on_reconnect() {
        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(60)));
        registry.start_session("c1", |p, c| say(p, c, vec!["fatto"]));
        relay_events(Arc::clone(&registry), "c1".into(), fast()).collect::<Vec<_>>().await;

        let again: Vec<StreamEvent> = relay_events(registry, "c1".into(), fast()).collect().await;
        assert_eq!(again.len(), 1);
        assert!(matches!(again[0], StreamEvent::Error { .. }));
    }
}
