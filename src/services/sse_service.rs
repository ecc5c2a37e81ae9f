use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    dto::{
        session::SessionView,
        sse::{Handshake, ServerEvent},
    },
    error::ServiceError,
    services::sse_events::EVENT_HANDSHAKE,
    state::SharedState,
};

const EVENT_SNAPSHOT: &str = "session.snapshot";

/// A live subscription to one session, with the events to replay first.
pub struct SessionSubscription {
    session_id: String,
    receiver: broadcast::Receiver<ServerEvent>,
    initial: Vec<ServerEvent>,
}

/// Subscribe to the event stream of `session_id`.
///
/// The subscription is registered before the snapshot is read, so no change
/// committed in between can be missed.
pub async fn subscribe_session(
    state: &SharedState,
    session_id: &str,
) -> Result<SessionSubscription, ServiceError> {
    let store = state.require_session_store().await?;
    let receiver = state.channels().subscribe(session_id);

    let session = match store.find_session(session_id.to_owned()).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            drop(receiver);
            state.channels().prune(session_id);
            return Err(ServiceError::NotFound(format!("session `{session_id}`")));
        }
        Err(err) => {
            drop(receiver);
            state.channels().prune(session_id);
            return Err(err.into());
        }
    };

    let mut initial = Vec::with_capacity(2);
    let handshake = Handshake {
        session_id: session_id.to_owned(),
        degraded: state.is_degraded(),
    };
    match ServerEvent::json(EVENT_HANDSHAKE.to_string(), &handshake) {
        Ok(event) => initial.push(event),
        Err(err) => warn!(session_id, error = %err, "failed to serialize SSE handshake"),
    }
    match ServerEvent::json(EVENT_SNAPSHOT.to_string(), &SessionView::from(session)) {
        Ok(event) => initial.push(event),
        Err(err) => warn!(session_id, error = %err, "failed to serialize session snapshot"),
    }

    Ok(SessionSubscription {
        session_id: session_id.to_owned(),
        receiver,
        initial,
    })
}

/// Convert a subscription into an SSE response, forwarding events and
/// cleaning up once the client disconnects.
pub fn to_sse_stream(
    state: SharedState,
    subscription: SessionSubscription,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let SessionSubscription {
        session_id,
        mut receiver,
        initial,
    } = subscription;

    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    // forwarder task: replays the initial events, then reads from broadcast and pushes into mpsc
    tokio::spawn(async move {
        let mut connected = true;
        for payload in initial {
            if tx.send(Ok(to_event(payload))).await.is_err() {
                connected = false;
                break;
            }
        }

        while connected {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            if tx.send(Ok(to_event(payload))).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(skipped)) => {
                            // Skip lagged messages but keep the stream alive.
                            warn!(session_id = %session_id, skipped, "session SSE subscriber lagged");
                            continue;
                        }
                    }
                }
            }
        }

        drop(receiver);
        state.channels().prune(&session_id);
        info!(session_id = %session_id, "session SSE stream disconnected");
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

fn to_event(payload: ServerEvent) -> Event {
    let mut event = Event::default().data(payload.data);
    if let Some(name) = payload.event {
        event = event.event(name);
    }
    event
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            models::fixtures,
            session_store::{SessionStore, memory::MemorySessionStore},
        },
        state::AppState,
    };

    #[tokio::test]
    async fn subscription_replays_handshake_and_snapshot() {
        let store = MemorySessionStore::new();
        store
            .create_session(fixtures::session("s1", vec![]))
            .await
            .unwrap();
        let state = AppState::with_store(AppConfig::default(), Arc::new(store)).await;

        let subscription = subscribe_session(&state, "s1").await.unwrap();
        let names: Vec<_> = subscription
            .initial
            .iter()
            .map(|event| event.event.as_deref())
            .collect();
        assert_eq!(names, [Some("handshake"), Some("session.snapshot")]);
        assert_eq!(state.channels().len(), 1);
    }

    #[tokio::test]
    async fn unknown_session_leaves_no_hub_behind() {
        let state = AppState::with_store(
            AppConfig::default(),
            Arc::new(MemorySessionStore::new()),
        )
        .await;
        assert!(matches!(
            subscribe_session(&state, "ghost").await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(state.channels().is_empty());
    }
}
