//! WebSocket change feed.
//!
//! Each connection gets its own receiver on the chat service's event hub and
//! forwards the events addressed to the caller as JSON text frames.  Frames
//! carry no data beyond the topic; clients refetch what the topic names.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use parley_shared::{Audience, ChangeEvent, ChangeTopic, UserId};

use crate::api::AppState;
use crate::auth::Caller;

pub async fn subscribe(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Caller(caller): Caller,
) -> Response {
    // Subscribe before the upgrade so nothing committed after the handshake
    // request is missed.
    let rx = state.chat.subscribe();
    ws.on_upgrade(move |socket| feed(socket, caller, rx))
}

/// What to do with one receive result.
#[derive(Debug, PartialEq)]
enum Step {
    Forward(ChangeEvent),
    Skip,
    Stop,
}

fn step_for(user: &UserId, received: Result<ChangeEvent, RecvError>) -> Step {
    match received {
        Ok(event) if event.audience.includes(user) => Step::Forward(event),
        Ok(_) => Step::Skip,
        Err(RecvError::Lagged(missed)) => {
            warn!(user = %user.short(), missed, "subscriber lagged, requesting resync");
            Step::Forward(ChangeEvent::new(
                ChangeTopic::Resync,
                Audience::Everyone,
                Utc::now(),
            ))
        }
        Err(RecvError::Closed) => Step::Stop,
    }
}

async fn feed(socket: WebSocket, user: UserId, mut rx: broadcast::Receiver<ChangeEvent>) {
    info!(user = %user.short(), "subscriber connected");
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            received = rx.recv() => {
                let event = match step_for(&user, received) {
                    Step::Forward(event) => event,
                    Step::Skip => continue,
                    Step::Stop => break,
                };
                let text = match event.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "failed to encode change event");
                        continue;
                    }
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(user = %user.short(), error = %e, "subscriber socket error");
                    break;
                }
            },
        }
    }

    info!(user = %user.short(), "subscriber disconnected");
}

#[cfg(test)]
mod tests {
    use parley_shared::ConversationId;

    use super::*;

    fn uid(s: &str) -> UserId {
        UserId::parse(s).unwrap()
    }

    fn event_for(users: &[&str]) -> ChangeEvent {
        ChangeEvent::new(
            ChangeTopic::Messages {
                conversation_id: ConversationId::new(),
            },
            Audience::Users(users.iter().map(|u| uid(u)).collect()),
            Utc::now(),
        )
    }

    #[test]
    fn test_only_addressed_events_are_forwarded() {
        let event = event_for(&["alice", "bob"]);
        assert_eq!(
            step_for(&uid("alice"), Ok(event.clone())),
            Step::Forward(event.clone())
        );
        assert_eq!(step_for(&uid("carol"), Ok(event)), Step::Skip);
    }

    #[test]
    fn test_lag_turns_into_resync() {
        match step_for(&uid("alice"), Err(RecvError::Lagged(12))) {
            Step::Forward(event) => assert_eq!(event.topic, ChangeTopic::Resync),
            other => panic!("unexpected step {other:?}"),
        }
        assert_eq!(step_for(&uid("alice"), Err(RecvError::Closed)), Step::Stop);
    }
}
