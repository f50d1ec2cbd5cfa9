//! Manages the WebSocket connection lifecycle for one chat screen.

use super::{
    protocol::{ClientMessage, HistoryEntry, ServerMessage},
    sink::ChannelSink,
};
use crate::{
    audio_utils::voice_to_wav, handlers::login_failure_message, models::ProfileView,
    state::AppState,
};
use anyhow::{Context, Result, anyhow};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use coach_core::{
    conversation::{ConversationLoop, Notice, TurnOutcome},
    session::Session,
};
use futures_util::{SinkExt, Stream, StreamExt, stream::SplitSink};
use std::{collections::VecDeque, future::Future, sync::Arc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, instrument, warn};

const OUTGOING_BUFFER: usize = 64;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// How the chat loop ended.
#[derive(Debug, PartialEq)]
enum Exit {
    LoggedOut,
    Disconnected,
}

/// A decoded client frame.
enum Incoming {
    Message(ClientMessage),
    Closed,
    Skip,
    Invalid(String),
}

fn read_client(frame: Option<Result<Message, axum::Error>>) -> Incoming {
    match frame {
        None => Incoming::Closed,
        Some(Err(e)) => {
            warn!(error = %e, "Error receiving from client WebSocket");
            Incoming::Closed
        }
        Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
            Ok(msg) => Incoming::Message(msg),
            Err(e) => {
                warn!(error = %e, "Unrecognised client message");
                Incoming::Invalid(format!("Unrecognised message: {}", e))
            }
        },
        Some(Ok(Message::Close(_))) => Incoming::Closed,
        Some(Ok(_)) => Incoming::Skip,
    }
}

/// Main handler for an individual WebSocket connection.
///
/// The first client message must be `init`. After a successful login the
/// chat loop runs until the client logs out or disconnects. Outgoing messages
/// go through a channel to a single writer task.
#[instrument(name = "ws_session", skip_all, fields(connection_id, identifier))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id: u32 = rand::random();
    tracing::Span::current().record("connection_id", connection_id);
    info!("New WebSocket connection. Awaiting initialization...");

    let (mut socket_tx, mut socket_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerMessage>(OUTGOING_BUFFER);
    let writer = tokio::spawn(
        async move {
            while let Some(msg) = out_rx.recv().await {
                if let Err(e) = send_msg(&mut socket_tx, msg).await {
                    warn!(error = %e, "Failed to write to client; closing writer");
                    break;
                }
            }
            let _ = socket_tx.close().await;
        }
        .in_current_span(),
    );

    let session = match socket_rx.next().await {
        Some(Ok(Message::Text(text))) => initialize_session(text.as_str(), &state).await,
        Some(Ok(_)) => Err(anyhow!("First message was not a text `init` message.")),
        _ => {
            info!("Client disconnected before sending init message.");
            drop(out_tx);
            let _ = writer.await;
            return;
        }
    };

    let session = match session {
        Ok(session) => session,
        Err(e) => {
            warn!("Session initialization failed: {}", e);
            let _ = out_tx
                .send(ServerMessage::Error {
                    message: e.to_string(),
                })
                .await;
            drop(out_tx);
            let _ = writer.await;
            return;
        }
    };
    tracing::Span::current().record("identifier", session.profile().identifier.as_str());

    let mut conversation = ConversationLoop::new(
        session,
        state.sessions.store().clone(),
        state.completion.clone(),
        Arc::new(ChannelSink::new(out_tx.clone())),
        state.sessions.composer().clone(),
        state.loop_settings.clone(),
    );
    if let Some(transcriber) = &state.transcriber {
        conversation = conversation.with_transcriber(transcriber.clone());
    }
    if let Some(synthesizer) = &state.synthesizer {
        conversation = conversation.with_synthesizer(synthesizer.clone());
    }

    if out_tx
        .send(initialized(&conversation, state.transcriber.is_some()))
        .await
        .is_err()
    {
        error!("Failed to queue Initialized message for client.");
        return;
    }

    let exit = run_chat(&state, &mut conversation, &out_tx, &mut socket_rx)
        .instrument(tracing::info_span!("coach_session"))
        .await;

    state.sessions.logout(conversation.into_session());
    match exit {
        Ok(Exit::LoggedOut) => {
            let _ = out_tx.send(ServerMessage::LoggedOut).await;
        }
        Ok(Exit::Disconnected) => info!("Client disconnected."),
        Err(e) => error!(error = ?e, "Chat session terminated with error."),
    }

    drop(out_tx);
    let _ = writer.await;
    info!("WebSocket connection closed.");
}

/// Parses the `init` message and logs the student in.
async fn initialize_session(init_text: &str, state: &AppState) -> Result<Session> {
    let init_msg: ClientMessage =
        serde_json::from_str(init_text).context("Invalid `init` message")?;
    let ClientMessage::Init {
        identifier,
        password,
    } = init_msg
    else {
        return Err(anyhow!("First message must be `init`"));
    };

    state
        .sessions
        .authenticate(&identifier, &password)
        .await
        .map_err(|e| anyhow!(login_failure_message(&e, state.login_reveal_reason)))
}

fn initialized(conversation: &ConversationLoop, voice_available: bool) -> ServerMessage {
    ServerMessage::Initialized {
        profile: ProfileView::from(conversation.session().profile()),
        history: conversation
            .visible_turns()
            .iter()
            .map(HistoryEntry::from)
            .collect(),
        voice_available,
    }
}

/// The main event loop for a logged-in chat screen. Turns run one at a time;
/// messages arriving during a turn are queued, except `cancel`, which stops
/// the turn.
async fn run_chat<S>(
    state: &AppState,
    conversation: &mut ConversationLoop,
    out_tx: &mpsc::Sender<ServerMessage>,
    socket_rx: &mut S,
) -> Result<Exit>
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut deferred: VecDeque<ClientMessage> = VecDeque::new();

    loop {
        let msg = match deferred.pop_front() {
            Some(msg) => msg,
            None => match read_client(socket_rx.next().await) {
                Incoming::Message(msg) => msg,
                Incoming::Closed => return Ok(Exit::Disconnected),
                Incoming::Skip => continue,
                Incoming::Invalid(message) => {
                    out_tx.send(ServerMessage::Error { message }).await?;
                    continue;
                }
            },
        };

        let cancel = CancellationToken::new();
        let closed = match msg {
            ClientMessage::Init { .. } => {
                warn!("Ignoring repeated `init` message.");
                false
            }
            ClientMessage::UserMessage { text } => {
                let turn = conversation.submit_text(&text, cancel.clone());
                drive_turn(turn, socket_rx, &cancel, &mut deferred).await
            }
            ClientMessage::Voice { audio, sample_rate } => match voice_to_wav(&audio, sample_rate) {
                Ok(wav) => {
                    let turn = conversation.submit_voice(wav, cancel.clone());
                    drive_turn(turn, socket_rx, &cancel, &mut deferred).await
                }
                Err(e) => {
                    warn!(error = %e, sample_rate, "Rejected voice recording");
                    out_tx
                        .send(Notice::error(format!("Couldn't use that recording: {}.", e)).into())
                        .await?;
                    false
                }
            },
            ClientMessage::SetTopic { topic } => match conversation.change_topic(&topic) {
                Ok(()) => {
                    out_tx
                        .send(ServerMessage::TopicChanged {
                            topic: topic.trim().to_string(),
                        })
                        .await?;
                    // The coach answers the hidden pivot right away.
                    let turn = conversation.retry_last(cancel.clone());
                    drive_turn(turn, socket_rx, &cancel, &mut deferred).await
                }
                Err(e) => {
                    out_tx.send(Notice::error(e.user_message()).into()).await?;
                    false
                }
            },
            ClientMessage::SetVoiceEnabled { enabled } => {
                conversation.set_speak_replies(enabled);
                if enabled && state.synthesizer.is_none() {
                    out_tx
                        .send(Notice::info("Spoken replies are not available on this server.").into())
                        .await?;
                }
                false
            }
            ClientMessage::Retry => {
                let turn = conversation.retry_last(cancel.clone());
                drive_turn(turn, socket_rx, &cancel, &mut deferred).await
            }
            ClientMessage::Cancel => {
                debug!("Cancel received with no reply in progress.");
                false
            }
            ClientMessage::Reset => {
                conversation.reset().await;
                out_tx
                    .send(initialized(conversation, state.transcriber.is_some()))
                    .await?;
                false
            }
            ClientMessage::Logout => return Ok(Exit::LoggedOut),
        };

        if closed {
            return Ok(Exit::Disconnected);
        }
    }
}

/// Polls a turn to completion while still reading the socket. Returns `true`
/// if the client went away meanwhile.
async fn drive_turn<F, S>(
    turn: F,
    socket_rx: &mut S,
    cancel: &CancellationToken,
    deferred: &mut VecDeque<ClientMessage>,
) -> bool
where
    F: Future<Output = TurnOutcome>,
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    tokio::pin!(turn);
    let mut closed = false;
    loop {
        tokio::select! {
            outcome = &mut turn => {
                match &outcome {
                    TurnOutcome::Completed { persisted, .. } => debug!(persisted, "Turn finished"),
                    TurnOutcome::Cancelled => debug!("Turn cancelled"),
                    TurnOutcome::Failed(e) => debug!(error = %e, "Turn failed"),
                }
                return closed;
            }
            frame = socket_rx.next(), if !closed => match read_client(frame) {
                Incoming::Message(ClientMessage::Cancel) => {
                    info!("Client cancelled the reply.");
                    cancel.cancel();
                }
                Incoming::Message(ClientMessage::Logout) => {
                    cancel.cancel();
                    deferred.push_back(ClientMessage::Logout);
                }
                Incoming::Message(other) => deferred.push_back(other),
                Incoming::Closed => {
                    cancel.cancel();
                    closed = true;
                }
                Incoming::Skip | Incoming::Invalid(_) => {}
            },
        }
    }
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use std::time::Duration;

    fn text(json: &str) -> Result<Message, axum::Error> {
        Ok(Message::Text(json.to_string().into()))
    }

    #[test]
    fn test_read_client_classifies_frames() {
        assert!(matches!(read_client(None), Incoming::Closed));
        assert!(matches!(
            read_client(Some(text(r#"{"type":"retry"}"#))),
            Incoming::Message(ClientMessage::Retry)
        ));
        assert!(matches!(
            read_client(Some(text("not json"))),
            Incoming::Invalid(_)
        ));
        assert!(matches!(
            read_client(Some(Ok(Message::Ping(Vec::new().into())))),
            Incoming::Skip
        ));
    }

    async fn wait_for_cancel(cancel: CancellationToken) -> TurnOutcome {
        tokio::select! {
            _ = cancel.cancelled() => TurnOutcome::Cancelled,
            _ = tokio::time::sleep(Duration::from_secs(5)) => TurnOutcome::Completed {
                reply: "too late".into(),
                persisted: true,
                speech: None,
            },
        }
    }

    #[tokio::test]
    async fn test_cancel_message_stops_turn_and_queues_others() {
        let mut socket = stream::iter(vec![
            text(r#"{"type":"set_topic","topic":"Writing"}"#),
            text(r#"{"type":"cancel"}"#),
        ])
        .chain(stream::pending());
        let cancel = CancellationToken::new();
        let mut deferred = VecDeque::new();

        let closed = drive_turn(wait_for_cancel(cancel.clone()), &mut socket, &cancel, &mut deferred).await;

        assert!(!closed);
        assert!(cancel.is_cancelled());
        assert_eq!(deferred.len(), 1);
        assert!(matches!(deferred[0], ClientMessage::SetTopic { .. }));
    }

    #[tokio::test]
    async fn test_disconnect_cancels_turn() {
        let mut socket = stream::iter(Vec::<Result<Message, axum::Error>>::new());
        let cancel = CancellationToken::new();
        let mut deferred = VecDeque::new();

        let closed = drive_turn(wait_for_cancel(cancel.clone()), &mut socket, &cancel, &mut deferred).await;

        assert!(closed);
        assert!(deferred.is_empty());
    }
}
