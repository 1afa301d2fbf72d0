//! Per-connection read and write loops bridging a socket to the hub.
//!
//! The loops are generic over any `Stream` of incoming frames and any `Sink`
//! of outgoing frames, so axum's split socket and in-memory channels plug in
//! the same way.

use std::any::Any;
use std::fmt::Display;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use concierge_chats::{AccessGate, ChatError, Envelope, MessageKind, NewMessage};
use concierge_config::HubConfig;
use futures_util::{FutureExt, Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::hub::{Hub, SessionHandle};

/// Shared dependencies of every session.
#[derive(Clone)]
pub struct SessionContext {
    pub hub: Arc<Hub>,
    pub gate: AccessGate,
    pub config: HubConfig,
}

/// Why the inbound loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundExit {
    PeerClosed,
    IdleTimeout,
    TransportError,
    Panicked,
}

/// Why the outbound loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundExit {
    QueueClosed,
    WriteError,
    WriteTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    Inbound(InboundExit),
    Outbound(OutboundExit),
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub exit: SessionExit,
}

/// Register a session, run both loops until either ends, then unregister it
/// and make sure the other loop is gone too.
pub async fn drive_session<St, Si, E>(
    stream: St,
    sink: Si,
    ctx: SessionContext,
    user_id: i64,
    company_id: i64,
    rooms: Vec<i64>,
) -> SessionSummary
where
    St: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: Display + Send,
{
    let (handle, queue) =
        SessionHandle::channel(user_id, company_id, ctx.config.outbound_capacity);
    let session_id = handle.id;

    ctx.hub.register(handle, rooms);
    ctx.hub.broadcast_presence(session_id, true);
    info!(%session_id, user_id, company_id, "session admitted");

    let inbound = Inbound {
        session_id,
        user_id,
        hub: ctx.hub.clone(),
        gate: ctx.gate.clone(),
        idle_timeout: ctx.config.idle_timeout(),
    };

    let mut reader = tokio::spawn(inbound.run(stream));
    let mut writer = tokio::spawn(run_outbound(
        sink,
        queue,
        ctx.config.heartbeat_interval(),
        ctx.config.write_timeout(),
        session_id,
    ));

    let finished = tokio::select! {
        result = &mut reader => Finished::Reader(result),
        result = &mut writer => Finished::Writer(result),
    };

    // Dropping the hub's sender closes the queue, which lets the writer send
    // its close frame and stop.
    ctx.hub.unregister(session_id);

    // A finished JoinHandle must not be polled again, so only the loop that
    // is still running gets joined here.
    let exit = match finished {
        Finished::Writer(result) => {
            reader.abort();
            let _ = reader.await;
            result.map(SessionExit::Outbound).unwrap_or(SessionExit::Aborted)
        }
        Finished::Reader(result) => {
            let grace = ctx.config.write_timeout() + Duration::from_secs(1);
            if time::timeout(grace, &mut writer).await.is_err() {
                writer.abort();
                let _ = writer.await;
            }
            result.map(SessionExit::Inbound).unwrap_or(SessionExit::Aborted)
        }
    };

    info!(%session_id, user_id, ?exit, "session ended");
    SessionSummary { session_id, exit }
}

enum Finished {
    Reader(Result<InboundExit, JoinError>),
    Writer(Result<OutboundExit, JoinError>),
}

struct Inbound {
    session_id: Uuid,
    user_id: i64,
    hub: Arc<Hub>,
    gate: AccessGate,
    idle_timeout: Duration,
}

impl Inbound {
    async fn run<St, E>(self, mut stream: St) -> InboundExit
    where
        St: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        loop {
            let frame = match time::timeout(self.idle_timeout, stream.next()).await {
                Err(_) => {
                    info!(session_id = %self.session_id, "session idle, closing");
                    return InboundExit::IdleTimeout;
                }
                Ok(None) => return InboundExit::PeerClosed,
                Ok(Some(Err(err))) => {
                    debug!(session_id = %self.session_id, error = %err, "transport read failed");
                    return InboundExit::TransportError;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            let text = match frame {
                Message::Text(text) => text,
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(_) => {
                        self.reply_error(0, "binary frames must carry UTF-8 JSON");
                        continue;
                    }
                },
                Message::Close(_) => return InboundExit::PeerClosed,
                Message::Ping(_) | Message::Pong(_) => continue,
            };

            if let Err(panic) = AssertUnwindSafe(self.handle_frame(&text))
                .catch_unwind()
                .await
            {
                error!(
                    session_id = %self.session_id,
                    panic = %panic_message(&panic),
                    "frame handler panicked"
                );
                self.reply_error(0, "internal error");
                return InboundExit::Panicked;
            }
        }
    }

    async fn handle_frame(&self, text: &str) {
        let mut envelope = match Envelope::decode(text) {
            Ok(envelope) => envelope,
            Err(err) => {
                debug!(session_id = %self.session_id, error = %err, "undecodable frame");
                self.reply_error(0, format!("invalid envelope: {err}"));
                return;
            }
        };

        if envelope.conversation_id <= 0 {
            self.reply_error(0, "conversation_id is required");
            return;
        }

        // Only the server decides who sent something and when it was stored.
        envelope.sender_id = self.user_id;
        envelope.created_at = None;
        if let Some(status) = envelope.online_status.as_mut() {
            status.user_id = self.user_id;
        }

        let kind = envelope.kind;
        if !kind.client_allowed() {
            self.reply_error(
                envelope.conversation_id,
                format!("'{kind}' cannot be sent by clients"),
            );
        } else if kind.is_ephemeral() {
            self.route_ephemeral(envelope);
        } else {
            self.persist_and_route(envelope).await;
        }
    }

    /// Ephemeral kinds trust the membership checked at admission.
    fn route_ephemeral(&self, mut envelope: Envelope) {
        envelope.id = None;
        if !self.hub.is_member(self.session_id, envelope.conversation_id) {
            debug!(
                session_id = %self.session_id,
                conversation_id = envelope.conversation_id,
                kind = %envelope.kind,
                "dropping ephemeral envelope for a room the session is not in"
            );
            return;
        }
        self.hub.route(&envelope);
    }

    async fn persist_and_route(&self, envelope: Envelope) {
        let conversation_id = envelope.conversation_id;

        match self.gate.can_access(self.user_id, conversation_id).await {
            Ok(true) => {}
            Ok(false) => {
                info!(
                    session_id = %self.session_id,
                    user_id = self.user_id,
                    conversation_id,
                    "dropping envelope for conversation without access"
                );
                return;
            }
            Err(err) => {
                warn!(session_id = %self.session_id, conversation_id, error = %err, "access check failed");
                self.reply_error(conversation_id, "could not verify access");
                return;
            }
        }

        if let Some(source_id) = envelope.forwarded_from_id {
            match self.gate.require_message_access(self.user_id, source_id).await {
                Ok(_) => {}
                Err(err @ (ChatError::AccessDenied { .. } | ChatError::MessageNotFound { .. })) => {
                    info!(
                        session_id = %self.session_id,
                        conversation_id,
                        source_id,
                        reason = %err,
                        "dropping forward of an inaccessible message"
                    );
                    return;
                }
                Err(err) => {
                    warn!(session_id = %self.session_id, source_id, error = %err, "forward check failed");
                    self.reply_error(conversation_id, client_message(&err));
                    return;
                }
            }
        }

        let store = self.gate.store();
        let stored = match envelope.kind {
            MessageKind::MessageRead => store
                .mark_read(conversation_id, self.user_id, envelope.id)
                .await
                .map(|receipt| {
                    let mut routed =
                        Envelope::new(MessageKind::MessageRead, conversation_id, self.user_id);
                    routed.id = receipt.last_read_message_id;
                    routed.created_at = Some(receipt.last_read_at);
                    routed
                }),
            kind => store
                .create_message(NewMessage {
                    conversation_id,
                    sender_id: self.user_id,
                    kind,
                    content: envelope.content,
                    reply_to_id: envelope.reply_to_id,
                    forwarded_from_id: envelope.forwarded_from_id,
                    media_id: envelope.media_id,
                    sticker_id: envelope.sticker_id,
                    is_silent: envelope.is_silent.unwrap_or(false),
                    extras: envelope.extras,
                })
                .await
                .map(|message| Envelope::from_stored(message.kind, &message)),
        };

        match stored {
            Ok(routed) => {
                self.hub.route(&routed);
            }
            Err(err) => {
                warn!(
                    session_id = %self.session_id,
                    conversation_id,
                    error = %err,
                    "failed to persist envelope"
                );
                self.reply_error(conversation_id, client_message(&err));
            }
        }
    }

    fn reply_error(&self, conversation_id: i64, message: impl Into<String>) {
        self.hub
            .send_to_session(self.session_id, Envelope::error(conversation_id, message));
    }
}

/// Error text safe to show a client.
fn client_message(err: &ChatError) -> String {
    match err {
        ChatError::Database(_) | ChatError::Internal { .. } | ChatError::Conflict { .. } => {
            "failed to store message".to_string()
        }
        other => other.to_string(),
    }
}

/// Write queued envelopes to the sink, pinging when the connection was quiet
/// for a whole heartbeat interval.
pub async fn run_outbound<Si>(
    mut sink: Si,
    mut queue: mpsc::Receiver<Envelope>,
    heartbeat: Duration,
    write_timeout: Duration,
    session_id: Uuid,
) -> OutboundExit
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    let mut ticker = time::interval_at(time::Instant::now() + heartbeat, heartbeat);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut wrote_since_tick = false;

    loop {
        tokio::select! {
            next = queue.recv() => {
                let Some(envelope) = next else {
                    let _ = write_frame(&mut sink, Message::Close(None), write_timeout, session_id).await;
                    return OutboundExit::QueueClosed;
                };
                let text = match envelope.encode() {
                    Ok(text) => text,
                    Err(err) => {
                        error!(%session_id, error = %err, "failed to encode envelope");
                        continue;
                    }
                };
                if let Err(exit) = write_frame(&mut sink, Message::Text(text), write_timeout, session_id).await {
                    return exit;
                }
                wrote_since_tick = true;
            }
            _ = ticker.tick() => {
                if !wrote_since_tick {
                    if let Err(exit) = write_frame(&mut sink, Message::Ping(Vec::new()), write_timeout, session_id).await {
                        return exit;
                    }
                }
                wrote_since_tick = false;
            }
        }
    }
}

async fn write_frame<Si>(
    sink: &mut Si,
    frame: Message,
    write_timeout: Duration,
    session_id: Uuid,
) -> Result<(), OutboundExit>
where
    Si: Sink<Message> + Unpin,
    Si::Error: Display,
{
    match time::timeout(write_timeout, sink.send(frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => {
            debug!(%session_id, error = %err, "transport write failed");
            Err(OutboundExit::WriteError)
        }
        Err(_) => {
            warn!(%session_id, "transport write timed out");
            Err(OutboundExit::WriteTimeout)
        }
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
