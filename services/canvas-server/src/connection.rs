//! Downstream connection
//!
//! A connection owns one mailbox registered with the hub and one duplex
//! transport. It runs two duties: the writer drains the mailbox onto the
//! transport and sends pings while idle; the reader watches inbound
//! traffic for liveness and closure. Whichever duty ends first ends the
//! connection, which is then unregistered and never registered again.

use std::fmt::Display;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tracing::{debug, info, warn};
use types::ids::ConnectionId;

use crate::config::ConnectionConfig;
use crate::hub::{Batch, HubHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Active,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent a close frame or ended the stream.
    PeerClosed,
    TransportError,
    /// Nothing received within the idle timeout.
    IdleTimeout,
    WriteTimeout,
    /// The hub closed the mailbox: eviction or shutdown.
    MailboxClosed,
    /// Registration failed.
    HubUnavailable,
}

pub struct Connection {
    id: ConnectionId,
    hub: HubHandle,
    config: ConnectionConfig,
    state: watch::Sender<ConnectionState>,
}

impl Connection {
    pub fn new(hub: HubHandle, config: ConnectionConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            id: ConnectionId::new(),
            hub,
            config,
            state,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Follow lifecycle transitions from outside the connection.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Register with the hub and serve the transport until either side ends.
    pub async fn run<S, R, E>(self, sink: S, stream: R) -> CloseReason
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: Display,
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        let (mailbox, inbox) = mpsc::channel(self.config.mailbox_capacity);
        match self.hub.register(self.id, mailbox).await {
            Ok(true) => {}
            Ok(false) | Err(_) => {
                warn!(connection_id = %self.id, "Registration with broadcast hub failed");
                self.state.send_replace(ConnectionState::Closed);
                return CloseReason::HubUnavailable;
            }
        }
        self.state.send_replace(ConnectionState::Active);

        let mut writer = tokio::spawn(write_duty(
            self.id,
            sink,
            inbox,
            self.state.subscribe(),
            self.config.clone(),
        ));

        let (reason, writer_done) = tokio::select! {
            reason = read_duty(self.id, stream, self.config.idle_timeout) => (reason, false),
            joined = &mut writer => {
                let reason = joined.ok().flatten().unwrap_or(CloseReason::TransportError);
                (reason, true)
            }
        };

        self.state.send_replace(ConnectionState::Closed);
        self.hub.unregister(self.id).await;
        if !writer_done {
            let _ = writer.await;
        }

        info!(connection_id = %self.id, reason = ?reason, "Connection closed");
        reason
    }
}

/// Drain the mailbox onto the transport.
///
/// Returns `None` when stopped because the reader closed the connection.
async fn write_duty<S>(
    id: ConnectionId,
    mut sink: S,
    mut inbox: mpsc::Receiver<Batch>,
    mut state: watch::Receiver<ConnectionState>,
    config: ConnectionConfig,
) -> Option<CloseReason>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut ping = interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            biased;
            changed = state.changed() => {
                let closed = changed.is_err()
                    || matches!(*state.borrow_and_update(), ConnectionState::Closed);
                if closed {
                    break None;
                }
            }
            batch = inbox.recv() => {
                let Some(batch) = batch else {
                    break Some(CloseReason::MailboxClosed);
                };
                let payload = match serde_json::to_string(&*batch) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(connection_id = %id, error = %e, "Failed to encode batch");
                        continue;
                    }
                };
                if let Err(reason) = send(&mut sink, Message::Text(payload.into()), config.write_timeout).await {
                    break Some(reason);
                }
                ping.reset();
            }
            _ = ping.tick() => {
                if let Err(reason) = send(&mut sink, Message::Ping(Default::default()), config.write_timeout).await {
                    break Some(reason);
                }
            }
        }
    };

    if !matches!(reason, Some(CloseReason::TransportError | CloseReason::WriteTimeout)) {
        let _ = send(&mut sink, Message::Close(None), config.write_timeout).await;
    }
    let _ = timeout(config.write_timeout, sink.close()).await;
    reason
}

async fn send<S>(sink: &mut S, message: Message, write_timeout: Duration) -> Result<(), CloseReason>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match timeout(write_timeout, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!(error = %e, "Transport write failed");
            Err(CloseReason::TransportError)
        }
        Err(_) => Err(CloseReason::WriteTimeout),
    }
}

/// Watch inbound traffic. Every frame, pongs included, resets the idle
/// deadline; payloads are not interpreted.
async fn read_duty<R, E>(id: ConnectionId, mut stream: R, idle_timeout: Duration) -> CloseReason
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    loop {
        match timeout(idle_timeout, stream.next()).await {
            Err(_) => return CloseReason::IdleTimeout,
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => return CloseReason::PeerClosed,
            Ok(Some(Err(e))) => {
                debug!(connection_id = %id, error = %e, "Transport read failed");
                return CloseReason::TransportError;
            }
            Ok(Some(Ok(Message::Text(text)))) => {
                debug!(connection_id = %id, len = text.as_str().len(), "Ignoring inbound text frame");
            }
            Ok(Some(Ok(Message::Binary(bytes)))) => {
                debug!(connection_id = %id, len = bytes.len(), "Ignoring inbound binary frame");
            }
            Ok(Some(Ok(_))) => {}
        }
    }
}
