//! WebSocket transport
//!
//! One background task owns the socket: it forwards queued outbound frames,
//! decodes inbound frames, and on an unexpected close runs the reconnect
//! policy. Every `connect()`/`disconnect()` starts a new epoch; work from an
//! older epoch never touches status or the outbound queue.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{ConnectionStatus, ReconnectPolicy, Transport};
use crate::events::EventBus;
use crate::protocol::{self, AssistantReply, InboundFrame};
use crate::{Error, Result};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport over a single websocket connection
pub struct WsTransport {
    shared: Arc<Shared>,
}

struct Shared {
    url: String,
    policy: ReconnectPolicy,
    link: Mutex<Link>,
    replies: EventBus<AssistantReply>,
    statuses: EventBus<ConnectionStatus>,
}

#[derive(Default)]
struct Link {
    epoch: u64,
    status: ConnectionStatus,
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: Option<JoinHandle<()>>,
}

/// Why the socket pump returned
enum PumpEnd {
    /// Outbound queue closed by this side
    Local,
    /// Remote close or I/O failure
    Remote(String),
}

impl WsTransport {
    /// Create a transport for `url` with the default reconnect policy
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_policy(url, ReconnectPolicy::default())
    }

    /// Create a transport with an explicit reconnect policy
    #[must_use]
    pub fn with_policy(url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            shared: Arc::new(Shared {
                url: url.into(),
                policy,
                link: Mutex::new(Link::default()),
                replies: EventBus::new(),
                statuses: EventBus::new(),
            }),
        }
    }

    /// Endpoint URL
    #[must_use]
    pub fn url(&self) -> &str {
        &self.shared.url
    }

    /// Reconnect policy in effect
    #[must_use]
    pub fn policy(&self) -> ReconnectPolicy {
        self.shared.policy
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self) -> Result<()> {
        let epoch = {
            let mut link = self.shared.link();
            if let Some(task) = link.task.take() {
                task.abort();
            }
            link.outbound = None;
            link.epoch += 1;
            link.epoch
        };

        self.shared.set_status(epoch, ConnectionStatus::Connecting);
        tracing::debug!(url = %self.shared.url, "connecting");

        let socket = match connect_async(self.shared.url.as_str()).await {
            Ok((socket, _)) => socket,
            Err(e) => {
                tracing::error!(url = %self.shared.url, error = %e, "connection failed");
                self.shared.set_status(epoch, ConnectionStatus::Error);
                return Err(Error::Connection(e.to_string()));
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if !self.shared.install(epoch, tx) {
            return Err(Error::Connection("connection superseded".to_string()));
        }
        self.shared.set_status(epoch, ConnectionStatus::Connected);
        tracing::info!(url = %self.shared.url, "connected");

        let task = tokio::spawn(supervise(Arc::clone(&self.shared), epoch, socket, rx));
        let mut link = self.shared.link();
        if link.epoch == epoch {
            link.task = Some(task);
        } else {
            task.abort();
        }

        Ok(())
    }

    fn disconnect(&self) {
        let changed = {
            let mut link = self.shared.link();
            link.epoch += 1;
            link.outbound = None;
            if let Some(task) = link.task.take() {
                task.abort();
            }
            let changed = link.status != ConnectionStatus::Disconnected;
            link.status = ConnectionStatus::Disconnected;
            changed
        };

        if changed {
            tracing::info!("disconnected");
            self.shared.statuses.emit(&ConnectionStatus::Disconnected);
        }
    }

    fn send(&self, message: &str, session_id: Option<&str>) -> Result<()> {
        let link = self.shared.link();
        match (&link.outbound, link.status) {
            (Some(outbound), ConnectionStatus::Connected) => {
                let frame = protocol::encode_query(message, session_id)?;
                outbound.send(frame).map_err(|_| Error::NotConnected)?;
                tracing::debug!(session_id = ?session_id, "query queued");
                Ok(())
            }
            _ => {
                tracing::error!(status = %link.status, "cannot send query, channel not open");
                Err(Error::NotConnected)
            }
        }
    }

    fn status(&self) -> ConnectionStatus {
        self.shared.link().status
    }

    fn replies(&self) -> &EventBus<AssistantReply> {
        &self.shared.replies
    }

    fn status_changes(&self) -> &EventBus<ConnectionStatus> {
        &self.shared.statuses
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        if let Some(task) = self.shared.link().task.take() {
            task.abort();
        }
    }
}

impl Shared {
    fn link(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a status for `epoch`, broadcasting it if it changed
    ///
    /// Returns `false` if the epoch is stale.
    fn set_status(&self, epoch: u64, status: ConnectionStatus) -> bool {
        {
            let mut link = self.link();
            if link.epoch != epoch {
                return false;
            }
            if link.status == status {
                return true;
            }
            link.status = status;
        }

        tracing::debug!(%status, "connection status changed");
        self.statuses.emit(&status);
        true
    }

    /// Install the outbound queue for `epoch`
    fn install(&self, epoch: u64, outbound: mpsc::UnboundedSender<String>) -> bool {
        let mut link = self.link();
        if link.epoch != epoch {
            return false;
        }
        link.outbound = Some(outbound);
        true
    }

    /// Drop the outbound queue for `epoch`
    fn uninstall(&self, epoch: u64) -> bool {
        let mut link = self.link();
        if link.epoch != epoch {
            return false;
        }
        link.outbound = None;
        true
    }

    fn handle_frame(&self, text: &str) {
        match protocol::decode_inbound(text) {
            Ok(InboundFrame::Response(reply)) => {
                tracing::debug!(
                    session_id = %reply.session_id,
                    products = reply.products.len(),
                    "assistant reply received"
                );
                self.replies.emit(&reply);
            }
            Ok(InboundFrame::Error(data)) => {
                tracing::warn!(data = ?data, "server reported an error");
            }
            Ok(InboundFrame::Query(_)) => {
                tracing::trace!("ignoring echoed query frame");
            }
            Ok(InboundFrame::Unknown(kind)) => {
                tracing::debug!(kind, "ignoring unknown frame type");
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to parse inbound frame");
            }
        }
    }
}

/// Own the socket for one epoch, reconnecting after unexpected closes
async fn supervise(
    shared: Arc<Shared>,
    epoch: u64,
    mut socket: Socket,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    loop {
        match pump(&shared, &mut socket, &mut outbound).await {
            PumpEnd::Local => {
                let _ = socket.close(None).await;
                return;
            }
            PumpEnd::Remote(reason) => {
                tracing::warn!(reason, "connection closed unexpectedly");
            }
        }

        if !shared.uninstall(epoch) {
            return;
        }
        shared.set_status(epoch, ConnectionStatus::Disconnected);

        match reconnect(&shared, epoch).await {
            Some((next_socket, next_outbound)) => {
                socket = next_socket;
                outbound = next_outbound;
            }
            None => return,
        }
    }
}

/// Shuttle frames until either side closes
async fn pump(
    shared: &Shared,
    socket: &mut Socket,
    outbound: &mut mpsc::UnboundedReceiver<String>,
) -> PumpEnd {
    loop {
        tokio::select! {
            inbound = socket.next() => match inbound {
                Some(Ok(Message::Text(text))) => shared.handle_frame(&text),
                Some(Ok(Message::Close(frame))) => {
                    return PumpEnd::Remote(frame.map_or_else(
                        || "closed by server".to_string(),
                        |f| format!("closed by server: {} {}", f.code, f.reason),
                    ));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return PumpEnd::Remote(e.to_string()),
                None => return PumpEnd::Remote("stream ended".to_string()),
            },
            frame = outbound.recv() => match frame {
                Some(json) => {
                    if let Err(e) = socket.send(Message::Text(json)).await {
                        return PumpEnd::Remote(format!("send failed: {e}"));
                    }
                }
                None => return PumpEnd::Local,
            },
        }
    }
}

/// Retry with linearly increasing delay until connected or out of budget
async fn reconnect(
    shared: &Shared,
    epoch: u64,
) -> Option<(Socket, mpsc::UnboundedReceiver<String>)> {
    let policy = shared.policy;
    let mut attempt = 0;

    loop {
        attempt += 1;
        if !policy.allows(attempt) {
            tracing::error!(
                max_attempts = policy.max_attempts,
                "reconnect attempts exhausted"
            );
            shared.set_status(epoch, ConnectionStatus::Error);
            return None;
        }

        let delay = policy.delay_for_attempt(attempt);
        tracing::info!(
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "attempting to reconnect"
        );
        tokio::time::sleep(delay).await;

        if !shared.set_status(epoch, ConnectionStatus::Connecting) {
            return None;
        }

        match connect_async(shared.url.as_str()).await {
            Ok((socket, _)) => {
                let (tx, rx) = mpsc::unbounded_channel();
                if !shared.install(epoch, tx) {
                    return None;
                }
                shared.set_status(epoch, ConnectionStatus::Connected);
                tracing::info!(attempt, "reconnected");
                return Some((socket, rx));
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "reconnect failed");
                shared.set_status(epoch, ConnectionStatus::Disconnected);
            }
        }
    }
}
