//! Session coordinator.
//!
//! One session binds an endpoint and identity to a transport, a reconnection
//! supervisor, the message router and the presence tracker. All connection
//! state lives in a single spawned task; the [`SessionHandle`] talks to it
//! over a command channel, and the task reports to the consumer through a
//! stream of [`Event`]s.
//!
//! ## Reconnection
//!
//! When the connection fails or the server closes it, the session retries
//! every `reconnect_interval` until a connection opens. A caller-initiated
//! [`SessionHandle::disconnect`] never triggers retries; only a new
//! [`SessionHandle::connect`] or [`SessionHandle::update_endpoint`] re-arms
//! them.
//!
//! ## Sending
//!
//! Sends never queue. If no connection is open the send reports `false` and,
//! unless the user disconnected, the reconnect loop is started. Chat
//! messages are stored locally before transmission either way.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::api::{ApiClient, UploadedFile};
use crate::config::{ClientConfig, ConnectionEndpoint};
use crate::event::{ConnectionState, Event};
use crate::presence::{PresenceTracker, TypingThrottle};
use crate::protocol::{self, ChatBody, ChatEvent, TypingEvent};
use crate::reconnect::{ReconnectTick, Reconnector};
use crate::router::{Routed, Router};
use crate::store::{ChatRecord, MessageStore};
use crate::transport::{Connector, Link, LinkEvent, LinkEventKind, LinkId, WsConnector};

/// Commands the consumer can send to the session.
#[derive(Debug)]
enum Command {
    Connect {
        identity: String,
    },
    UpdateEndpoint(ConnectionEndpoint),
    Disconnect,
    SendChat {
        receiver: String,
        body: ChatBody,
        reply: oneshot::Sender<bool>,
    },
    SendTyping {
        receiver: String,
        reply: oneshot::Sender<bool>,
    },
    OpenConversation {
        peer: String,
        reply: oneshot::Sender<Vec<ChatRecord>>,
    },
    CloseConversation,
    Status {
        reply: oneshot::Sender<ConnectionState>,
    },
}

/// A handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<Command>,
    presence: PresenceTracker,
}

impl SessionHandle {
    /// Connect as `identity`, cancelling any reconnect loop and replacing any
    /// existing connection.
    pub async fn connect(&self, identity: &str) -> Result<()> {
        self.cmd_tx
            .send(Command::Connect {
                identity: identity.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Tear down the current connection and connect fresh to `endpoint`.
    pub async fn update_endpoint(&self, endpoint: ConnectionEndpoint) -> Result<()> {
        self.cmd_tx.send(Command::UpdateEndpoint(endpoint)).await?;
        Ok(())
    }

    /// Close gracefully and stay disconnected until the next `connect`.
    pub async fn disconnect(&self) -> Result<()> {
        self.cmd_tx.send(Command::Disconnect).await?;
        Ok(())
    }

    /// Store and send a text message. Blank text is ignored.
    ///
    /// Returns whether the frame was handed to an open connection.
    pub async fn send_text(&self, receiver: &str, text: &str) -> Result<bool> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(false);
        }
        self.send_chat(receiver, ChatBody::Text(text.to_string()))
            .await
    }

    /// Store and send a message pointing at an already uploaded file.
    pub async fn send_file(&self, receiver: &str, file: &UploadedFile) -> Result<bool> {
        self.send_chat(
            receiver,
            ChatBody::File {
                url: file.url.clone(),
                filename: file.filename.clone(),
            },
        )
        .await
    }

    /// Upload `path` and send it to `receiver`.
    ///
    /// An upload failure is returned as the error and nothing is sent or stored.
    pub async fn share_file(&self, api: &ApiClient, receiver: &str, path: &Path) -> Result<bool> {
        let uploaded = api.upload(path).await?;
        self.send_file(receiver, &uploaded).await
    }

    async fn send_chat(&self, receiver: &str, body: ChatBody) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::SendChat {
                receiver: receiver.to_string(),
                body,
                reply,
            })
            .await?;
        Ok(rx.await?)
    }

    /// Tell `receiver` we are typing, subject to the global throttle.
    ///
    /// Returns `false` when throttled or when no connection is open.
    pub async fn send_typing(&self, receiver: &str) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::SendTyping {
                receiver: receiver.to_string(),
                reply,
            })
            .await?;
        Ok(rx.await?)
    }

    /// Make `peer` the open conversation and return its local history.
    pub async fn open_conversation(&self, peer: &str) -> Result<Vec<ChatRecord>> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::OpenConversation {
                peer: peer.to_string(),
                reply,
            })
            .await?;
        Ok(rx.await?)
    }

    pub async fn close_conversation(&self) -> Result<()> {
        self.cmd_tx.send(Command::CloseConversation).await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<ConnectionState> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx.send(Command::Status { reply }).await?;
        Ok(rx.await?)
    }

    pub fn is_typing(&self, peer: &str) -> bool {
        self.presence.is_typing(peer)
    }

    pub fn typing_peers(&self) -> Vec<String> {
        self.presence.typing_peers()
    }
}

/// Start a session over the WebSocket transport and begin connecting as
/// `endpoint.identity`.
pub fn connect(
    config: ClientConfig,
    endpoint: ConnectionEndpoint,
    store: Arc<dyn MessageStore>,
) -> (SessionHandle, mpsc::Receiver<Event>) {
    let connector = Arc::new(WsConnector::new(
        config.connect_timeout,
        config.ping_interval,
    ));
    let identity = endpoint.identity.clone();
    let (handle, events) = start(config, endpoint, store, connector);
    // Fresh channel: cannot be full or closed.
    let _ = handle.cmd_tx.try_send(Command::Connect { identity });
    (handle, events)
}

/// Start an idle (disconnected) session with a custom connector.
///
/// The session runs in a spawned task until every handle is dropped.
pub fn start(
    config: ClientConfig,
    endpoint: ConnectionEndpoint,
    store: Arc<dyn MessageStore>,
    connector: Arc<dyn Connector>,
) -> (SessionHandle, mpsc::Receiver<Event>) {
    let (event_tx, event_rx) = mpsc::channel(config.event_buffer.max(1));
    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let (link_tx, link_rx) = mpsc::unbounded_channel();
    let (tick_tx, tick_rx) = mpsc::unbounded_channel();

    let presence = PresenceTracker::new(config.typing_expiry, event_tx.clone());
    let session = Session {
        router: Router::new(&endpoint.identity, &config.broadcast_identity, store),
        reconnector: Reconnector::new(config.reconnect_interval, tick_tx),
        throttle: TypingThrottle::new(config.typing_throttle),
        state: ConnectionState::Disconnected,
        auto_reconnect: false,
        link: None,
        next_link: 0,
        link_tx,
        connector,
        endpoint,
        presence: presence.clone(),
        events: event_tx,
        epoch: Instant::now(),
    };
    tokio::spawn(session.run(cmd_rx, link_rx, tick_rx));

    (SessionHandle { cmd_tx, presence }, event_rx)
}

struct Session {
    endpoint: ConnectionEndpoint,
    state: ConnectionState,
    /// Cleared by a caller-initiated disconnect.
    auto_reconnect: bool,
    connector: Arc<dyn Connector>,
    link: Option<Link>,
    next_link: LinkId,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
    reconnector: Reconnector,
    router: Router,
    presence: PresenceTracker,
    throttle: TypingThrottle,
    events: mpsc::Sender<Event>,
    /// Origin of the monotonic clock fed to the typing throttle.
    epoch: Instant,
}

impl Session {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<Command>,
        mut link_rx: mpsc::UnboundedReceiver<LinkEvent>,
        mut tick_rx: mpsc::UnboundedReceiver<ReconnectTick>,
    ) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd).await,
                    None => break,
                },
                Some(event) = link_rx.recv() => self.handle_link_event(event).await,
                Some(tick) = tick_rx.recv() => self.handle_tick(tick).await,
            }
        }
        tracing::debug!("All session handles dropped, shutting down");
        self.teardown();
        self.presence.shutdown();
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect { identity } => {
                self.teardown();
                self.endpoint.identity = identity;
                self.router.set_identity(&self.endpoint.identity);
                self.auto_reconnect = true;
                self.open_link().await;
            }
            Command::UpdateEndpoint(endpoint) => {
                self.teardown();
                tracing::info!(host = %endpoint.host, port = endpoint.port, "Endpoint changed");
                self.router.set_identity(&endpoint.identity);
                self.endpoint = endpoint;
                self.auto_reconnect = true;
                self.open_link().await;
            }
            Command::Disconnect => {
                self.teardown();
                self.auto_reconnect = false;
                self.set_state(ConnectionState::Disconnected).await;
            }
            Command::SendChat {
                receiver,
                body,
                reply,
            } => {
                let event = ChatEvent {
                    sender: self.endpoint.identity.clone(),
                    receiver,
                    body,
                    timestamp: protocol::now_ms(),
                };
                self.router.record_outbound(&event);
                let sent = self.transmit(protocol::encode_chat(&event)).await;
                let _ = reply.send(sent);
            }
            Command::SendTyping { receiver, reply } => {
                let now = self.epoch.elapsed().as_millis() as i64;
                let sent = if self.throttle.should_send(now) {
                    let frame = protocol::encode_typing(&TypingEvent {
                        sender: self.endpoint.identity.clone(),
                        receiver,
                    });
                    self.transmit(frame).await
                } else {
                    false
                };
                let _ = reply.send(sent);
            }
            Command::OpenConversation { peer, reply } => {
                let history = self.router.open_conversation(&peer);
                let _ = reply.send(history);
            }
            Command::CloseConversation => self.router.close_conversation(),
            Command::Status { reply } => {
                let _ = reply.send(self.state.clone());
            }
        }
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        if self.link.as_ref().map(Link::id) != Some(event.link) {
            tracing::trace!(link = event.link, "Ignoring event from stale link");
            return;
        }
        match event.kind {
            LinkEventKind::Opened => {
                tracing::info!(url = %self.endpoint.ws_url(), "Connected");
                self.reconnector.cancel();
                self.set_state(ConnectionState::Connected).await;
            }
            LinkEventKind::Frame(text) => {
                tracing::debug!(frame = %text, "Inbound frame");
                match self.router.route_inbound(&text) {
                    Routed::Typing(typing) => self.presence.on_typing(&typing.sender).await,
                    Routed::Chat {
                        record,
                        surface: true,
                    } => self.emit(Event::Message { record }).await,
                    Routed::Chat { .. } | Routed::Dropped => {}
                }
            }
            LinkEventKind::Closing { code, reason } => {
                tracing::warn!(code, reason = %reason, "Connection closed by server");
                self.link = None;
                self.set_state(ConnectionState::Disconnected).await;
                self.begin_reconnect().await;
            }
            LinkEventKind::Failed(reason) => {
                tracing::warn!(reason = %reason, "Connection failed");
                self.link = None;
                self.set_state(ConnectionState::Failed(reason)).await;
                self.begin_reconnect().await;
            }
        }
    }

    async fn handle_tick(&mut self, tick: ReconnectTick) {
        if !self.reconnector.accepts(&tick) || !self.auto_reconnect {
            return;
        }
        tracing::info!(attempt = tick.attempt, "Reconnect attempt");
        self.open_link().await;
    }

    /// Hand a frame to the open link, or start reconnecting if there is none.
    async fn transmit(&mut self, frame: String) -> bool {
        let sent = self
            .link
            .as_ref()
            .is_some_and(|link| link.send(frame));
        if !sent {
            tracing::warn!(state = %self.state, "Send failed, connection not open");
            if self.auto_reconnect && !self.reconnector.is_active() {
                self.begin_reconnect().await;
            }
        }
        sent
    }

    /// Start (or restart) the reconnect loop unless the user disconnected.
    async fn begin_reconnect(&mut self) {
        if !self.auto_reconnect {
            return;
        }
        self.reconnector.start();
        self.set_state(ConnectionState::Reconnecting).await;
    }

    /// Replace the current link with a new connection attempt.
    async fn open_link(&mut self) {
        if let Some(old) = self.link.take() {
            old.close();
        }
        self.next_link += 1;
        let (link, remote) = Link::pair(self.next_link, self.link_tx.clone());
        let url = self.endpoint.ws_url();
        tracing::info!(url = %url, link = link.id(), "Connecting");
        self.link = Some(link);
        self.set_state(ConnectionState::Connecting).await;
        self.connector.open(url, remote);
    }

    /// Cancel the reconnect loop first, then close the live connection.
    fn teardown(&mut self) {
        self.reconnector.cancel();
        if let Some(link) = self.link.take() {
            link.close();
        }
    }

    async fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        tracing::debug!(from = %self.state, to = %state, "Connection state");
        self.state = state.clone();
        self.emit(Event::StatusChanged { state }).await;
    }

    async fn emit(&self, event: Event) {
        let _ = self.events.send(event).await;
    }
}
