//! Connection transport: one physical WebSocket per [`Link`].
//!
//! A link is opened through a [`Connector`], which reports the outcome
//! asynchronously on the session's link-event channel. Each link produces
//! exactly one of `Opened`/`Failed` after opening and, once open, exactly
//! one of `Closing`/`Failed` when it ends. After that the link is dead.
//!
//! The session owns the [`Link`] half (send/close). The connector owns the
//! [`LinkRemote`] half and drives the socket with it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

/// Close code sent on a caller-initiated close.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close reason sent on a caller-initiated close.
pub const CLOSE_REASON: &str = "User closed";

/// Identifies one connection attempt. Events from older links are stale.
pub type LinkId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEventKind {
    Opened,
    Frame(String),
    Closing { code: u16, reason: String },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkEvent {
    pub link: LinkId,
    pub kind: LinkEventKind,
}

/// Instructions from the session to the socket driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCommand {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Debug, Default)]
struct LinkFlags {
    open: AtomicBool,
    closed: AtomicBool,
}

/// Session-side handle to a connection.
#[derive(Debug)]
pub struct Link {
    id: LinkId,
    commands: mpsc::UnboundedSender<LinkCommand>,
    flags: Arc<LinkFlags>,
}

impl Link {
    /// Create both halves of a link reporting on `events`.
    pub fn pair(id: LinkId, events: mpsc::UnboundedSender<LinkEvent>) -> (Link, LinkRemote) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let flags = Arc::new(LinkFlags::default());
        let link = Link {
            id,
            commands: cmd_tx,
            flags: flags.clone(),
        };
        let remote = LinkRemote {
            id,
            commands: cmd_rx,
            events,
            flags,
        };
        (link, remote)
    }

    pub fn id(&self) -> LinkId {
        self.id
    }

    pub fn is_open(&self) -> bool {
        self.flags.open.load(Ordering::SeqCst) && !self.flags.closed.load(Ordering::SeqCst)
    }

    /// Queue a text frame. Returns `false` without queuing anything if the
    /// link is not open.
    pub fn send(&self, text: String) -> bool {
        if !self.is_open() {
            return false;
        }
        self.commands.send(LinkCommand::Text(text)).is_ok()
    }

    /// Graceful close with [`CLOSE_NORMAL`]. Safe to call repeatedly.
    pub fn close(&self) {
        if self.flags.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.flags.open.store(false, Ordering::SeqCst);
        let _ = self.commands.send(LinkCommand::Close {
            code: CLOSE_NORMAL,
            reason: CLOSE_REASON.to_string(),
        });
    }
}

/// Driver-side half of a link.
#[derive(Debug)]
pub struct LinkRemote {
    id: LinkId,
    commands: mpsc::UnboundedReceiver<LinkCommand>,
    events: mpsc::UnboundedSender<LinkEvent>,
    flags: Arc<LinkFlags>,
}

impl LinkRemote {
    pub fn id(&self) -> LinkId {
        self.id
    }

    fn emit(&self, kind: LinkEventKind) {
        let _ = self.events.send(LinkEvent {
            link: self.id,
            kind,
        });
    }

    /// The handshake completed. Ignored if the session already closed the link.
    pub fn opened(&self) {
        if self.flags.closed.load(Ordering::SeqCst) {
            return;
        }
        self.flags.open.store(true, Ordering::SeqCst);
        self.emit(LinkEventKind::Opened);
    }

    /// Hand an inbound text frame to the session.
    pub fn deliver(&self, text: String) {
        self.emit(LinkEventKind::Frame(text));
    }

    /// Next instruction from the session; `None` once the [`Link`] is dropped.
    pub async fn next_command(&mut self) -> Option<LinkCommand> {
        self.commands.recv().await
    }

    /// Non-blocking variant of [`next_command`](Self::next_command).
    pub fn try_command(&mut self) -> Option<LinkCommand> {
        self.commands.try_recv().ok()
    }

    /// The connection ended with a close handshake.
    pub fn closing(self, code: u16, reason: String) {
        self.flags.open.store(false, Ordering::SeqCst);
        self.emit(LinkEventKind::Closing { code, reason });
    }

    /// The connection could not be opened or broke.
    pub fn fail(self, reason: String) {
        self.flags.open.store(false, Ordering::SeqCst);
        self.emit(LinkEventKind::Failed(reason));
    }
}

/// Opens links. Must return immediately; outcomes go through the remote.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, url: String, remote: LinkRemote);
}

/// WebSocket connector over `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    pub connect_timeout: Duration,
    pub ping_interval: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration, ping_interval: Duration) -> Self {
        Self {
            connect_timeout,
            ping_interval,
        }
    }
}

impl Connector for WsConnector {
    fn open(&self, url: String, remote: LinkRemote) {
        tokio::spawn(run_link(
            url,
            remote,
            self.connect_timeout,
            self.ping_interval,
        ));
    }
}

async fn run_link(
    url: String,
    mut remote: LinkRemote,
    connect_timeout: Duration,
    ping_interval: Duration,
) {
    tracing::debug!(link = remote.id(), %url, "Connecting");

    let ws = tokio::select! {
        result = tokio::time::timeout(connect_timeout, tokio_tungstenite::connect_async(url.as_str())) => {
            match result {
                Ok(Ok((ws, _response))) => ws,
                Ok(Err(e)) => {
                    remote.fail(e.to_string());
                    return;
                }
                Err(_) => {
                    remote.fail(format!("connect timed out after {}s", connect_timeout.as_secs()));
                    return;
                }
            }
        }
        cmd = remote.next_command() => {
            // Closed before the handshake finished; nothing to tear down.
            let (code, reason) = match cmd {
                Some(LinkCommand::Close { code, reason }) => (code, reason),
                _ => (CLOSE_NORMAL, CLOSE_REASON.to_string()),
            };
            remote.closing(code, reason);
            return;
        }
    };

    remote.opened();
    tracing::debug!(link = remote.id(), "WebSocket open");

    let (mut sink, mut stream) = ws.split();
    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + ping_interval,
        ping_interval,
    );

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => remote.deliver(text.to_string()),
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    remote.closing(code, reason);
                    return;
                }
                // Binary frames are not part of the protocol; ping/pong is handled by tungstenite.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    remote.fail(e.to_string());
                    return;
                }
                None => {
                    remote.fail("connection closed without close frame".to_string());
                    return;
                }
            },
            cmd = remote.next_command() => match cmd {
                Some(LinkCommand::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        remote.fail(e.to_string());
                        return;
                    }
                }
                Some(LinkCommand::Close { code, reason }) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    let _ = sink.close().await;
                    remote.closing(code, reason);
                    return;
                }
                None => {
                    let _ = sink.close().await;
                    remote.closing(CLOSE_NORMAL, CLOSE_REASON.to_string());
                    return;
                }
            },
            _ = ping.tick() => {
                if let Err(e) = sink.send(Message::Ping(Default::default())).await {
                    remote.fail(e.to_string());
                    return;
                }
            }
        }
    }
}
