//! Typing presence: who is typing right now, and when we may say we are.
//!
//! Each peer gets at most one live expiry timer. A new typing signal aborts
//! the old timer and starts a fresh one, so the indicator stays on while
//! signals keep arriving and clears after a quiet `expiry`. Every timer
//! carries the generation it was started for; a timer that lost a race with
//! its replacement finds a newer generation and does nothing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::event::Event;

#[derive(Debug)]
struct PresenceEntry {
    is_typing: bool,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct Inner {
    entries: HashMap<String, PresenceEntry>,
    expiry: Duration,
    events: mpsc::Sender<Event>,
}

/// Per-peer typing state with auto-expiry. Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    inner: Arc<Mutex<Inner>>,
}

impl PresenceTracker {
    pub fn new(expiry: Duration, events: mpsc::Sender<Event>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                entries: HashMap::new(),
                expiry,
                events,
            })),
        }
    }

    /// Record a typing signal from `peer` and restart its expiry timer.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn on_typing(&self, peer: &str) {
        let (became_typing, events) = {
            let mut inner = self.inner.lock();
            let expiry = inner.expiry;
            let events = inner.events.clone();
            let entry = inner
                .entries
                .entry(peer.to_string())
                .or_insert(PresenceEntry {
                    is_typing: false,
                    generation: 0,
                    timer: None,
                });
            if let Some(old) = entry.timer.take() {
                old.abort();
            }
            entry.generation += 1;
            let became_typing = !entry.is_typing;
            entry.is_typing = true;
            entry.timer = Some(tokio::spawn(expire(
                self.inner.clone(),
                peer.to_string(),
                entry.generation,
                expiry,
            )));
            (became_typing, events)
        };

        if became_typing {
            tracing::debug!(peer, "Peer started typing");
            let _ = events
                .send(Event::Typing {
                    peer: peer.to_string(),
                    is_typing: true,
                })
                .await;
        }
    }

    pub fn is_typing(&self, peer: &str) -> bool {
        self.inner
            .lock()
            .entries
            .get(peer)
            .is_some_and(|e| e.is_typing)
    }

    /// Peers currently typing, sorted.
    pub fn typing_peers(&self) -> Vec<String> {
        let inner = self.inner.lock();
        let mut peers: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_typing)
            .map(|(p, _)| p.clone())
            .collect();
        peers.sort();
        peers
    }

    /// Abort all pending timers. Entries are kept with `is_typing = false`.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        for entry in inner.entries.values_mut() {
            if let Some(timer) = entry.timer.take() {
                timer.abort();
            }
            entry.generation += 1;
            entry.is_typing = false;
        }
    }
}

async fn expire(inner: Arc<Mutex<Inner>>, peer: String, generation: u64, after: Duration) {
    tokio::time::sleep(after).await;
    let events = {
        let mut guard = inner.lock();
        let events = guard.events.clone();
        let Some(entry) = guard.entries.get_mut(&peer) else {
            return;
        };
        if entry.generation != generation {
            return;
        }
        entry.is_typing = false;
        entry.timer = None;
        events
    };
    tracing::debug!(peer = %peer, "Typing expired");
    let _ = events
        .send(Event::Typing {
            peer,
            is_typing: false,
        })
        .await;
}

/// Global gate on outbound typing signals, shared by all destinations.
#[derive(Debug, Clone)]
pub struct TypingThrottle {
    window_ms: i64,
    last_sent: Option<i64>,
}

impl TypingThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: window.as_millis() as i64,
            last_sent: None,
        }
    }

    /// True, recording `now_ms` as the last send, if at least one window has
    /// passed since the previous send. The first call always passes.
    pub fn should_send(&mut self, now_ms: i64) -> bool {
        if let Some(last) = self.last_sent
            && now_ms - last < self.window_ms
        {
            return false;
        }
        self.last_sent = Some(now_ms);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> (PresenceTracker, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(64);
        (PresenceTracker::new(Duration::from_secs(3), tx), rx)
    }

    #[test]
    fn throttle_window() {
        let mut t = TypingThrottle::new(Duration::from_millis(2000));
        assert!(t.should_send(10_000));
        assert!(!t.should_send(10_001));
        assert!(!t.should_send(11_999));
        assert!(t.should_send(12_000));
        assert!(!t.should_send(13_000));
    }

    #[test]
    fn throttle_rejected_calls_do_not_extend_window() {
        let mut t = TypingThrottle::new(Duration::from_millis(2000));
        assert!(t.should_send(0));
        for now in (100..2000).step_by(100) {
            assert!(!t.should_send(now));
        }
        assert!(t.should_send(2000));
    }

    #[test]
    fn throttle_first_call_passes_at_any_clock() {
        let mut t = TypingThrottle::new(Duration::from_millis(2000));
        assert!(t.should_send(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn typing_clears_after_expiry() {
        let (presence, mut rx) = tracker();
        presence.on_typing("alice").await;
        assert!(presence.is_typing("alice"));

        tokio::time::sleep(Duration::from_millis(2999)).await;
        assert!(presence.is_typing("alice"));

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(!presence.is_typing("alice"));

        assert_eq!(
            rx.recv().await,
            Some(Event::Typing { peer: "alice".into(), is_typing: true })
        );
        assert_eq!(
            rx.recv().await,
            Some(Event::Typing { peer: "alice".into(), is_typing: false })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_signals_extend_typing() {
        let (presence, mut rx) = tracker();
        for _ in 0..5 {
            presence.on_typing("alice").await;
            tokio::time::sleep(Duration::from_millis(2500)).await;
            assert!(presence.is_typing("alice"));
        }
        // 2500ms after the last signal; 500ms left.
        tokio::time::sleep(Duration::from_millis(499)).await;
        assert!(presence.is_typing("alice"));
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert!(!presence.is_typing("alice"));

        // One "started", one "stopped": no flicker in between.
        assert_eq!(
            rx.recv().await,
            Some(Event::Typing { peer: "alice".into(), is_typing: true })
        );
        assert_eq!(
            rx.recv().await,
            Some(Event::Typing { peer: "alice".into(), is_typing: false })
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn peers_expire_independently() {
        let (presence, _rx) = tracker();
        presence.on_typing("alice").await;
        tokio::time::sleep(Duration::from_millis(2000)).await;
        presence.on_typing("carol").await;
        assert_eq!(presence.typing_peers(), vec!["alice", "carol"]);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!presence.is_typing("alice"));
        assert!(presence.is_typing("carol"));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_timers() {
        let (presence, mut rx) = tracker();
        presence.on_typing("alice").await;
        let _ = rx.recv().await;
        presence.shutdown();
        assert!(!presence.is_typing("alice"));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unknown_peer_is_not_typing() {
        let (tx, _rx) = mpsc::channel(1);
        let presence = PresenceTracker::new(Duration::from_secs(3), tx);
        assert!(!presence.is_typing("nobody"));
        assert!(presence.typing_peers().is_empty());
    }
}
