//! Signaling relay connection lifecycle
//!
//! [`ConnectionManager`] owns the one relay connection a client may have.
//! `connect` while a connection is open or being opened is a logged no-op;
//! the state returns to `Closed` only when the link ends, which permits a
//! fresh `connect`.

use super::protocol::SignalingEnvelope;
use crate::session::events::{EventSender, SessionEvent};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Relay connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection; `connect` may be called
    Closed,
    /// Connection attempt in flight
    Connecting,
    /// Connection open; envelopes can be sent
    Open,
}

/// Both directions of an open relay link, one text frame per message
#[derive(Debug)]
pub struct SignalingLink {
    /// Frames to deliver to the relay; dropping this closes the link
    pub outbound: mpsc::UnboundedSender<String>,
    /// Frames received from the relay; ends when the relay closes
    pub inbound: mpsc::UnboundedReceiver<String>,
}

/// Opens relay links
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    /// Open a link to the relay at `url`
    async fn open(&self, url: &str) -> Result<SignalingLink>;
}

/// Anything envelopes can be sent through
pub trait SignalingSink: Send + Sync {
    /// Send one envelope
    ///
    /// # Errors
    ///
    /// Returns `Error::TransportNotOpen` when the connection is not open.
    fn send(&self, envelope: &SignalingEnvelope) -> Result<()>;
}

struct ConnectionInner {
    state: ConnectionState,
    generation: u64,
    outbound: Option<mpsc::UnboundedSender<String>>,
    reader: Option<JoinHandle<()>>,
}

/// Owner of the relay connection and its initiation latch
pub struct ConnectionManager {
    url: String,
    connector: Arc<dyn SignalingConnector>,
    events: EventSender,
    inner: Arc<Mutex<ConnectionInner>>,
}

impl ConnectionManager {
    /// Create a manager for the relay at `url`; nothing is opened yet
    pub fn new(url: &str, connector: Arc<dyn SignalingConnector>, events: EventSender) -> Self {
        Self {
            url: url.to_string(),
            connector,
            events,
            inner: Arc::new(Mutex::new(ConnectionInner {
                state: ConnectionState::Closed,
                generation: 0,
                outbound: None,
                reader: None,
            })),
        }
    }

    /// Open the relay connection
    ///
    /// Returns `Ok(false)` without touching the relay when a connection is
    /// already open or pending. Inbound frames are delivered as
    /// `SessionEvent::SignalingText`, followed by one
    /// `SessionEvent::SignalingClosed` when the link ends.
    pub async fn connect(&self) -> Result<bool> {
        let generation = {
            let mut inner = self.inner.lock();
            if inner.state != ConnectionState::Closed {
                info!(
                    state = ?inner.state,
                    "Signaling connection already active or pending, ignoring connect"
                );
                return Ok(false);
            }
            inner.state = ConnectionState::Connecting;
            inner.generation += 1;
            inner.generation
        };

        info!(url = %self.url, connection = generation, "Connecting to signaling relay");

        let link = match self.connector.open(&self.url).await {
            Ok(link) => link,
            Err(e) => {
                let mut inner = self.inner.lock();
                if inner.generation == generation {
                    inner.state = ConnectionState::Closed;
                }
                warn!(connection = generation, "Signaling connection failed: {}", e);
                return Err(e);
            }
        };

        let SignalingLink {
            outbound,
            mut inbound,
        } = link;

        let mut inner = self.inner.lock();
        if inner.generation != generation {
            // Closed while the attempt was in flight
            debug!(connection = generation, "Discarding superseded signaling link");
            return Ok(false);
        }
        inner.state = ConnectionState::Open;
        inner.outbound = Some(outbound);

        let events = self.events.clone();
        let shared = Arc::clone(&self.inner);
        inner.reader = Some(tokio::spawn(async move {
            while let Some(text) = inbound.recv().await {
                if events
                    .send(SessionEvent::SignalingText {
                        connection: generation,
                        text,
                    })
                    .is_err()
                {
                    break;
                }
            }

            {
                let mut inner = shared.lock();
                if inner.generation != generation {
                    return;
                }
                inner.state = ConnectionState::Closed;
                inner.outbound = None;
                inner.reader = None;
            }

            info!(connection = generation, "Signaling connection closed");
            let _ = events.send(SessionEvent::SignalingClosed {
                connection: generation,
            });
        }));

        info!(connection = generation, "Signaling connection open");
        Ok(true)
    }

    /// Close the relay connection and clear the latch
    ///
    /// Emits `SessionEvent::SignalingClosed` if a connection was open or pending.
    pub fn close(&self) {
        let generation = {
            let mut inner = self.inner.lock();
            if inner.state == ConnectionState::Closed {
                return;
            }
            if let Some(reader) = inner.reader.take() {
                reader.abort();
            }
            let closed = inner.generation;
            if inner.state == ConnectionState::Connecting {
                // Void the attempt still in flight
                inner.generation += 1;
            }
            inner.outbound = None;
            inner.state = ConnectionState::Closed;
            closed
        };

        info!(connection = generation, "Signaling connection closed locally");
        let _ = self.events.send(SessionEvent::SignalingClosed {
            connection: generation,
        });
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.inner.lock().state
    }

    /// Whether envelopes can currently be sent
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Generation of the current (or last) connection
    ///
    /// Events tagged with any other generation are stale.
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Relay URL
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl SignalingSink for ConnectionManager {
    fn send(&self, envelope: &SignalingEnvelope) -> Result<()> {
        let json = envelope.to_json()?;
        let inner = self.inner.lock();

        match (&inner.state, &inner.outbound) {
            (ConnectionState::Open, Some(tx)) => {
                tx.send(json).map_err(|_| {
                    Error::TransportNotOpen(format!(
                        "Relay link dropped before {} could be sent",
                        envelope.kind()
                    ))
                })?;
                debug!(kind = envelope.kind(), "Sent signaling envelope");
                Ok(())
            }
            (state, _) => Err(Error::TransportNotOpen(format!(
                "Cannot send {} while connection is {:?}",
                envelope.kind(),
                state
            ))),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(reader) = self.inner.lock().reader.take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::protocol::LoginRequest;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    /// Connector handing out in-memory links; waits on `gate` before completing
    struct TestConnector {
        opened: AtomicUsize,
        gate: Arc<Notify>,
        gated: bool,
        links: Mutex<Vec<(mpsc::UnboundedReceiver<String>, mpsc::UnboundedSender<String>)>>,
    }

    impl TestConnector {
        fn new(gated: bool) -> Arc<Self> {
            Arc::new(Self {
                opened: AtomicUsize::new(0),
                gate: Arc::new(Notify::new()),
                gated,
                links: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SignalingConnector for TestConnector {
        async fn open(&self, _url: &str) -> Result<SignalingLink> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            if self.gated {
                self.gate.notified().await;
            }
            let (out_tx, out_rx) = mpsc::unbounded_channel();
            let (in_tx, in_rx) = mpsc::unbounded_channel();
            self.links.lock().push((out_rx, in_tx));
            Ok(SignalingLink {
                outbound: out_tx,
                inbound: in_rx,
            })
        }
    }

    struct FailingConnector;

    #[async_trait]
    impl SignalingConnector for FailingConnector {
        async fn open(&self, url: &str) -> Result<SignalingLink> {
            Err(Error::WebSocketError(format!("refused: {}", url)))
        }
    }

    fn login() -> SignalingEnvelope {
        SignalingEnvelope::Login(LoginRequest {
            username: "u1".to_string(),
            passcode: "1234".to_string(),
        })
    }

    #[tokio::test]
    async fn test_send_before_connect_is_transport_error() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new("ws://relay", TestConnector::new(false), tx);

        let err = manager.send(&login()).unwrap_err();
        assert!(matches!(err, Error::TransportNotOpen(_)));
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_second_connect_is_noop() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let connector = TestConnector::new(false);
        let manager = ConnectionManager::new("ws://relay", connector.clone(), tx);

        assert!(manager.connect().await.unwrap());
        assert!(!manager.connect().await.unwrap());
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
        assert!(manager.is_open());
    }

    #[tokio::test]
    async fn test_connect_while_pending_is_noop() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let connector = TestConnector::new(true);
        let manager = ConnectionManager::new("ws://relay", connector.clone(), tx);

        let gate = connector.gate.clone();
        let first = manager.connect();
        let second = async {
            let result = manager.connect().await;
            gate.notify_one();
            result
        };
        let (first, second) = tokio::join!(first, second);

        assert!(first.unwrap());
        assert!(!second.unwrap());
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_connect_clears_latch() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new("ws://relay", Arc::new(FailingConnector), tx);

        assert!(manager.connect().await.is_err());
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(manager.connect().await.is_err());
    }

    #[tokio::test]
    async fn test_inbound_frames_and_remote_close() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connector = TestConnector::new(false);
        let manager = ConnectionManager::new("ws://relay", connector.clone(), tx);
        manager.connect().await.unwrap();
        let generation = manager.generation();

        manager.send(&login()).unwrap();
        let (mut relay_rx, relay_tx) = connector.links.lock().pop().unwrap();
        let sent = relay_rx.recv().await.unwrap();
        assert!(sent.contains("\"username\":\"u1\""));

        relay_tx
            .send(r#"{"type":"login","valid":"1"}"#.to_string())
            .unwrap();
        drop(relay_tx);

        match rx.recv().await.unwrap() {
            SessionEvent::SignalingText { connection, text } => {
                assert_eq!(connection, generation);
                assert!(text.contains("valid"));
            }
            other => panic!("Expected SignalingText, got {:?}", other),
        }
        match rx.recv().await.unwrap() {
            SessionEvent::SignalingClosed { connection } => assert_eq!(connection, generation),
            other => panic!("Expected SignalingClosed, got {:?}", other),
        }

        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(manager.connect().await.unwrap());
        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_local_close_emits_closed_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new("ws://relay", TestConnector::new(false), tx);
        manager.connect().await.unwrap();
        let generation = manager.generation();

        manager.close();
        manager.close();

        match rx.recv().await.unwrap() {
            SessionEvent::SignalingClosed { connection } => assert_eq!(connection, generation),
            other => panic!("Expected SignalingClosed, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
        assert!(manager.send(&login()).is_err());

        manager.connect().await.unwrap();
        assert_eq!(manager.generation(), generation + 1);
    }
}
