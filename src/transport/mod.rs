//! Push transport: STOMP over a raw WebSocket.
//!
//! ## Design
//! - One [`StompTransport`] per sync instance, one live session at a time
//! - The session task owns the socket; callers only see a `watch` of
//!   [`ConnectionState`] and an `mpsc` stream of [`Delivery`] values
//! - Any failure (socket error, ERROR frame, heart-beat silence) ends the
//!   session attempt; the task waits a fixed delay and reconnects
//! - Subscriptions are re-issued on every successful handshake
//! - The transport holds no business state

pub mod stomp;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Result, SyncError};
use stomp::Frame;

// ── Public surface ───────────────────────────────────────────────

/// Connection status of one transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        })
    }
}

/// One `MESSAGE` frame, reduced to what consumers use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub destination: String,
    pub body: String,
}

/// Subscription-capable push channel.
pub trait PushChannel: Send + Sync {
    /// Start connecting in the background and subscribe to `topics` after
    /// every handshake. No-op while a session is already active.
    fn connect(&self, topics: Vec<String>, deliveries: mpsc::Sender<Delivery>);

    /// Connection state observer.
    fn state(&self) -> watch::Receiver<ConnectionState>;

    /// Tear the session down. Safe to call repeatedly.
    fn disconnect(&self);
}

/// Broker settings for a [`StompTransport`].
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub url: String,
    pub cookie: Option<String>,
    pub reconnect_delay: Duration,
    /// Client heart-beat offer `(cx, cy)` in milliseconds.
    pub heartbeat: (u64, u64),
}

impl TransportSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            url: config.push.broker_url.clone(),
            cookie: config.session_cookie.clone(),
            reconnect_delay: config.push.reconnect_delay(),
            heartbeat: (config.push.heartbeat_outgoing_ms, config.push.heartbeat_incoming_ms),
        }
    }
}

/// STOMP client with automatic fixed-delay reconnect.
pub struct StompTransport {
    settings: TransportSettings,
    state_tx: watch::Sender<ConnectionState>,
    session: Mutex<Option<CancellationToken>>,
}

impl StompTransport {
    pub fn new(settings: TransportSettings) -> Self {
        Self {
            settings,
            state_tx: watch::Sender::new(ConnectionState::Disconnected),
            session: Mutex::new(None),
        }
    }
}

impl PushChannel for StompTransport {
    fn connect(&self, topics: Vec<String>, deliveries: mpsc::Sender<Delivery>) {
        let mut session = self.session.lock();
        if session.is_some() {
            tracing::debug!(url = %self.settings.url, "Push session already active");
            return;
        }

        let cancel = CancellationToken::new();
        let runner = SessionRunner {
            settings: self.settings.clone(),
            topics,
            deliveries,
            state_tx: self.state_tx.clone(),
            cancel: cancel.clone(),
        };
        tokio::spawn(runner.run());
        *session = Some(cancel);
    }

    fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn disconnect(&self) {
        if let Some(cancel) = self.session.lock().take() {
            tracing::debug!(url = %self.settings.url, "Push session teardown requested");
            cancel.cancel();
            self.state_tx.send_replace(ConnectionState::Disconnected);
        }
    }
}

impl Drop for StompTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ── Session task ─────────────────────────────────────────────────

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// How one connection attempt ended.
enum Ended {
    /// Teardown requested; do not reconnect.
    Cancelled,
    /// Nobody consumes deliveries anymore; do not reconnect.
    Abandoned,
}

struct SessionRunner {
    settings: TransportSettings,
    topics: Vec<String>,
    deliveries: mpsc::Sender<Delivery>,
    state_tx: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl SessionRunner {
    async fn run(self) {
        loop {
            self.set_state(ConnectionState::Connecting);
            let result = self.connect_once().await;
            self.set_state(ConnectionState::Disconnected);

            match result {
                Ok(Ended::Cancelled) => break,
                Ok(Ended::Abandoned) => {
                    tracing::debug!(
                        url = %self.settings.url,
                        "Delivery receiver gone, stopping push session"
                    );
                    break;
                }
                Err(e) => tracing::warn!(
                    url = %self.settings.url,
                    error = %e,
                    retry_ms = self.settings.reconnect_delay.as_millis() as u64,
                    "Push connection lost"
                ),
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
            }
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Publish `state` unless this session was torn down. A cancelled
    /// runner must not overwrite the state of a session started after it.
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if self.cancel.is_cancelled() || *current == state {
                return false;
            }
            tracing::info!(
                url = %self.settings.url,
                from = %current,
                to = %state,
                "Push state changed"
            );
            *current = state;
            true
        });
    }

    async fn connect_once(&self) -> Result<Ended> {
        let mut request = self
            .settings
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| SyncError::Transport(format!("invalid broker url: {e}")))?;
        if let Some(cookie) = &self.settings.cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| SyncError::Transport(format!("invalid session cookie: {e}")))?;
            request.headers_mut().insert(COOKIE, value);
        }
        let host = request.uri().host().unwrap_or("localhost").to_string();

        let ws = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(Ended::Cancelled),
            connected = tokio_tungstenite::connect_async(request) => {
                connected
                    .map_err(|e| SyncError::Transport(format!("websocket connect failed: {e}")))?
                    .0
            }
        };
        let (mut sink, mut stream) = ws.split();

        let (cx, cy) = self.settings.heartbeat;
        send_frame(&mut sink, &Frame::connect(&host, cx, cy)).await?;

        let connected = tokio::select! {
            _ = self.cancel.cancelled() => {
                let _ = sink.close().await;
                return Ok(Ended::Cancelled);
            }
            frame = await_connected(&mut stream) => frame?,
        };
        let (send_every, expect_every) =
            stomp::negotiate_heartbeat(self.settings.heartbeat, connected.get("heart-beat"));
        tracing::debug!(
            version = connected.get("version").unwrap_or("1.0"),
            send_every_ms = send_every.map(|d| d.as_millis() as u64),
            expect_every_ms = expect_every.map(|d| d.as_millis() as u64),
            "STOMP session established"
        );
        self.set_state(ConnectionState::Connected);

        for (i, topic) in self.topics.iter().enumerate() {
            send_frame(&mut sink, &Frame::subscribe(&format!("sub-{i}"), topic)).await?;
            tracing::debug!(topic = %topic, "Subscribed");
        }

        let mut beat = send_every.map(ticker);
        let mut watchdog = expect_every.map(ticker);
        let mut last_seen = Instant::now();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = send_frame(&mut sink, &Frame::disconnect()).await;
                    let _ = sink.close().await;
                    return Ok(Ended::Cancelled);
                }
                _ = next_tick(&mut beat) => {
                    sink.send(WsMessage::Text(stomp::HEARTBEAT.into()))
                        .await
                        .map_err(|e| SyncError::Transport(format!("heart-beat send failed: {e}")))?;
                }
                _ = next_tick(&mut watchdog) => {
                    if let Some(expect) = expect_every {
                        if last_seen.elapsed() > expect * 2 {
                            return Err(SyncError::Transport("broker heart-beat timed out".into()));
                        }
                    }
                }
                incoming = stream.next() => {
                    let message = match incoming {
                        None => {
                            return Err(SyncError::Transport("broker closed the stream".into()));
                        }
                        Some(Err(e)) => {
                            return Err(SyncError::Transport(format!("websocket error: {e}")));
                        }
                        Some(Ok(message)) => message,
                    };
                    last_seen = Instant::now();
                    let text = match message {
                        WsMessage::Text(text) => text.as_str().to_string(),
                        WsMessage::Binary(data) => String::from_utf8_lossy(&data).into_owned(),
                        WsMessage::Close(frame) => {
                            let reason = format!("broker closed the socket: {frame:?}");
                            return Err(SyncError::Transport(reason));
                        }
                        WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
                    };
                    if let Some(ended) = self.dispatch(&text).await? {
                        return Ok(ended);
                    }
                }
            }
        }
    }

    /// Route every frame of one WebSocket message.
    async fn dispatch(&self, text: &str) -> Result<Option<Ended>> {
        for frame in stomp::decode_all(text)? {
            match frame.command.as_str() {
                stomp::MESSAGE => {
                    let delivery = Delivery {
                        destination: frame.get("destination").unwrap_or_default().to_string(),
                        body: frame.body,
                    };
                    if self.deliveries.send(delivery).await.is_err() {
                        return Ok(Some(Ended::Abandoned));
                    }
                }
                stomp::ERROR => {
                    let message = frame.get("message").unwrap_or("no message").to_string();
                    return Err(SyncError::Transport(format!("broker error: {message}")));
                }
                other => tracing::trace!(command = other, "Ignoring STOMP frame"),
            }
        }
        Ok(None)
    }
}

async fn send_frame(
    sink: &mut futures_util::stream::SplitSink<WsStream, WsMessage>,
    frame: &Frame,
) -> Result<()> {
    sink.send(WsMessage::Text(frame.encode().into()))
        .await
        .map_err(|e| SyncError::Transport(format!("failed to send {}: {e}", frame.command)))
}

/// Read until the broker answers CONNECT.
async fn await_connected(
    stream: &mut futures_util::stream::SplitStream<WsStream>,
) -> Result<Frame> {
    while let Some(message) = stream.next().await {
        let message =
            message.map_err(|e| SyncError::Transport(format!("websocket error: {e}")))?;
        let text = match message {
            WsMessage::Text(text) => text.as_str().to_string(),
            WsMessage::Binary(data) => String::from_utf8_lossy(&data).into_owned(),
            WsMessage::Close(_) => break,
            _ => continue,
        };
        for frame in stomp::decode_all(&text)? {
            match frame.command.as_str() {
                stomp::CONNECTED => return Ok(frame),
                stomp::ERROR => {
                    let message = frame.get("message").unwrap_or("no message");
                    return Err(SyncError::Transport(format!("handshake rejected: {message}")));
                }
                _ => {}
            }
        }
    }
    Err(SyncError::Transport("socket closed before CONNECTED".into()))
}

fn ticker(period: Duration) -> Interval {
    let mut t = interval_at(Instant::now() + period, period);
    t.set_missed_tick_behavior(MissedTickBehavior::Delay);
    t
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(url: &str) -> TransportSettings {
        TransportSettings {
            url: url.into(),
            cookie: None,
            reconnect_delay: Duration::from_millis(50),
            heartbeat: (0, 0),
        }
    }

    #[test]
    fn settings_follow_config() {
        let mut config = Config::default();
        config.session_cookie = Some("JSESSIONID=abc".into());
        config.push.reconnect_delay_ms = 1234;

        let s = TransportSettings::from_config(&config);
        assert_eq!(s.url, "ws://localhost:8080/ws-lms/websocket");
        assert_eq!(s.cookie.as_deref(), Some("JSESSIONID=abc"));
        assert_eq!(s.reconnect_delay, Duration::from_millis(1234));
        assert_eq!(s.heartbeat, (10_000, 10_000));
    }

    #[tokio::test]
    async fn starts_disconnected_and_disconnect_is_idempotent() {
        let transport = StompTransport::new(settings("ws://127.0.0.1:9/ws"));
        assert_eq!(*transport.state().borrow(), ConnectionState::Disconnected);
        transport.disconnect();
        transport.disconnect();
    }

    #[tokio::test]
    async fn unreachable_broker_leaves_state_disconnected_after_teardown() {
        let transport = StompTransport::new(settings("ws://127.0.0.1:9/ws"));
        let (tx, _rx) = mpsc::channel(1);
        let mut state = transport.state();

        transport.connect(vec!["/user/queue/notifications".into()], tx.clone());
        transport.connect(vec!["/ignored".into()], tx);

        state
            .wait_for(|s| *s == ConnectionState::Connecting)
            .await
            .unwrap();
        transport.disconnect();
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == ConnectionState::Disconnected),
        )
        .await
        .unwrap()
        .unwrap();
    }
}
