//! Streaming connection to the LogLens server.
//!
//! Reconnect policy lives in [`ConnectionMachine`], a small state machine that
//! does no IO and returns the action to perform next. [`spawn`] runs it on a
//! tokio task against a WebSocket endpoint and hands every parsed record to a
//! [`StreamSink`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::loglens_core::Record;

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(3_000);
pub const DEFAULT_STREAM_PATH: &str = "/ws";
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Open,
    /// Connection lost, one retry pending.
    Backoff,
}

impl ConnectionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Backoff => "backoff",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    ConnectRequested,
    Opened,
    /// Remote close, read error, or failed connect attempt.
    Lost,
    RetryElapsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionAction {
    OpenTransport,
    ScheduleRetry(Duration),
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    retry_delay: Duration,
    attempts: u64,
    drops: u64,
}

impl ConnectionMachine {
    pub fn new(retry_delay: Duration) -> Self {
        Self { state: ConnectionState::Idle, retry_delay, attempts: 0, drops: 0 }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn drops(&self) -> u64 {
        self.drops
    }

    /// Applies `event` and returns the action the driver must perform, if any.
    ///
    /// Requests that arrive while a connection is `Connecting` or `Open` are
    /// ignored, and a loss outside those states never schedules a second retry.
    pub fn handle(&mut self, event: ConnectionEvent) -> Option<ConnectionAction> {
        use ConnectionState::*;

        match (self.state, event) {
            (Idle | Backoff, ConnectionEvent::ConnectRequested)
            | (Backoff, ConnectionEvent::RetryElapsed) => {
                self.state = Connecting;
                self.attempts += 1;
                Some(ConnectionAction::OpenTransport)
            }
            (Connecting, ConnectionEvent::Opened) => {
                self.state = Open;
                None
            }
            (Connecting | Open, ConnectionEvent::Lost) => {
                self.state = Backoff;
                self.drops += 1;
                Some(ConnectionAction::ScheduleRetry(self.retry_delay))
            }
            (state, event) => {
                debug!(state = state.as_str(), ?event, "connection event ignored");
                None
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("unsupported server scheme `{0}` (expected http, https, ws, or wss)")]
    UnsupportedScheme(String),
}

/// Derives the stream endpoint from the server origin: `http` becomes `ws`,
/// `https` becomes `wss`, and the path is replaced by `path`.
pub fn stream_url(origin: &Url, path: &str) -> Result<Url, StreamError> {
    let scheme = match origin.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(StreamError::UnsupportedScheme(other.to_string())),
    };
    let mut url = origin.clone();
    url.set_scheme(scheme).map_err(|_| StreamError::UnsupportedScheme(origin.scheme().to_string()))?;
    url.set_path(path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub url: Url,
    pub retry_delay: Duration,
    /// Ping period while open. A session with no inbound traffic for two
    /// periods counts as lost. `None` disables the check.
    pub keepalive: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Record(Record),
    State(ConnectionState),
}

/// Receives stream output. Returns `false` once the consumer has gone away,
/// which stops the stream task.
pub trait StreamSink: Send + Sync + 'static {
    fn deliver(&self, event: StreamEvent) -> bool;
}

impl<F> StreamSink for F
where
    F: Fn(StreamEvent) -> bool + Send + Sync + 'static,
{
    fn deliver(&self, event: StreamEvent) -> bool {
        self(event)
    }
}

#[derive(Debug, Default)]
pub struct StreamStats {
    attempts: AtomicU64,
    drops: AtomicU64,
    delivered: AtomicU64,
    malformed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStatsSnapshot {
    pub attempts: u64,
    pub drops: u64,
    pub delivered: u64,
    pub malformed: u64,
}

impl StreamStats {
    pub fn snapshot(&self) -> StreamStatsSnapshot {
        StreamStatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            drops: self.drops.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

pub struct StreamHandle {
    task: JoinHandle<()>,
    state: watch::Receiver<ConnectionState>,
    stats: Arc<StreamStats>,
}

impl StreamHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn stats(&self) -> StreamStatsSnapshot {
        self.stats.snapshot()
    }

    /// Cancels the task, including a pending retry timer.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub async fn join(self) {
        let _ = self.task.await;
    }
}

pub fn spawn<S: StreamSink>(
    config: StreamConfig,
    sink: S,
    shutdown: broadcast::Receiver<()>,
) -> StreamHandle {
    let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
    let stats = Arc::new(StreamStats::default());
    let task_stats = stats.clone();
    let task = tokio::spawn(async move {
        run_stream(&config, &sink, shutdown, &state_tx, &task_stats).await;
        state_tx.send_replace(ConnectionState::Idle);
        info!(url = %config.url, "log stream stopped");
    });
    StreamHandle { task, state: state_rx, stats }
}

enum SessionEnd {
    Lost(String),
    ConsumerGone,
}

async fn run_stream<S: StreamSink>(
    config: &StreamConfig,
    sink: &S,
    mut shutdown: broadcast::Receiver<()>,
    state_tx: &watch::Sender<ConnectionState>,
    stats: &StreamStats,
) {
    let mut machine = ConnectionMachine::new(config.retry_delay);
    let mut action = machine.handle(ConnectionEvent::ConnectRequested);

    while let Some(next) = action.take() {
        if !publish(state_tx, sink, machine.state()) {
            return;
        }

        match next {
            ConnectionAction::OpenTransport => {
                stats.attempts.fetch_add(1, Ordering::Relaxed);
                let end = tokio::select! {
                    _ = shutdown.recv() => return,
                    end = run_session(config, &mut machine, sink, state_tx, stats) => end,
                };
                match end {
                    SessionEnd::ConsumerGone => return,
                    SessionEnd::Lost(reason) => {
                        warn!(url = %config.url, %reason, "log stream disconnected");
                        stats.drops.fetch_add(1, Ordering::Relaxed);
                        action = machine.handle(ConnectionEvent::Lost);
                    }
                }
            }
            ConnectionAction::ScheduleRetry(delay) => {
                info!(delay_ms = delay.as_millis() as u64, attempt = machine.attempts() + 1, "scheduling reconnect");
                tokio::select! {
                    _ = shutdown.recv() => return,
                    _ = tokio::time::sleep(delay) => {
                        action = machine.handle(ConnectionEvent::RetryElapsed);
                    }
                }
            }
        }
    }
}

async fn run_session<S: StreamSink>(
    config: &StreamConfig,
    machine: &mut ConnectionMachine,
    sink: &S,
    state_tx: &watch::Sender<ConnectionState>,
    stats: &StreamStats,
) -> SessionEnd {
    let url = &config.url;
    let mut socket = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok((socket, _response)) => socket,
        Err(err) => return SessionEnd::Lost(err.to_string()),
    };

    machine.handle(ConnectionEvent::Opened);
    if !publish(state_tx, sink, machine.state()) {
        return SessionEnd::ConsumerGone;
    }
    info!(url = %url, "connected to log stream");

    let mut ticker = config.keepalive.map(|period| {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    });
    let mut last_seen = Instant::now();

    loop {
        let message = tokio::select! {
            message = socket.next() => message,
            _ = next_tick(&mut ticker) => {
                let Some(period) = config.keepalive else { continue };
                let silent = last_seen.elapsed();
                if silent >= period * 2 {
                    return SessionEnd::Lost(format!("no traffic for {}ms", silent.as_millis()));
                }
                if let Err(err) = socket.send(Message::Ping(Vec::new())).await {
                    return SessionEnd::Lost(err.to_string());
                }
                continue;
            }
        };
        let Some(message) = message else {
            break;
        };
        last_seen = Instant::now();

        let payload = match message {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(bytes)) => bytes,
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|frame| format!("closed by server ({}): {}", frame.code, frame.reason))
                    .unwrap_or_else(|| "closed by server".to_string());
                return SessionEnd::Lost(reason);
            }
            Ok(_) => continue,
            Err(err) => return SessionEnd::Lost(err.to_string()),
        };

        match Record::from_slice(&payload) {
            Ok(record) => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
                if !sink.deliver(StreamEvent::Record(record)) {
                    return SessionEnd::ConsumerGone;
                }
            }
            Err(err) => {
                stats.malformed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, bytes = payload.len(), "dropping malformed record");
            }
        }
    }

    SessionEnd::Lost("stream ended".to_string())
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn publish<S: StreamSink>(
    state_tx: &watch::Sender<ConnectionState>,
    sink: &S,
    state: ConnectionState,
) -> bool {
    state_tx.send_replace(state);
    sink.deliver(StreamEvent::State(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn machine() -> ConnectionMachine {
        ConnectionMachine::new(Duration::from_millis(3_000))
    }

    #[test]
    fn connect_opens_transport_once() {
        let mut machine = machine();
        assert_eq!(machine.state(), ConnectionState::Idle);
        assert_eq!(machine.handle(ConnectionEvent::ConnectRequested), Some(ConnectionAction::OpenTransport));
        assert_eq!(machine.state(), ConnectionState::Connecting);
        assert_eq!(machine.handle(ConnectionEvent::ConnectRequested), None);
        assert_eq!(machine.handle(ConnectionEvent::Opened), None);
        assert_eq!(machine.state(), ConnectionState::Open);
        assert_eq!(machine.handle(ConnectionEvent::ConnectRequested), None);
        assert_eq!(machine.attempts(), 1);
    }

    #[test]
    fn drop_schedules_exactly_one_retry() {
        let mut machine = machine();
        machine.handle(ConnectionEvent::ConnectRequested);
        machine.handle(ConnectionEvent::Opened);

        assert_eq!(
            machine.handle(ConnectionEvent::Lost),
            Some(ConnectionAction::ScheduleRetry(Duration::from_millis(3_000)))
        );
        assert_eq!(machine.state(), ConnectionState::Backoff);
        assert_eq!(machine.handle(ConnectionEvent::Lost), None);
        assert_eq!(machine.drops(), 1);

        assert_eq!(machine.handle(ConnectionEvent::RetryElapsed), Some(ConnectionAction::OpenTransport));
        assert_eq!(machine.state(), ConnectionState::Connecting);
        assert_eq!(machine.attempts(), 2);
    }

    #[rstest]
    #[case(ConnectionState::Connecting)]
    #[case(ConnectionState::Open)]
    fn retry_while_active_is_a_no_op(#[case] active: ConnectionState) {
        let mut machine = machine();
        machine.handle(ConnectionEvent::ConnectRequested);
        if active == ConnectionState::Open {
            machine.handle(ConnectionEvent::Opened);
        }
        assert_eq!(machine.handle(ConnectionEvent::RetryElapsed), None);
        assert_eq!(machine.state(), active);
        assert_eq!(machine.attempts(), 1);
    }

    #[test]
    fn manual_connect_during_backoff_swallows_later_timer() {
        let mut machine = machine();
        machine.handle(ConnectionEvent::ConnectRequested);
        machine.handle(ConnectionEvent::Lost);
        assert_eq!(machine.handle(ConnectionEvent::ConnectRequested), Some(ConnectionAction::OpenTransport));
        assert_eq!(machine.handle(ConnectionEvent::RetryElapsed), None);
        assert_eq!(machine.attempts(), 2);
    }

    #[test]
    fn failed_attempts_retry_without_bound() {
        let mut machine = ConnectionMachine::new(Duration::from_millis(10));
        let mut action = machine.handle(ConnectionEvent::ConnectRequested);
        for _ in 0..1_000 {
            assert_eq!(action, Some(ConnectionAction::OpenTransport));
            assert_eq!(
                machine.handle(ConnectionEvent::Lost),
                Some(ConnectionAction::ScheduleRetry(Duration::from_millis(10)))
            );
            action = machine.handle(ConnectionEvent::RetryElapsed);
        }
        assert_eq!(machine.attempts(), 1_001);
        assert_eq!(machine.drops(), 1_000);
    }

    #[test]
    fn opened_outside_connecting_is_ignored() {
        let mut machine = machine();
        assert_eq!(machine.handle(ConnectionEvent::Opened), None);
        assert_eq!(machine.state(), ConnectionState::Idle);
        assert_eq!(machine.handle(ConnectionEvent::Lost), None);
        assert_eq!(machine.drops(), 0);
    }

    #[rstest]
    #[case("http://127.0.0.1:8080", "/ws", "ws://127.0.0.1:8080/ws")]
    #[case("https://logs.example.com/app/?x=1", "/ws", "wss://logs.example.com/ws")]
    #[case("ws://localhost:9000", "/stream", "ws://localhost:9000/stream")]
    fn stream_url_follows_origin(#[case] origin: &str, #[case] path: &str, #[case] expected: &str) {
        let origin = Url::parse(origin).unwrap();
        assert_eq!(stream_url(&origin, path).unwrap().as_str(), expected);
    }

    #[test]
    fn stream_url_rejects_other_schemes() {
        let origin = Url::parse("ftp://example.com").unwrap();
        assert!(matches!(stream_url(&origin, "/ws"), Err(StreamError::UnsupportedScheme(_))));
    }
}
