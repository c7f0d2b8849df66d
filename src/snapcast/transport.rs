//! Long-lived JSON-RPC 2.0 client to `snapserver` over TCP (spec §4.1).
//!
//! Framing is newline-delimited JSON-RPC. Requests are correlated to
//! responses by a monotonically increasing integer id via a one-shot
//! channel per in-flight call, the way the teacher's CLI read loop in
//! `adapters/lms.rs` pairs a `read_line` loop with `tokio::select!`
//! against a shutdown token — generalised here to also demultiplex
//! notifications to subscribers and to carry id-keyed response channels.

use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SnapDogError;
use crate::snapcast::protocol::{
    parse_line, JsonRpcRequest, ServerMessage, SnapcastEventKind, SnapcastNotification,
};

/// Exponential backoff with full jitter (spec §4.1: initial 500ms, cap 30s).
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        ReconnectBackoff {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl ReconnectBackoff {
    /// Doubles `attempt_cap` (capped at `max`) and returns a uniformly
    /// random delay in `[0, attempt_cap]` — "full jitter" per the spec.
    fn next_delay(&self, attempt_cap: &mut Duration) -> Duration {
        let cap = *attempt_cap;
        *attempt_cap = (cap * 2).min(self.max);
        let millis = cap.as_millis().max(1) as u64;
        let jittered = rand::thread_rng().gen_range(0..=millis);
        Duration::from_millis(jittered)
    }
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, SnapDogError>>>>>;

pub struct SnapcastTransport {
    host: String,
    port: u16,
    request_timeout: Duration,
    writer: Arc<Mutex<Option<tokio::net::tcp::OwnedWriteHalf>>>,
    pending: PendingMap,
    next_id: AtomicU64,
    notify_tx: broadcast::Sender<SnapcastNotification>,
    connected_tx: watch::Sender<bool>,
    connected_rx: watch::Receiver<bool>,
    shutdown: CancellationToken,
    backoff: ReconnectBackoff,
}

impl SnapcastTransport {
    pub fn new(host: String, port: u16, request_timeout: Duration) -> Arc<Self> {
        let (notify_tx, _) = broadcast::channel(1024);
        let (connected_tx, connected_rx) = watch::channel(false);
        Arc::new(SnapcastTransport {
            host,
            port,
            request_timeout,
            writer: Arc::new(Mutex::new(None)),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            notify_tx,
            connected_tx,
            connected_rx,
            shutdown: CancellationToken::new(),
            backoff: ReconnectBackoff::default(),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SnapcastNotification> {
        self.notify_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected_rx.borrow()
    }

    pub fn connection_watch(&self) -> watch::Receiver<bool> {
        self.connected_rx.clone()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancels pending requests with a cancellation error and stops the
    /// reconnect loop.
    pub async fn close(&self) {
        self.shutdown.cancel();
        self.fail_all_pending(SnapDogError::Cancelled("transport closed".into()))
            .await;
    }

    async fn fail_all_pending(&self, err: SnapDogError) {
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(err.clone()));
        }
    }

    /// `request(method, params) → result | error`, with a per-call timeout.
    /// Fails fast with `Unavailable` if currently disconnected.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, SnapDogError> {
        if !self.is_connected() {
            return Err(SnapDogError::Unavailable(format!(
                "snapcast transport disconnected, cannot call {method}"
            )));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let req = JsonRpcRequest::new(id, method, params);
        let line = req
            .to_line()
            .map_err(|e| SnapDogError::Internal(format!("failed to encode request: {e}")))?;

        {
            let mut guard = self.writer.lock().await;
            match guard.as_mut() {
                Some(w) => {
                    if let Err(e) = w.write_all(line.as_bytes()).await {
                        self.pending.lock().await.remove(&id);
                        return Err(SnapDogError::Unavailable(format!("write failed: {e}")));
                    }
                }
                None => {
                    self.pending.lock().await.remove(&id);
                    return Err(SnapDogError::Unavailable("not connected".into()));
                }
            }
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SnapDogError::Cancelled(format!("{method} cancelled"))),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(SnapDogError::DeadlineExceeded(format!(
                    "{method} timed out after {:?}",
                    self.request_timeout
                )))
            }
        }
    }

    /// Drives the persistent connection: connect, read loop, and on any
    /// disconnection, reconnect with exponential backoff and full jitter.
    /// Runs until `close()`/the shutdown token fires.
    pub async fn run(self: Arc<Self>) {
        let mut attempt_cap = self.backoff.initial;

        loop {
            if self.shutdown.is_cancelled() {
                return;
            }

            match self.connect_and_serve().await {
                Ok(()) => {
                    // Clean shutdown requested mid-connection.
                    return;
                }
                Err(e) => {
                    warn!("snapcast transport error: {e}, reconnecting");
                    self.connected_tx.send_replace(false);
                    self.fail_all_pending(SnapDogError::Unavailable(e.to_string()))
                        .await;

                    let delay = self.backoff.next_delay(&mut attempt_cap);
                    debug!("reconnecting to snapcast in {:?}", delay);
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn connect_and_serve(self: &Arc<Self>) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let stream = TcpStream::connect(&addr).await?;
        info!("connected to snapserver at {addr}");

        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(write_half);

        // A fresh connection resets the attempt counter implicitly because
        // this function only returns (to the retry loop) on disconnection.
        self.connected_tx.send_replace(true);

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        loop {
            line.clear();
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    *self.writer.lock().await = None;
                    self.connected_tx.send_replace(false);
                    return Ok(());
                }
                result = reader.read_line(&mut line) => {
                    match result {
                        Ok(0) => anyhow::bail!("snapserver closed the connection"),
                        Ok(_) => self.handle_line(line.trim_end()).await,
                        Err(e) => anyhow::bail!("read error: {e}"),
                    }
                }
            }
        }
    }

    async fn handle_line(&self, line: &str) {
        if line.is_empty() {
            return;
        }
        match parse_line(line) {
            Ok(ServerMessage::Response { id, result }) => {
                if let Some(tx) = self.pending.lock().await.remove(&id) {
                    let mapped = result.map_err(|e| SnapDogError::Unavailable(e.message));
                    let _ = tx.send(mapped);
                } else {
                    warn!("snapcast response for unknown request id {id}, dropping");
                }
            }
            Ok(ServerMessage::Notification { method, params }) => {
                let kind = SnapcastEventKind::from_method(&method);
                let _ = self.notify_tx.send(SnapcastNotification { kind, params });
            }
            Err(e) => {
                warn!("failed to parse snapcast line: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let backoff = ReconnectBackoff::default();
        let mut cap = backoff.initial;
        let mut caps = vec![cap];
        for _ in 0..6 {
            backoff.next_delay(&mut cap);
            caps.push(cap);
        }
        // 500ms, 1s, 2s, 4s, 8s, 16s, 30s(cap)
        let expected_ms = [500, 1000, 2000, 4000, 8000, 16000, 30000];
        for (cap, expected) in caps.iter().zip(expected_ms) {
            assert_eq!(cap.as_millis() as u64, expected);
        }
    }

    #[test]
    fn jittered_delay_never_exceeds_cap() {
        let backoff = ReconnectBackoff::default();
        let mut cap = Duration::from_secs(4);
        for _ in 0..50 {
            let mut probe = cap;
            let delay = backoff.next_delay(&mut probe);
            assert!(delay <= cap);
        }
    }

    #[tokio::test]
    async fn request_fails_fast_when_disconnected() {
        let transport = SnapcastTransport::new("127.0.0.1".into(), 1, Duration::from_millis(50));
        let err = transport.request("Server.GetStatus", None).await.unwrap_err();
        assert!(matches!(err, SnapDogError::Unavailable(_)));
    }
}
