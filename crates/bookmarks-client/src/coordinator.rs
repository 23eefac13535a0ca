//! Shared Coordinator — the single upstream SSE connection per namespace
//! that every tab port in this process shares, with its own reconnect
//! state machine. One [`NamespaceConnection`] actor per namespace, spawned
//! lazily on first `connect`, owns that link's entire lifecycle.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bookmarks_core::{Namespace, ReconnectConfig};
use chrono::Utc;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use rand::Rng;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::ports::PortRegistry;
use crate::protocol::{OutboundMessage, ReconnectingData};
use crate::sync_engine::SyncEngine;

/// The five states a namespace's upstream connection moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

/// Exponential backoff with jitter, per `ReconnectConfig`.
fn reconnect_delay(config: &ReconnectConfig, attempt: u32) -> std::time::Duration {
    let base_ms = config.base_delay.as_millis() as f64;
    let scaled = base_ms * config.multiplier.powi(attempt as i32);
    let capped = scaled.min(config.max_delay.as_millis() as f64);
    let jitter_range = capped * config.jitter;
    let jittered = if jitter_range > 0.0 {
        rand::rng().random_range(-jitter_range..=jitter_range)
    } else {
        0.0
    };
    let millis = (capped + jittered).max(0.0) as u64;
    std::time::Duration::from_millis(millis)
}

/// One namespace's upstream SSE connection and its reconnect loop.
pub struct NamespaceConnection {
    namespace: Namespace,
    base_url: String,
    reconnect: ReconnectConfig,
    http: reqwest::Client,
    ports: Arc<PortRegistry>,
    sync_engine: Arc<SyncEngine>,
    state: Mutex<ConnectionState>,
    attempt: AtomicU32,
}

impl NamespaceConnection {
    pub fn spawn(
        namespace: Namespace,
        base_url: String,
        reconnect: ReconnectConfig,
        http: reqwest::Client,
        ports: Arc<PortRegistry>,
        sync_engine: Arc<SyncEngine>,
    ) -> Arc<Self> {
        let conn = Arc::new(Self {
            namespace,
            base_url,
            reconnect,
            http,
            ports,
            sync_engine,
            state: Mutex::new(ConnectionState::Idle),
            attempt: AtomicU32::new(0),
        });
        let task_conn = conn.clone();
        tokio::spawn(async move { task_conn.run().await });
        conn
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.lock().await
    }

    async fn set_state(&self, new_state: ConnectionState) {
        *self.state.lock().await = new_state;
    }

    async fn run(self: Arc<Self>) {
        loop {
            self.set_state(ConnectionState::Connecting).await;
            self.ports.broadcast(
                &self.namespace,
                OutboundMessage::Connecting { namespace: self.namespace.clone(), request_id: None },
            );

            if let Err(err) = self.connect_and_stream().await {
                warn!(namespace = %self.namespace, error = %err, "upstream sse stream ended");
            }

            if self.ports.namespace_port_count(&self.namespace) == 0 {
                self.set_state(ConnectionState::Closed).await;
                debug!(namespace = %self.namespace, "no ports remain, closing connection");
                return;
            }

            self.enter_reconnecting().await;
        }
    }

    async fn connect_and_stream(self: &Arc<Self>) -> ClientResult<()> {
        let url = format!("{}/api/events?namespace={}", self.base_url, self.namespace);
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::ServerStatus {
                status: response.status().as_u16(),
                body: String::new(),
            });
        }

        self.set_state(ConnectionState::Connected).await;
        self.ports.broadcast(
            &self.namespace,
            OutboundMessage::Connected { namespace: self.namespace.clone(), request_id: None },
        );
        self.schedule_stability_reset();

        let mut stream = response.bytes_stream().eventsource();
        while let Some(event) = stream.next().await {
            let event = event.map_err(|e| ClientError::Stream(e.to_string()))?;
            self.handle_upstream_event(event.event, event.data).await;
            if self.ports.namespace_port_count(&self.namespace) == 0 {
                return Ok(());
            }
        }
        Err(ClientError::Stream("upstream closed the stream".to_string()))
    }

    async fn handle_upstream_event(self: &Arc<Self>, event_name: String, data: String) {
        match event_name.as_str() {
            "heartbeat" => {} // consumed internally, never surfaced to ports
            "connection" => {
                let parsed: serde_json::Value = serde_json::from_str(&data).unwrap_or(json!({}));
                if let Some(count) = parsed.get("connectionCount").and_then(|v| v.as_u64()) {
                    self.ports.broadcast(
                        &self.namespace,
                        OutboundMessage::ConnectionCount { count: count as usize, request_id: None },
                    );
                }
            }
            "close" => {
                self.ports.broadcast(
                    &self.namespace,
                    OutboundMessage::Disconnected { namespace: self.namespace.clone(), request_id: None },
                );
            }
            other => {
                let parsed: serde_json::Value = serde_json::from_str(&data).unwrap_or(json!({}));
                self.sync_engine.apply_remote_event(&self.namespace, other, &parsed).await;
                self.ports.broadcast(
                    &self.namespace,
                    OutboundMessage::Event { event_type: other.to_string(), data: parsed, request_id: None },
                );
                self.ports.broadcast(
                    &self.namespace,
                    OutboundMessage::DataChanged { namespace: self.namespace.clone(), nodes: None, request_id: None },
                );
            }
        }
    }

    async fn enter_reconnecting(self: &Arc<Self>) {
        self.set_state(ConnectionState::Reconnecting).await;
        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst);
        let delay = reconnect_delay(&self.reconnect, attempt);
        let next_retry_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        self.ports.broadcast(
            &self.namespace,
            OutboundMessage::Reconnecting {
                data: ReconnectingData { attempt, delay_ms: delay.as_millis() as u64, next_retry_at },
                request_id: None,
            },
        );
        tokio::time::sleep(delay).await;
    }

    /// After staying `Connected` for `stableThreshold`, forgive the
    /// attempt counter so a flaky-then-stable link doesn't keep growing
    /// its backoff.
    fn schedule_stability_reset(self: &Arc<Self>) {
        let this = self.clone();
        let threshold = this.reconnect.stable_threshold;
        tokio::spawn(async move {
            tokio::time::sleep(threshold).await;
            if this.state().await == ConnectionState::Connected {
                this.attempt.store(0, Ordering::SeqCst);
                debug!(namespace = %this.namespace, "connection stable, reconnect attempt counter reset");
            }
        });
    }
}
