//! SSE Broker — one subscription table and a dedicated fan-out task per
//! namespace, an actor-per-shard pattern driven entirely by a command
//! channel rather than a shared lock.

use std::collections::HashMap;

use bookmarks_core::{BrokerEvent, EventType, Namespace, SseConfig, SubscriptionId};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

/// The reply to a `subscribe` request: the new subscription's id, the
/// namespace's live connection count *including* this subscription, and
/// the receiver half the HTTP handler streams from.
pub struct SubscribeReply {
    pub id: SubscriptionId,
    pub connection_count: usize,
    pub events: mpsc::Receiver<BrokerEvent>,
}

enum Command {
    Subscribe {
        reply: oneshot::Sender<SubscribeReply>,
    },
    Unsubscribe {
        id: SubscriptionId,
    },
    Publish {
        event: BrokerEvent,
    },
    ConnectionCount {
        reply: oneshot::Sender<usize>,
    },
    ForceClose,
}

/// A handle to a running namespace actor. Cloning is cheap (an `mpsc`
/// sender); the actor task exits once every handle and the command channel
/// it holds are dropped.
#[derive(Clone)]
struct NamespaceHandle {
    commands: mpsc::Sender<Command>,
}

struct NamespaceActor {
    namespace: Namespace,
    config: SseConfig,
    subscriptions: HashMap<SubscriptionId, mpsc::Sender<BrokerEvent>>,
    commands: mpsc::Receiver<Command>,
}

impl NamespaceActor {
    fn spawn(namespace: Namespace, config: SseConfig) -> NamespaceHandle {
        let (tx, rx) = mpsc::channel(256);
        let actor = NamespaceActor {
            namespace,
            config,
            subscriptions: HashMap::new(),
            commands: rx,
        };
        tokio::spawn(actor.run());
        NamespaceHandle { commands: tx }
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    async fn run(mut self) {
        let mut heartbeat = tokio::time::interval(self.config.heartbeat_interval);
        heartbeat.tick().await; // first tick fires immediately; skip it
        info!("namespace actor started");
        loop {
            tokio::select! {
                cmd = self.commands.recv() => {
                    match cmd {
                        Some(cmd) => self.handle(cmd),
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    self.fan_out(BrokerEvent::new(
                        EventType::Heartbeat,
                        self.namespace.clone(),
                        json!({"type": "heartbeat", "timestamp": Utc::now()}),
                    ));
                }
            }
        }
        info!("namespace actor stopped");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Subscribe { reply } => {
                let id = SubscriptionId::generate();
                let (tx, rx) = mpsc::channel(self.config.subscriber_queue_capacity);
                self.subscriptions.insert(id.clone(), tx);
                info!(subscription = %id, count = self.subscriptions.len(), "subscribed");
                let _ = reply.send(SubscribeReply {
                    id,
                    connection_count: self.subscriptions.len(),
                    events: rx,
                });
            }
            Command::Unsubscribe { id } => {
                if self.subscriptions.remove(&id).is_some() {
                    info!(subscription = %id, count = self.subscriptions.len(), "unsubscribed");
                }
            }
            Command::Publish { event } => self.fan_out(event),
            Command::ConnectionCount { reply } => {
                let _ = reply.send(self.subscriptions.len());
            }
            Command::ForceClose => {
                self.fan_out(BrokerEvent::new(
                    EventType::Close,
                    self.namespace.clone(),
                    json!({"type": "connection_closing", "timestamp": Utc::now()}),
                ));
                self.subscriptions.clear();
            }
        }
    }

    /// Deliver `event` to every live subscription. Never blocks: a
    /// subscriber whose bounded queue is full is evicted rather than
    /// awaited.
    fn fan_out(&mut self, event: BrokerEvent) {
        let mut dead = Vec::new();
        for (id, tx) in self.subscriptions.iter() {
            if let Err(err) = tx.try_send(event.clone()) {
                warn!(subscription = %id, reason = %err, "evicting slow or closed subscriber");
                dead.push(id.clone());
            }
        }
        for id in dead {
            self.subscriptions.remove(&id);
        }
    }
}

/// The top-level broker: one [`NamespaceActor`] spawned lazily per
/// namespace on first `subscribe`/`publish`.
pub struct Broker {
    config: SseConfig,
    namespaces: DashMap<Namespace, NamespaceHandle>,
}

impl Broker {
    pub fn new(config: SseConfig) -> Self {
        Self {
            config,
            namespaces: DashMap::new(),
        }
    }

    fn handle_for(&self, namespace: &Namespace) -> NamespaceHandle {
        self.namespaces
            .entry(namespace.clone())
            .or_insert_with(|| NamespaceActor::spawn(namespace.clone(), self.config.clone()))
            .clone()
    }

    #[instrument(skip(self), fields(namespace = %namespace))]
    pub async fn subscribe(&self, namespace: &Namespace) -> SubscribeReply {
        let handle = self.handle_for(namespace);
        let (reply_tx, reply_rx) = oneshot::channel();
        // The actor only ever exits when every sender is dropped, including
        // the one stored in `self.namespaces`, so this channel send cannot
        // outlive the actor.
        if handle.commands.send(Command::Subscribe { reply: reply_tx }).await.is_err() {
            debug!("namespace actor vanished between lookup and subscribe");
        }
        reply_rx.await.expect("namespace actor dropped reply sender")
    }

    pub async fn unsubscribe(&self, namespace: &Namespace, id: SubscriptionId) {
        if let Some(handle) = self.namespaces.get(namespace) {
            let _ = handle.commands.send(Command::Unsubscribe { id }).await;
        }
    }

    #[instrument(skip(self, event), fields(namespace = %namespace, event_type = event.event_type.as_wire_str()))]
    pub async fn publish(&self, namespace: &Namespace, event: BrokerEvent) {
        let handle = self.handle_for(namespace);
        let _ = handle.commands.send(Command::Publish { event }).await;
    }

    /// Live subscriber count for one namespace, or the sum across all
    /// namespaces when `namespace` is `None`.
    pub async fn connection_count(&self, namespace: Option<&Namespace>) -> usize {
        match namespace {
            Some(ns) => {
                let Some(handle) = self.namespaces.get(ns).map(|h| h.clone()) else {
                    return 0;
                };
                let (reply_tx, reply_rx) = oneshot::channel();
                if handle.commands.send(Command::ConnectionCount { reply: reply_tx }).await.is_err() {
                    return 0;
                }
                reply_rx.await.unwrap_or(0)
            }
            None => {
                let handles: Vec<NamespaceHandle> =
                    self.namespaces.iter().map(|e| e.value().clone()).collect();
                let mut total = 0;
                for handle in handles {
                    let (reply_tx, reply_rx) = oneshot::channel();
                    if handle.commands.send(Command::ConnectionCount { reply: reply_tx }).await.is_ok() {
                        total += reply_rx.await.unwrap_or(0);
                    }
                }
                total
            }
        }
    }

    #[instrument(skip(self), fields(namespace = %namespace))]
    pub async fn force_close(&self, namespace: &Namespace) {
        if let Some(handle) = self.namespaces.get(namespace).map(|h| h.clone()) {
            let _ = handle.commands.send(Command::ForceClose).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bookmarks_core::EventType;

    #[tokio::test]
    async fn subscribe_reports_connection_count() {
        let broker = Broker::new(SseConfig::default());
        let ns = Namespace::from("default");
        let first = broker.subscribe(&ns).await;
        assert_eq!(first.connection_count, 1);
        let second = broker.subscribe(&ns).await;
        assert_eq!(second.connection_count, 2);
        assert_eq!(broker.connection_count(Some(&ns)).await, 2);
    }

    #[tokio::test]
    async fn publish_fans_out_to_all_subscribers() {
        let broker = Broker::new(SseConfig::default());
        let ns = Namespace::from("default");
        let mut a = broker.subscribe(&ns).await;
        let mut b = broker.subscribe(&ns).await;

        broker
            .publish(&ns, BrokerEvent::new(EventType::Trigger, ns.clone(), json!({"type": "trigger"})))
            .await;

        let got_a = a.events.recv().await.unwrap();
        let got_b = b.events.recv().await.unwrap();
        assert_eq!(got_a.event_type, EventType::Trigger);
        assert_eq!(got_b.event_type, EventType::Trigger);
    }

    #[tokio::test]
    async fn unsubscribe_drops_connection_count() {
        let broker = Broker::new(SseConfig::default());
        let ns = Namespace::from("default");
        let sub = broker.subscribe(&ns).await;
        broker.unsubscribe(&ns, sub.id).await;
        // give the actor a turn to process the command
        tokio::task::yield_now().await;
        assert_eq!(broker.connection_count(Some(&ns)).await, 0);
    }

    #[tokio::test]
    async fn force_close_ends_the_stream() {
        let broker = Broker::new(SseConfig::default());
        let ns = Namespace::from("default");
        let mut sub = broker.subscribe(&ns).await;
        broker.force_close(&ns).await;
        let close_frame = sub.events.recv().await.unwrap();
        assert_eq!(close_frame.event_type, EventType::Close);
        assert!(sub.events.recv().await.is_none());
    }
}
