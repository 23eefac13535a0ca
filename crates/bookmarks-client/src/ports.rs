//! Tab Port Registry — tracks which browser tab/worker port is attached to
//! which namespace, and fans outbound messages out to them. Same shape as
//! the broker's own subscriber bookkeeping (a `DashMap` keyed by the
//! entity, plus a reverse index by namespace), just on the client side of
//! the wire.

use bookmarks_core::{Namespace, PortId};
use dashmap::{DashMap, DashSet};
use tokio::sync::mpsc;
use tracing::trace;

use crate::protocol::OutboundMessage;

struct Port {
    namespace: Option<Namespace>,
    sink: mpsc::UnboundedSender<OutboundMessage>,
}

/// Registry of tab ports, keyed by [`PortId`], with a reverse index from
/// namespace to the ports currently attached to it.
#[derive(Default)]
pub struct PortRegistry {
    ports: DashMap<PortId, Port>,
    by_namespace: DashMap<Namespace, DashSet<PortId>>,
}

impl PortRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new, not-yet-attached port. Returns its id and the
    /// receiving half of its outbound channel.
    pub fn register(&self) -> (PortId, mpsc::UnboundedReceiver<OutboundMessage>) {
        let id = PortId::generate();
        let (tx, rx) = mpsc::unbounded_channel();
        self.ports.insert(id.clone(), Port { namespace: None, sink: tx });
        (id, rx)
    }

    /// Attach a port to a namespace, detaching it from any prior one.
    pub fn attach(&self, port_id: &PortId, namespace: Namespace) {
        self.detach(port_id);
        if let Some(mut port) = self.ports.get_mut(port_id) {
            port.namespace = Some(namespace.clone());
        }
        self.by_namespace.entry(namespace).or_default().insert(port_id.clone());
    }

    /// Detach a port from whichever namespace it currently holds, if any.
    /// Returns the namespace it was attached to.
    pub fn detach(&self, port_id: &PortId) -> Option<Namespace> {
        let previous = self.ports.get_mut(port_id).and_then(|mut port| port.namespace.take());
        if let Some(ns) = &previous {
            if let Some(set) = self.by_namespace.get(ns) {
                set.remove(port_id);
            }
        }
        previous
    }

    /// Remove a port entirely, e.g. when its tab closes.
    pub fn remove(&self, port_id: &PortId) {
        self.detach(port_id);
        self.ports.remove(port_id);
    }

    pub fn namespace_of(&self, port_id: &PortId) -> Option<Namespace> {
        self.ports.get(port_id).and_then(|p| p.namespace.clone())
    }

    pub fn namespace_port_count(&self, namespace: &Namespace) -> usize {
        self.by_namespace.get(namespace).map(|set| set.len()).unwrap_or(0)
    }

    pub fn ports_for(&self, namespace: &Namespace) -> Vec<PortId> {
        self.by_namespace
            .get(namespace)
            .map(|set| set.iter().map(|id| id.clone()).collect())
            .unwrap_or_default()
    }

    /// Send a message to one port, dropping it silently if the port has
    /// already gone away (its tab closed between the lookup and the send).
    pub fn send_to(&self, port_id: &PortId, message: OutboundMessage) {
        if let Some(port) = self.ports.get(port_id) {
            if port.sink.send(message).is_err() {
                trace!(port = %port_id, "dropped message to a closed port");
            }
        }
    }

    /// Broadcast a message to every port currently attached to `namespace`.
    pub fn broadcast(&self, namespace: &Namespace, message: OutboundMessage) {
        for port_id in self.ports_for(namespace) {
            self.send_to(&port_id, message.clone());
        }
    }
}
