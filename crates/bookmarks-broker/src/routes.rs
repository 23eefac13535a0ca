//! The HTTP surface, built with `axum`.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, head, post};
use axum::{Json, Router};
use bookmarks_core::{BrokerEvent, EventType, Namespace, Node, NodeId, OperationEnvelope};
use chrono::Utc;
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use crate::applicator::{ApplyOutcome, SyncResponse};
use crate::broker::Broker;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct NamespaceQuery {
    pub namespace: Namespace,
}

/// Drops to unsubscribe the moment the SSE stream is abandoned, whether
/// the client disconnects cleanly or the connection is simply dropped.
struct UnsubscribeOnDrop {
    broker: Arc<Broker>,
    namespace: Namespace,
    id: bookmarks_core::SubscriptionId,
}

impl Drop for UnsubscribeOnDrop {
    fn drop(&mut self) {
        let broker = self.broker.clone();
        let namespace = self.namespace.clone();
        let id = self.id.clone();
        tokio::spawn(async move { broker.unsubscribe(&namespace, id).await });
    }
}

fn to_sse_event(event: &BrokerEvent) -> Event {
    let data = serde_json::to_string(&event.data).unwrap_or_else(|_| "{}".to_string());
    Event::default()
        .id(event.id.clone())
        .event(event.event_type.as_wire_str())
        .data(data)
}

#[instrument(skip(state), fields(namespace = %query.namespace))]
pub async fn sse_events(
    State(state): State<AppState>,
    Query(query): Query<NamespaceQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let namespace = query.namespace;
    let reply = state.broker.subscribe(&namespace).await;
    let guard = UnsubscribeOnDrop {
        broker: state.broker.clone(),
        namespace: namespace.clone(),
        id: reply.id.clone(),
    };

    let initial = BrokerEvent::new(
        EventType::Connection,
        namespace.clone(),
        json!({
            "type": "connection",
            "subId": reply.id.to_string(),
            "namespace": namespace.to_string(),
            "connectionCount": reply.connection_count,
            "timestamp": Utc::now(),
        }),
    );

    let tail = stream::unfold((reply.events, guard), |(mut rx, guard)| async move {
        rx.recv().await.map(|event| (event, (rx, guard)))
    });

    let combined = stream::once(async move { initial }).chain(tail).map(|event| Ok(to_sse_event(&event)));
    Sse::new(combined)
}

#[derive(Debug, Deserialize)]
pub struct ConnectionsQuery {
    pub namespace: Option<Namespace>,
}

pub async fn connections(State(state): State<AppState>, Query(query): Query<ConnectionsQuery>) -> Json<serde_json::Value> {
    let count = state.broker.connection_count(query.namespace.as_ref()).await;
    Json(json!({ "connections": count }))
}

pub async fn ping() -> StatusCode {
    StatusCode::OK
}

#[cfg(feature = "direct-apply")]
pub async fn apply_operation(
    State(state): State<AppState>,
    Path(ns): Path<String>,
    Json(mut envelope): Json<OperationEnvelope>,
) -> Json<ApplyOutcome> {
    envelope.namespace = Namespace::from(ns);
    Json(state.applicator.apply_one(envelope).await)
}

#[derive(Debug, Deserialize)]
pub struct SyncRequestBody {
    #[serde(rename = "clientId")]
    pub client_id: String,
    pub operations: Vec<OperationEnvelope>,
}

pub async fn sync_operations(
    State(state): State<AppState>,
    Path(ns): Path<String>,
    Json(body): Json<SyncRequestBody>,
) -> Json<SyncResponse> {
    let namespace = Namespace::from(ns);
    Json(state.applicator.apply_batch(&namespace, body.operations).await)
}

pub async fn tree_node(
    State(state): State<AppState>,
    Path((ns, id)): Path<(String, String)>,
) -> Json<serde_json::Value> {
    let namespace = Namespace::from(ns);
    let root_id = NodeId::from(id);
    let nodes = state.applicator.subtree(&namespace, &root_id).await;
    let by_id: HashMap<String, Node> = nodes.into_iter().map(|n| (n.id().to_string(), n)).collect();
    Json(json!({ "rootId": root_id.to_string(), "nodes": by_id }))
}

pub async fn namespaces(State(state): State<AppState>) -> Json<serde_json::Value> {
    let data = state.applicator.namespaces().await;
    Json(json!({ "data": data }))
}

pub fn router(state: AppState) -> Router {
    let router = Router::new()
        .route("/api/events", get(sse_events))
        .route("/api/connections", get(connections))
        .route("/api/ping", head(ping))
        .route("/api/sync/{ns}/operations", post(sync_operations))
        .route("/api/{ns}/tree/node/{id}", get(tree_node))
        .route("/api/namespaces", get(namespaces));

    #[cfg(feature = "direct-apply")]
    let router = router.route("/api/{ns}/operations/apply", post(apply_operation));

    router
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}
