//! Broadcaster: consumes `TriggerEvent`s and fans typed JSON
//! messages out to every connected WebSocket client.
//!
//! The upgrade handler itself mirrors the shape the reference corpus's
//! Axum WebSocket server uses (`WebSocketUpgrade` + `State` extractors,
//! `on_upgrade` handing off to a per-connection task); the REST router that
//! would mount `ws_upgrade_handler` is external to this crate.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::broker::{Broker, TriggerEvent};
use crate::domain::{Incident, Service, ServiceState};

/// One outbound dashboard message, tagged by kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DashboardMessage {
    ServiceCreated { service: Service },
    ServiceUpdated { service: Service },
    ServiceUpdatedState { state: ServiceState },
    ServiceDeleted { service_id: String },
    IncidentOpened { incident: Incident },
    IncidentResolved { incident: Incident },
    StatsUpdate { stats: serde_json::Value },
}

/// `Check` is a scheduler-internal trigger, not a dashboard-facing message,
/// so it has no on-the-wire representation; everything else maps 1:1.
fn dashboard_message_from(event: TriggerEvent) -> Option<DashboardMessage> {
    match event {
        TriggerEvent::ServiceCreated(service) => Some(DashboardMessage::ServiceCreated { service }),
        TriggerEvent::ServiceUpdated(service) => Some(DashboardMessage::ServiceUpdated { service }),
        TriggerEvent::ServiceDeleted { service_id } => {
            Some(DashboardMessage::ServiceDeleted { service_id })
        }
        TriggerEvent::StateUpdated(state) => Some(DashboardMessage::ServiceUpdatedState { state }),
        TriggerEvent::IncidentOpened(incident) => Some(DashboardMessage::IncidentOpened { incident }),
        TriggerEvent::IncidentResolved(incident) => {
            Some(DashboardMessage::IncidentResolved { incident })
        }
        TriggerEvent::Check { .. } => None,
    }
}

/// Transport-agnostic client registry plus the `TriggerEvent` fan-out loop.
/// `axum`'s `WebSocketUpgrade` handler below is the only piece that is
/// actually Axum-specific.
#[derive(Clone)]
pub struct BroadcastHub {
    clients: Arc<Mutex<HashMap<u64, mpsc::Sender<String>>>>,
    next_id: Arc<std::sync::atomic::AtomicU64>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self {
            clients: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(std::sync::atomic::AtomicU64::new(0)),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.clients.lock().len()
    }

    fn register(&self) -> (u64, mpsc::Receiver<String>) {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(64);
        self.clients.lock().insert(id, tx);
        (id, rx)
    }

    fn unregister(&self, id: u64) {
        self.clients.lock().remove(&id);
    }

    /// Send one already-serialized message to every connected client;
    /// clients whose mailbox is full or closed are dropped.
    fn broadcast_raw(&self, payload: String) {
        let mut dead = Vec::new();
        {
            let clients = self.clients.lock();
            for (id, sender) in clients.iter() {
                if sender.try_send(payload.clone()).is_err() {
                    dead.push(*id);
                }
            }
        }
        if !dead.is_empty() {
            let mut clients = self.clients.lock();
            for id in dead {
                clients.remove(&id);
            }
        }
    }

    fn broadcast(&self, message: &DashboardMessage) {
        match serde_json::to_string(message) {
            Ok(payload) => self.broadcast_raw(payload),
            Err(e) => warn!(error = %e, "failed to serialize dashboard message"),
        }
    }

    /// Close every connection.
    pub fn shutdown(&self) {
        self.clients.lock().clear();
    }

    /// Drain `TriggerEvent`s from the broker and fan them out as typed JSON
    /// until the subscription closes.
    pub async fn run(&self, mut receiver: mpsc::Receiver<TriggerEvent>) {
        while let Some(event) = receiver.recv().await {
            if let Some(message) = dashboard_message_from(event) {
                self.broadcast(&message);
            }
        }
    }

    /// Publish a pre-computed stats snapshot.
    pub fn publish_stats(&self, stats: serde_json::Value) {
        self.broadcast(&DashboardMessage::StatsUpdate { stats });
    }
}

/// `axum` application state for the WebSocket route.
#[derive(Clone)]
pub struct BroadcasterAppState {
    pub hub: BroadcastHub,
}

/// `GET /ws` handler; the external REST layer mounts this under
/// `axum::routing::get`.
pub async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<BroadcasterAppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| run_client_session(socket, state.hub))
}

async fn run_client_session(socket: WebSocket, hub: BroadcastHub) {
    let (id, mut rx) = hub.register();
    let (mut sink, mut stream) = socket.split();

    let forward = async {
        while let Some(payload) = rx.recv().await {
            if sink.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    };

    let drain_inbound = async {
        while stream.next().await.is_some() {
            // this channel is one-directional from the server's perspective;
            // inbound frames are read only to detect client disconnects.
        }
    };

    tokio::select! {
        _ = forward => {}
        _ = drain_inbound => {}
    }

    hub.unregister(id);
    debug!(client_id = id, "dashboard client disconnected");
}

/// Wire the hub to a broker subscription; spawn this alongside the
/// scheduler and monitor core.
pub fn spawn_broadcaster(hub: BroadcastHub, broker: &Broker) {
    let subscription = broker.subscribe();
    let hub = hub.clone();
    tokio::spawn(async move {
        hub.run(subscription.receiver).await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Status;

    #[tokio::test]
    async fn publishing_stats_does_not_panic_with_no_clients() {
        let hub = BroadcastHub::new();
        hub.publish_stats(serde_json::json!({"up": 3, "down": 1}));
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn state_updated_event_maps_to_a_tagged_message() {
        let state = ServiceState::unknown("svc-1".to_string());
        let message = dashboard_message_from(TriggerEvent::StateUpdated(state)).unwrap();
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "service_updated_state");
        assert_eq!(json["state"]["status"], serde_json::to_value(Status::Unknown).unwrap());
    }

    #[test]
    fn check_event_has_no_dashboard_message() {
        let message = dashboard_message_from(TriggerEvent::Check {
            service_id: "svc-1".to_string(),
        });
        assert!(message.is_none());
    }

    #[tokio::test]
    async fn run_drains_events_into_broadcasts() {
        let hub = BroadcastHub::new();
        let (tx, rx) = mpsc::channel(4);
        let run_hub = hub.clone();
        let handle = tokio::spawn(async move { run_hub.run(rx).await });

        tx.send(TriggerEvent::ServiceDeleted {
            service_id: "svc-1".to_string(),
        })
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap();
    }
}
