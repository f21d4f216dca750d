use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::{sink::SinkExt, stream::StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::WebConfig;
use crate::models::{Alert, SensorReading};
use crate::AppState;

/// Channel capacity for the broadcast fan-out. A receiver that lags behind
/// this many messages drops the oldest rather than blocking the sender.
const BROADCAST_CAPACITY: usize = 1000;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayMessage {
    #[serde(rename = "alert")]
    Alert(Alert),
    #[serde(rename = "sensor_update")]
    SensorUpdate(SensorReading),
    #[serde(rename = "connected")]
    Connected { timestamp: String },
    #[serde(rename = "shutdown")]
    Shutdown,
}

/// One strategy in the ordered origin allow-list. Strategies are data, not
/// code: the admission decision is a single pass over this list.
#[derive(Debug, Clone, PartialEq)]
pub enum OriginMatcher {
    Exact(String),
    Prefix(String),
    Loopback,
    PrivateNetwork,
}

/// Host portion of an origin like `http://192.168.1.5:3000`.
fn origin_host(origin: &str) -> &str {
    let rest = origin.split_once("://").map(|(_, r)| r).unwrap_or(origin);
    let rest = rest.split('/').next().unwrap_or(rest);
    // IPv6 hosts keep their brackets; ports come after the last ':'.
    if rest.starts_with('[') {
        rest.split(']').next().map(|h| &h[1..]).unwrap_or(rest)
    } else {
        rest.split(':').next().unwrap_or(rest)
    }
}

fn is_loopback_host(host: &str) -> bool {
    host == "localhost" || host == "::1" || host.starts_with("127.")
}

fn is_private_host(host: &str) -> bool {
    if host.starts_with("10.") || host.starts_with("192.168.") {
        return true;
    }
    if let Some(rest) = host.strip_prefix("172.") {
        if let Some(second) = rest.split('.').next().and_then(|s| s.parse::<u8>().ok()) {
            return (16..=31).contains(&second);
        }
    }
    false
}

impl OriginMatcher {
    pub fn matches(&self, origin: &str) -> bool {
        match self {
            Self::Exact(allowed) => origin == allowed,
            Self::Prefix(prefix) => origin.starts_with(prefix.as_str()),
            Self::Loopback => is_loopback_host(origin_host(origin)),
            Self::PrivateNetwork => is_private_host(origin_host(origin)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionRejected {
    OriginDenied,
    AtCapacity,
    Draining,
}

/// Admitted connection handle. Dropping it releases the capacity slot.
pub struct ConnectionSession {
    gateway: Arc<Gateway>,
    pub origin: Option<String>,
    pub admitted_at: chrono::DateTime<chrono::Utc>,
}

impl std::fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("origin", &self.origin)
            .field("admitted_at", &self.admitted_at)
            .finish_non_exhaustive()
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.gateway.connections.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Admission-controlled pub/sub hub for dashboard clients. Broadcast is
/// best-effort: each connection reads from its own broadcast receiver, so a
/// stalled client lags and drops messages without starving the others.
pub struct Gateway {
    sender: broadcast::Sender<GatewayMessage>,
    connections: AtomicUsize,
    max_connections: usize,
    matchers: Vec<OriginMatcher>,
    draining: AtomicBool,
}

impl Gateway {
    pub fn new(matchers: Vec<OriginMatcher>, max_connections: usize) -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            sender,
            connections: AtomicUsize::new(0),
            max_connections,
            matchers,
            draining: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &WebConfig) -> Self {
        let mut matchers: Vec<OriginMatcher> = config
            .allowed_ws_origins
            .iter()
            .map(|entry| match entry.strip_suffix('*') {
                Some(prefix) => OriginMatcher::Prefix(prefix.to_string()),
                None => OriginMatcher::Exact(entry.clone()),
            })
            .collect();

        if config.permissive_origins {
            matchers.push(OriginMatcher::Loopback);
            matchers.push(OriginMatcher::PrivateNetwork);
        }

        Self::new(matchers, config.max_realtime_connections)
    }

    fn origin_allowed(&self, origin: Option<&str>) -> bool {
        match origin {
            // Non-browser clients send no Origin header and are admitted.
            None => true,
            Some(origin) => self.matchers.iter().any(|m| m.matches(origin)),
        }
    }

    /// Origin check, then capacity reservation. There is no waiting room:
    /// a connection over the cap is rejected outright.
    pub fn admit(
        self: &Arc<Self>,
        origin: Option<&str>,
    ) -> Result<ConnectionSession, AdmissionRejected> {
        if self.draining.load(Ordering::SeqCst) {
            return Err(AdmissionRejected::Draining);
        }
        if !self.origin_allowed(origin) {
            return Err(AdmissionRejected::OriginDenied);
        }

        let reserved = self
            .connections
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < self.max_connections).then_some(current + 1)
            });
        if reserved.is_err() {
            return Err(AdmissionRejected::AtCapacity);
        }

        Ok(ConnectionSession {
            gateway: Arc::clone(self),
            origin: origin.map(String::from),
            admitted_at: chrono::Utc::now(),
        })
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayMessage> {
        self.sender.subscribe()
    }

    pub fn broadcast_alert(&self, alert: &Alert) {
        // Send fails only when no receiver is subscribed; that is fine.
        let _ = self.sender.send(GatewayMessage::Alert(alert.clone()));
    }

    pub fn broadcast_reading(&self, reading: &SensorReading) {
        let _ = self.sender.send(GatewayMessage::SensorUpdate(reading.clone()));
    }

    /// Stops admitting and tells connected clients to go away. Connections
    /// unwind on their next received message; the caller enforces the grace
    /// period with a forced exit.
    pub fn begin_drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
        let _ = self.sender.send(GatewayMessage::Shutdown);
    }
}

/// Realtime push endpoint. Clients connect, pass origin and capacity
/// admission, and receive broadcast alert/sensor-update events.
pub async fn gateway_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let session = match state.gateway.admit(origin.as_deref()) {
        Ok(session) => session,
        Err(reason) => {
            // Admission failures are silent to the rest of the system.
            warn!(?origin, ?reason, "Realtime connection rejected");
            let status = match reason {
                AdmissionRejected::OriginDenied => StatusCode::FORBIDDEN,
                AdmissionRejected::AtCapacity | AdmissionRejected::Draining => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
            };
            return status.into_response();
        }
    };

    let receiver = state.gateway.subscribe();
    ws.on_upgrade(move |socket| handle_connection(socket, session, receiver))
}

async fn handle_connection(
    socket: WebSocket,
    session: ConnectionSession,
    mut receiver: broadcast::Receiver<GatewayMessage>,
) {
    info!(origin = ?session.origin, "Realtime client connected");
    let (mut sender, mut incoming) = socket.split();

    let connected = GatewayMessage::Connected {
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    if let Ok(json) = serde_json::to_string(&connected) {
        if sender.send(Message::Text(json)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            broadcast_msg = receiver.recv() => {
                match broadcast_msg {
                    Ok(GatewayMessage::Shutdown) => {
                        if let Ok(json) = serde_json::to_string(&GatewayMessage::Shutdown) {
                            let _ = sender.send(Message::Text(json)).await;
                        }
                        break;
                    }
                    Ok(msg) => {
                        if let Ok(json) = serde_json::to_string(&msg) {
                            if sender.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Slow realtime client dropped messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            client_msg = incoming.next() => {
                match client_msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    // The gateway has no request/response semantics past the
                    // handshake; client frames are ignored.
                    _ => {}
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
    info!(origin = ?session.origin, "Realtime client disconnected");
    drop(session);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;

    fn strict_gateway(max: usize) -> Arc<Gateway> {
        Arc::new(Gateway::new(
            vec![
                OriginMatcher::Exact("https://dash.example.com".into()),
                OriginMatcher::Prefix("http://staging.".into()),
            ],
            max,
        ))
    }

    fn permissive_gateway(max: usize) -> Arc<Gateway> {
        Arc::new(Gateway::new(
            vec![OriginMatcher::Loopback, OriginMatcher::PrivateNetwork],
            max,
        ))
    }

    #[test]
    fn origin_host_extraction() {
        assert_eq!(origin_host("http://localhost:3000"), "localhost");
        assert_eq!(origin_host("https://10.0.0.7"), "10.0.0.7");
        assert_eq!(origin_host("http://[::1]:8080"), "::1");
        assert_eq!(origin_host("192.168.1.4:80"), "192.168.1.4");
    }

    #[test]
    fn matcher_strategies() {
        assert!(OriginMatcher::Exact("http://a".into()).matches("http://a"));
        assert!(!OriginMatcher::Exact("http://a".into()).matches("http://ab"));
        assert!(OriginMatcher::Prefix("http://staging.".into()).matches("http://staging.x.com"));
        assert!(OriginMatcher::Loopback.matches("http://127.0.0.1:9000"));
        assert!(OriginMatcher::Loopback.matches("http://localhost"));
        assert!(OriginMatcher::PrivateNetwork.matches("http://10.1.2.3:3000"));
        assert!(OriginMatcher::PrivateNetwork.matches("http://192.168.0.10"));
        assert!(OriginMatcher::PrivateNetwork.matches("http://172.20.0.1"));
        assert!(!OriginMatcher::PrivateNetwork.matches("http://172.40.0.1"));
        assert!(!OriginMatcher::PrivateNetwork.matches("http://8.8.8.8"));
    }

    #[test]
    fn strict_mode_consults_only_the_allow_list() {
        let gateway = strict_gateway(10);
        assert!(gateway.admit(Some("https://dash.example.com")).is_ok());
        assert!(gateway.admit(Some("http://staging.box.example.com")).is_ok());
        assert_eq!(
            gateway.admit(Some("http://localhost:3000")).unwrap_err(),
            AdmissionRejected::OriginDenied
        );
    }

    #[test]
    fn permissive_mode_admits_local_ranges() {
        let gateway = permissive_gateway(10);
        assert!(gateway.admit(Some("http://localhost:5173")).is_ok());
        assert!(gateway.admit(Some("http://192.168.1.50:3000")).is_ok());
        assert_eq!(
            gateway.admit(Some("https://evil.example.com")).unwrap_err(),
            AdmissionRejected::OriginDenied
        );
    }

    #[test]
    fn missing_origin_is_always_admitted() {
        let gateway = strict_gateway(10);
        assert!(gateway.admit(None).is_ok());
    }

    #[test]
    fn capacity_rejects_then_readmits_after_disconnect() {
        let gateway = permissive_gateway(1);

        let session = gateway.admit(None).unwrap();
        assert_eq!(gateway.connection_count(), 1);
        assert_eq!(
            gateway.admit(None).unwrap_err(),
            AdmissionRejected::AtCapacity
        );

        drop(session);
        assert_eq!(gateway.connection_count(), 0);
        assert!(gateway.admit(None).is_ok());
    }

    #[test]
    fn draining_gateway_rejects_new_connections() {
        let gateway = permissive_gateway(10);
        gateway.begin_drain();
        assert_eq!(gateway.admit(None).unwrap_err(), AdmissionRejected::Draining);
    }

    #[tokio::test]
    async fn broadcast_reaches_subscribers() {
        let gateway = permissive_gateway(10);
        let mut rx = gateway.subscribe();

        let alert = Alert::new(None, "sensor_threshold".into(), Severity::Critical, "hot".into());
        gateway.broadcast_alert(&alert);

        match rx.recv().await.unwrap() {
            GatewayMessage::Alert(got) => assert_eq!(got.id, alert.id),
            other => panic!("unexpected message: {:?}", other),
        }
    }
}
