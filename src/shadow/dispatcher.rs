//! Inbound dispatcher
//!
//! One task per client consumes the transport's event stream. Connection
//! events drive the session state machine; messages are classified by topic
//! and routed to the in-flight table (correlated replies) or the delta
//! registry (cloud pushes). Malformed inbound data is logged and dropped,
//! never surfaced to callers and never a panic.

use super::client::{ClientCore, SessionState};
use crate::protocol::messages::{self, DeltaMessage, DeltaRejectedMessage, Rejection};
use crate::protocol::{InboundRoute, ShadowAck};
use crate::transport::{ShadowTransport, TransportEvent};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Payloads shorter than this cannot be JSON worth parsing.
const MIN_PAYLOAD_LENGTH: usize = 3;

/// Dispatcher loop. Ends when the transport drops its sender.
pub(crate) async fn run<T: ShadowTransport>(
    core: Arc<ClientCore>,
    transport: Arc<T>,
    mut events: mpsc::Receiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Connected => on_connected(&core, transport.as_ref()).await,
            TransportEvent::ConnectionLost { reason } => {
                warn!(device = %core.device_name, %reason, "connection lost");
                core.record_error(reason);
                core.set_state(SessionState::Down);
            }
            TransportEvent::Message { topic, payload } => {
                handle_message(&core, transport.as_ref(), &topic, &payload).await;
            }
        }
    }
    debug!(device = %core.device_name, "dispatcher stopped");
}

/// The broker accepted the connection (first time or after a reconnect).
/// The subscription set must be re-established before the session counts as
/// ready again.
async fn on_connected<T: ShadowTransport>(core: &Arc<ClientCore>, transport: &T) {
    core.set_state(SessionState::Subscribing);

    let topics: Vec<String> = core
        .topics
        .subscriptions()
        .iter()
        .map(|topic| topic.to_string())
        .collect();

    let subscribe = transport.subscribe_many(&topics, core.qos);
    match tokio::time::timeout(core.subscribe_timeout, subscribe).await {
        Ok(Ok(())) => {
            core.set_state(SessionState::Ready);
            info!(device = %core.device_name, "session ready");
        }
        Ok(Err(e)) => {
            error!(device = %core.device_name, "failed to subscribe to shadow topics: {e}");
        }
        Err(_) => {
            error!(device = %core.device_name, "subscribe timed out");
        }
    }
}

async fn handle_message<T: ShadowTransport>(
    core: &Arc<ClientCore>,
    transport: &T,
    topic: &str,
    payload: &[u8],
) {
    if payload.len() < MIN_PAYLOAD_LENGTH {
        warn!(%topic, length = payload.len(), "payload too short, dropping");
        return;
    }

    let document: Value = match serde_json::from_slice(payload) {
        Ok(document) => document,
        Err(e) => {
            warn!(%topic, "failed to parse inbound payload: {e}");
            return;
        }
    };
    trace!(%topic, payload = %document, "inbound shadow message");

    match core.topics.classify(topic) {
        Some(InboundRoute::Delta) => delta_arrived(core, transport, document).await,
        Some(InboundRoute::Reply { action, rejected }) => {
            let Some(request_id) = messages::request_id(&document).map(str::to_string) else {
                warn!(%topic, "reply without request id, dropping");
                return;
            };
            trace!(%action, rejected, %request_id, "correlated reply");

            let ack = if rejected {
                let (code, message) = match serde_json::from_value::<Rejection>(document) {
                    Ok(rejection) => {
                        if rejection.code.is_none() || rejection.message.is_none() {
                            warn!(%request_id, "rejection without code or message");
                        }
                        (
                            rejection.code.unwrap_or_default(),
                            rejection.message.unwrap_or_default(),
                        )
                    }
                    Err(e) => {
                        warn!(%request_id, "malformed rejection payload: {e}");
                        (String::new(), String::new())
                    }
                };
                ShadowAck::Rejected { code, message }
            } else {
                ShadowAck::Accepted { document }
            };

            core.inflight.complete(&request_id, ack);
        }
        None => warn!(%topic, "unexpected topic, dropping"),
    }
}

/// A desired-state delta from the cloud. Handler rejections are reported
/// back on `delta/rejected` with the delta's own request id.
async fn delta_arrived<T: ShadowTransport>(
    core: &Arc<ClientCore>,
    transport: &T,
    document: Value,
) {
    let delta: DeltaMessage = match serde_json::from_value(document) {
        Ok(delta) => delta,
        Err(e) => {
            warn!(device = %core.device_name, "malformed delta payload: {e}");
            return;
        }
    };
    debug!(
        device = %core.device_name,
        request_id = delta.request_id.as_deref().unwrap_or("<none>"),
        "received delta"
    );

    let Some(desired) = delta.desired else {
        warn!(device = %core.device_name, "delta without desired object, dropping");
        return;
    };

    let Err(rejection) = core.deltas.dispatch(&desired) else {
        return;
    };

    let Some(request_id) = delta.request_id else {
        warn!(device = %core.device_name, "cannot reject a delta that carried no request id");
        return;
    };

    let reply = DeltaRejectedMessage {
        request_id,
        code: rejection.code,
        message: rejection.message,
    };
    let payload = match serde_json::to_vec(&reply) {
        Ok(payload) => payload,
        Err(e) => {
            error!(device = %core.device_name, "failed to serialize delta rejection: {e}");
            return;
        }
    };
    if let Err(e) = transport
        .publish(&core.topics.delta_rejected, payload, core.qos)
        .await
    {
        error!(device = %core.device_name, "failed to publish delta rejection: {e}");
    }
}
