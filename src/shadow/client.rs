//! Shadow client: the public surface of the crate
//!
//! A `ShadowClient` owns one device's view of its shadow: the topic contract,
//! the in-flight request table and the delta handler registry. Requests are
//! fire-and-forget at the call site; the outcome arrives on the per-request
//! callback, exactly once, as accepted, rejected or timeout.
//!
//! Callbacks run on the dispatcher task (replies, deltas) or the reaper
//! thread (timeouts). They must not call back into blocking operations on the
//! same client.

use super::delta::DeltaRegistry;
use super::dispatcher;
use super::inflight::InFlightTable;
use super::registry;
use crate::config::{ConfigError, ShadowConfig};
use crate::error::ShadowError;
use crate::protocol::topics::validate_device_name;
use crate::protocol::{
    ActionRequest, DeltaRejection, ShadowAck, ShadowAction, TopicContract, UpdateRequest,
};
use crate::transport::mqtt::MqttTransport;
use crate::transport::{QosLevel, ShadowTransport};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, trace};
use uuid::Uuid;

/// Events queued between the transport and the dispatcher.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle of a client's broker session.
///
/// Operations that talk to the cloud require `Ready`: connected with the
/// shadow subscription set established. A lost connection falls back to
/// `Down`; the transport reconnects on its own and the session climbs back
/// through `Subscribing` before re-entering `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Down,
    Connecting,
    Subscribing,
    Ready,
}

/// Per-client state shared by the public surface, the dispatcher task and
/// the reaper thread.
pub(crate) struct ClientCore {
    pub(crate) device_name: String,
    pub(crate) topics: TopicContract,
    pub(crate) inflight: InFlightTable,
    pub(crate) deltas: DeltaRegistry,
    pub(crate) qos: QosLevel,
    pub(crate) subscribe_timeout: Duration,
    session: watch::Sender<SessionState>,
    last_error: Mutex<Option<String>>,
}

impl ClientCore {
    pub(crate) fn new(device_name: &str, config: &ShadowConfig) -> Result<Self, ShadowError> {
        validate_device_name(device_name)?;
        config.validate().map_err(ShadowError::Config)?;
        let qos = QosLevel::from_u8(config.qos)
            .ok_or(ShadowError::Config(ConfigError::InvalidQos(config.qos)))?;

        let (session, _) = watch::channel(SessionState::Down);
        Ok(Self {
            device_name: device_name.to_string(),
            topics: TopicContract::new(device_name),
            inflight: InFlightTable::new(config.max_in_flight_messages),
            deltas: DeltaRegistry::new(config.max_delta_handlers),
            qos,
            subscribe_timeout: Duration::from_secs(config.subscribe_timeout_secs),
            session,
            last_error: Mutex::new(None),
        })
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.session.borrow()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        self.session.send_replace(state);
    }

    pub(crate) fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.session.subscribe()
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    pub(crate) fn record_error(&self, reason: String) {
        *self.last_error.lock().expect("error lock poisoned") = Some(reason);
    }

    pub(crate) fn clear_error(&self) {
        *self.last_error.lock().expect("error lock poisoned") = None;
    }

    pub(crate) fn last_error(&self) -> Option<String> {
        self.last_error.lock().expect("error lock poisoned").clone()
    }
}

/// Client for one device's shadow.
pub struct ShadowClient<T: ShadowTransport = MqttTransport> {
    core: Arc<ClientCore>,
    transport: Arc<T>,
    connect_timeout: Duration,
    dispatcher: Option<JoinHandle<()>>,
}

impl ShadowClient<MqttTransport> {
    /// Create a client backed by the MQTT transport. Nothing is connected yet.
    pub async fn new(device_name: &str, config: ShadowConfig) -> Result<Self, ShadowError> {
        let transport = MqttTransport::new(device_name, &config).map_err(ShadowError::transport)?;
        Self::with_transport(device_name, config, transport).await
    }
}

impl<T: ShadowTransport> ShadowClient<T> {
    /// Create a client over any transport implementation.
    pub async fn with_transport(
        device_name: &str,
        config: ShadowConfig,
        transport: T,
    ) -> Result<Self, ShadowError> {
        let core = Arc::new(ClientCore::new(device_name, &config)?);
        registry::global().add(&core, config.max_clients)?;

        let transport = Arc::new(transport);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        transport.set_event_sender(event_tx);
        let dispatcher = tokio::spawn(dispatcher::run(
            Arc::clone(&core),
            Arc::clone(&transport),
            event_rx,
        ));

        info!(device = %core.device_name, "shadow client created");
        Ok(Self {
            core,
            transport,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            dispatcher: Some(dispatcher),
        })
    }

    /// Connect to the broker and wait until the session is ready: connected
    /// with the full shadow subscription set established. Returns the recorded
    /// transport fault if the connection fails first.
    pub async fn connect(&self) -> Result<(), ShadowError> {
        let mut state_rx = self.core.watch_state();
        self.core.clear_error();
        self.core.set_state(SessionState::Connecting);

        self.transport
            .connect()
            .await
            .map_err(ShadowError::transport)?;

        let core = &self.core;
        let wait_for_ready = async move {
            loop {
                match *state_rx.borrow_and_update() {
                    SessionState::Ready => return Ok(()),
                    SessionState::Down => {
                        if let Some(reason) = core.last_error() {
                            return Err(ShadowError::connect_failed(reason));
                        }
                    }
                    SessionState::Connecting | SessionState::Subscribing => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(ShadowError::connect_failed("session state channel closed"));
                }
            }
        };

        match tokio::time::timeout(self.connect_timeout, wait_for_ready).await {
            Ok(result) => result,
            Err(_) => Err(ShadowError::connect_failed(
                "timed out waiting for connected and subscribed session",
            )),
        }
    }

    /// Publish the device's reported state.
    ///
    /// `reported` must be a JSON object. The callback fires exactly once with
    /// the cloud's answer or a timeout after `timeout_secs` (+ up to one
    /// reaper tick).
    pub async fn update<F>(
        &self,
        reported: Value,
        timeout_secs: u8,
        callback: F,
    ) -> Result<(), ShadowError>
    where
        F: FnOnce(ShadowAction, ShadowAck) + Send + 'static,
    {
        if !reported.is_object() {
            return Err(ShadowError::bad_argument("reported must be a JSON object"));
        }
        self.send_action(ShadowAction::Update, Some(reported), timeout_secs, callback)
            .await
    }

    /// Fetch the device's shadow document.
    pub async fn get<F>(&self, timeout_secs: u8, callback: F) -> Result<(), ShadowError>
    where
        F: FnOnce(ShadowAction, ShadowAck) + Send + 'static,
    {
        self.send_action(ShadowAction::Get, None, timeout_secs, callback)
            .await
    }

    /// Delete the device's shadow document.
    pub async fn delete<F>(&self, timeout_secs: u8, callback: F) -> Result<(), ShadowError>
    where
        F: FnOnce(ShadowAction, ShadowAck) + Send + 'static,
    {
        self.send_action(ShadowAction::Delete, None, timeout_secs, callback)
            .await
    }

    /// Register a handler for desired-state deltas.
    ///
    /// `key = None` receives every delta's whole desired object; a key
    /// restricts the handler to that property. Handlers are permanent and run
    /// in registration order. A handler returning a [`DeltaRejection`] stops
    /// dispatch and reports the error to the cloud.
    pub fn register_delta<F>(&self, key: Option<&str>, handler: F) -> Result<(), ShadowError>
    where
        F: Fn(Option<&str>, &Value) -> Result<(), DeltaRejection> + Send + Sync + 'static,
    {
        if !self.core.is_ready() {
            return Err(ShadowError::NotConnected);
        }
        self.core.deltas.register(key, handler)
    }

    /// Disconnect and tear the client down.
    ///
    /// Pending requests do **not** receive callbacks after this; callers that
    /// care must drain their requests first.
    pub async fn disconnect(&mut self) -> Result<(), ShadowError> {
        registry::global().remove(&self.core);
        self.core.set_state(SessionState::Down);
        if let Some(handle) = self.dispatcher.take() {
            handle.abort();
        }
        self.transport
            .disconnect()
            .await
            .map_err(ShadowError::transport)?;
        info!(device = %self.core.device_name, "shadow client destroyed");
        Ok(())
    }

    /// The device this client serves.
    pub fn device_name(&self) -> &str {
        &self.core.device_name
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.core.state()
    }

    /// Whether operations can currently reach the cloud.
    pub fn is_ready(&self) -> bool {
        self.core.is_ready()
    }

    /// Number of requests awaiting a reply or timeout.
    pub fn pending_requests(&self) -> usize {
        self.core.inflight.len()
    }

    /// Shared send path: fresh request id, in-flight registration, publish.
    async fn send_action<F>(
        &self,
        action: ShadowAction,
        reported: Option<Value>,
        timeout_secs: u8,
        callback: F,
    ) -> Result<(), ShadowError>
    where
        F: FnOnce(ShadowAction, ShadowAck) + Send + 'static,
    {
        if !self.core.is_ready() {
            return Err(ShadowError::NotConnected);
        }

        let request_id = Uuid::new_v4().to_string();
        let payload = match reported {
            Some(reported) => serde_json::to_vec(&UpdateRequest {
                reported,
                request_id: request_id.clone(),
            })?,
            None => serde_json::to_vec(&ActionRequest {
                request_id: request_id.clone(),
            })?,
        };

        // The reply can outrun the publish acknowledgment; the entry must be
        // in the table before the payload leaves.
        self.core
            .inflight
            .insert(&request_id, action, timeout_secs, Box::new(callback))?;

        let topic = self.core.topics.publish_topic(action);
        trace!(%topic, %request_id, "publishing shadow request");
        if let Err(e) = self.transport.publish(topic, payload, self.core.qos).await {
            // The entry intentionally stays: removing it could race a reply
            // the broker already dispatched. The reaper delivers a timeout.
            error!(%request_id, %action, "failed to publish shadow request: {e}");
        }
        Ok(())
    }
}

impl<T: ShadowTransport> Drop for ShadowClient<T> {
    fn drop(&mut self) {
        registry::global().remove(&self.core);
        if let Some(handle) = self.dispatcher.take() {
            handle.abort();
        }
    }
}
