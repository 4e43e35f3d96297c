//! MQTT implementation of the shadow transport
//!
//! Wraps rumqttc's v5 client. A supervisor task owns the event loop,
//! forwards inbound traffic and connection transitions to the engine's
//! event channel, and rides out broker outages with backoff: polling the
//! event loop again after a failure re-establishes the connection, and the
//! resulting ConnAck is forwarded so the engine can re-subscribe.

use super::connection::{configure_mqtt_options, MqttTransportError, ReconnectConfig};
use super::events::{route_event, EventRoute};
use crate::config::ShadowConfig;
use crate::transport::{QosLevel, ShadowTransport, TransportEvent};
use rumqttc::v5::mqttbytes::v5::Filter;
use rumqttc::v5::mqttbytes::QoS;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of rumqttc's outgoing request queue.
const REQUEST_QUEUE_CAPACITY: usize = 10;

/// MQTT transport for the shadow engine
pub struct MqttTransport {
    device_name: String,
    client: AsyncClient,
    event_loop: StdMutex<Option<EventLoop>>,
    event_tx: StdMutex<Option<mpsc::Sender<TransportEvent>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    reconnect: ReconnectConfig,
    supervisor: StdMutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    /// Create the transport. Nothing is connected until [`connect`] is called.
    ///
    /// [`connect`]: ShadowTransport::connect
    pub fn new(device_name: &str, config: &ShadowConfig) -> Result<Self, MqttTransportError> {
        let options = configure_mqtt_options(device_name, config)?;
        let (client, event_loop) = AsyncClient::new(options, REQUEST_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            device_name: device_name.to_string(),
            client,
            event_loop: StdMutex::new(Some(event_loop)),
            event_tx: StdMutex::new(None),
            shutdown_tx,
            shutdown_rx,
            reconnect: ReconnectConfig::default(),
            supervisor: StdMutex::new(None),
        })
    }

    /// Supervisor loop: poll the event loop, forward what the engine cares
    /// about, back off and re-poll on failure. Returns when the shutdown
    /// signal fires or the engine side of the event channel is gone.
    async fn supervise(
        device_name: String,
        mut event_loop: EventLoop,
        events: mpsc::Sender<TransportEvent>,
        reconnect: ReconnectConfig,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        info!(device = %device_name, "MQTT event loop started");
        let mut failed_attempts = 0u32;

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(device = %device_name, "shutdown signal received, stopping event loop");
                        break;
                    }
                }
                polled = event_loop.poll() => {
                    match polled {
                        Ok(event) => {
                            let route = route_event(&event);
                            if matches!(route, EventRoute::ConnectionAcknowledged) {
                                failed_attempts = 0;
                            }
                            if !Self::forward(&events, route).await {
                                break;
                            }
                        }
                        Err(e) => {
                            failed_attempts += 1;
                            let delay = reconnect.backoff_delay(failed_attempts);
                            error!(
                                device = %device_name,
                                attempt = failed_attempts,
                                delay_ms = delay,
                                "MQTT connection error: {e}"
                            );
                            let lost = TransportEvent::ConnectionLost {
                                reason: e.to_string(),
                            };
                            if events.send(lost).await.is_err() {
                                break;
                            }
                            // Polling again reconnects; wait out the backoff
                            // first, but leave promptly on shutdown.
                            tokio::select! {
                                _ = shutdown_rx.changed() => {
                                    if *shutdown_rx.borrow() {
                                        break;
                                    }
                                }
                                _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                            }
                        }
                    }
                }
            }
        }
        info!(device = %device_name, "MQTT event loop stopped");
    }

    /// Forward a routed event to the engine. Returns false when the engine
    /// side of the channel is gone.
    async fn forward(events: &mpsc::Sender<TransportEvent>, route: EventRoute) -> bool {
        let event = match route {
            EventRoute::ConnectionAcknowledged => {
                debug!("broker acknowledged connection");
                TransportEvent::Connected
            }
            EventRoute::MessageReceived { topic, payload } => {
                TransportEvent::Message { topic, payload }
            }
            EventRoute::Disconnected => TransportEvent::ConnectionLost {
                reason: "broker closed the connection".to_string(),
            },
            EventRoute::Ignored => return true,
        };
        events.send(event).await.is_ok()
    }

    fn to_qos(qos: QosLevel) -> QoS {
        match qos {
            QosLevel::AtMostOnce => QoS::AtMostOnce,
            QosLevel::AtLeastOnce => QoS::AtLeastOnce,
            QosLevel::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

#[async_trait::async_trait]
impl ShadowTransport for MqttTransport {
    type Error = MqttTransportError;

    fn set_event_sender(&self, sender: mpsc::Sender<TransportEvent>) {
        let mut tx = self.event_tx.lock().expect("event sender lock poisoned");
        *tx = Some(sender);
    }

    async fn connect(&self) -> Result<(), Self::Error> {
        let events = self
            .event_tx
            .lock()
            .expect("event sender lock poisoned")
            .clone()
            .ok_or_else(|| {
                MqttTransportError::ConnectionFailed("no event sender configured".to_string())
            })?;

        let event_loop = self
            .event_loop
            .lock()
            .expect("event loop lock poisoned")
            .take()
            .ok_or_else(|| {
                MqttTransportError::ConnectionFailed("event loop already started".to_string())
            })?;

        let handle = tokio::spawn(Self::supervise(
            self.device_name.clone(),
            event_loop,
            events,
            self.reconnect.clone(),
            self.shutdown_rx.clone(),
        ));
        *self.supervisor.lock().expect("supervisor lock poisoned") = Some(handle);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        let _ = self.shutdown_tx.send(true);

        if let Err(e) = self.client.disconnect().await {
            // The broker may already be gone; the supervisor is stopping
            // either way.
            warn!(device = %self.device_name, "disconnect request failed: {e}");
        }

        let handle = self
            .supervisor
            .lock()
            .expect("supervisor lock poisoned")
            .take();
        if let Some(handle) = handle {
            match tokio::time::timeout(Duration::from_secs(2), handle).await {
                Ok(Ok(())) => debug!("event loop task shut down cleanly"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!("event loop task ended with error: {e}");
                }
                Err(_) => warn!("event loop task did not stop in time"),
                _ => {}
            }
        }

        info!(device = %self.device_name, "MQTT transport disconnected");
        Ok(())
    }

    async fn subscribe_many(&self, topics: &[String], qos: QosLevel) -> Result<(), Self::Error> {
        let filters: Vec<Filter> = topics
            .iter()
            .map(|topic| Filter::new(topic.clone(), Self::to_qos(qos)))
            .collect();

        self.client
            .subscribe_many(filters)
            .await
            .map_err(|e| MqttTransportError::SubscriptionFailed(Box::new(e)))?;

        debug!(device = %self.device_name, count = topics.len(), "subscribed to shadow topics");
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QosLevel,
    ) -> Result<(), Self::Error> {
        self.client
            .publish(topic, Self::to_qos(qos), false, payload)
            .await
            .map_err(|e| MqttTransportError::PublishFailed(Box::new(e)))?;
        Ok(())
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        // Stop the supervisor; disconnect needs async and is the caller's job.
        let _ = self.shutdown_tx.send(true);
        if let Ok(mut supervisor) = self.supervisor.lock() {
            if let Some(handle) = supervisor.take() {
                handle.abort();
            }
        }
    }
}
