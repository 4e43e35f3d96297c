//! Mock transport for testing
//!
//! An in-memory stand-in for the broker: it records everything the engine
//! publishes and subscribes to, and lets tests play the cloud by injecting
//! replies, deltas and connection transitions into the engine's event
//! channel. Clones share state, so a test can keep a handle after giving the
//! client the transport.

use crate::transport::{QosLevel, ShadowTransport, TransportEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;

/// Mock transport errors
#[derive(Debug, Error)]
pub enum MockTransportError {
    #[error("mock connect failure: {0}")]
    Connect(String),
    #[error("mock publish failure")]
    Publish,
    #[error("transport not wired to a client")]
    NotWired,
}

/// In-memory transport implementing the shadow transport contract.
#[derive(Clone, Default)]
pub struct MockTransport {
    published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    event_tx: Arc<Mutex<Option<mpsc::Sender<TransportEvent>>>>,
    connect_failure: Arc<Mutex<Option<String>>>,
    fail_publish: Arc<AtomicBool>,
    disconnected: Arc<AtomicBool>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far, in order.
    pub fn published(&self) -> Vec<(String, Vec<u8>)> {
        self.published.lock().unwrap().clone()
    }

    /// Every topic subscribed so far, in order.
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    /// Make the next `connect` call fail with the given reason.
    pub fn fail_connect_with(&self, reason: &str) {
        *self.connect_failure.lock().unwrap() = Some(reason.to_string());
    }

    /// Make all publishes fail from now on.
    pub fn fail_publishes(&self) {
        self.fail_publish.store(true, Ordering::SeqCst);
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }

    /// Play the broker: push an event into the engine's channel.
    pub async fn inject(&self, event: TransportEvent) {
        let sender = self
            .event_tx
            .lock()
            .unwrap()
            .clone()
            .expect("transport not wired to a client");
        sender.send(event).await.expect("dispatcher stopped");
    }

    /// Convenience for injecting an inbound message.
    pub async fn inject_message(&self, topic: &str, payload: Vec<u8>) {
        self.inject(TransportEvent::Message {
            topic: topic.to_string(),
            payload,
        })
        .await;
    }
}

#[async_trait::async_trait]
impl ShadowTransport for MockTransport {
    type Error = MockTransportError;

    fn set_event_sender(&self, sender: mpsc::Sender<TransportEvent>) {
        *self.event_tx.lock().unwrap() = Some(sender);
    }

    async fn connect(&self) -> Result<(), Self::Error> {
        if let Some(reason) = self.connect_failure.lock().unwrap().take() {
            return Err(MockTransportError::Connect(reason));
        }
        let sender = self
            .event_tx
            .lock()
            .unwrap()
            .clone()
            .ok_or(MockTransportError::NotWired)?;
        sender
            .send(TransportEvent::Connected)
            .await
            .map_err(|_| MockTransportError::NotWired)?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        self.disconnected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe_many(&self, topics: &[String], _qos: QosLevel) -> Result<(), Self::Error> {
        self.subscriptions.lock().unwrap().extend_from_slice(topics);
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        _qos: QosLevel,
    ) -> Result<(), Self::Error> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(MockTransportError::Publish);
        }
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_publishes_and_subscriptions() {
        let mock = MockTransport::new();
        mock.subscribe_many(&["a/b".to_string()], QosLevel::AtLeastOnce)
            .await
            .unwrap();
        mock.publish("a/b", b"x1y".to_vec(), QosLevel::AtLeastOnce)
            .await
            .unwrap();

        assert_eq!(mock.subscriptions(), vec!["a/b".to_string()]);
        assert_eq!(mock.published(), vec![("a/b".to_string(), b"x1y".to_vec())]);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let mock = MockTransport::new();
        let clone = mock.clone();
        clone
            .publish("t", b"abc".to_vec(), QosLevel::AtMostOnce)
            .await
            .unwrap();
        assert_eq!(mock.published().len(), 1);
    }

    #[tokio::test]
    async fn test_connect_delivers_connected_event() {
        let mock = MockTransport::new();
        let (tx, mut rx) = mpsc::channel(8);
        mock.set_event_sender(tx);

        mock.connect().await.unwrap();
        assert_eq!(rx.recv().await, Some(TransportEvent::Connected));
    }

    #[tokio::test]
    async fn test_failure_modes() {
        let mock = MockTransport::new();
        let (tx, _rx) = mpsc::channel(8);
        mock.set_event_sender(tx);

        mock.fail_connect_with("refused");
        assert!(mock.connect().await.is_err());
        // The failure is one-shot; the next connect succeeds.
        assert!(mock.connect().await.is_ok());

        mock.fail_publishes();
        assert!(mock
            .publish("t", b"abc".to_vec(), QosLevel::AtLeastOnce)
            .await
            .is_err());
    }
}
