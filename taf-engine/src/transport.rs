//! Outbound message delivery.
//!
//! The engine never knows whether a broker, a file or a test harness sits
//! behind a topic; it only calls [`Transport::send`].

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::message::Envelope;

/// An envelope addressed to a topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub topic: String,
    pub envelope: Envelope,
}

/// Delivery of outbound envelopes.
///
/// # Cancel Safety
/// Implementations must not lose an envelope that `send` reported as
/// delivered.
#[async_trait]
pub trait Transport: Send + Sync {
    /// # Errors
    /// Returns [`TransportError::Closed`] if the receiving side is gone.
    async fn send(&self, topic: &str, envelope: Envelope) -> Result<(), TransportError>;
}

/// In-memory transport backed by a bounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::Sender<Outbound>,
}

impl ChannelTransport {
    /// Creates the transport and the receiver that drains it.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, topic: &str, envelope: Envelope) -> Result<(), TransportError> {
        self.tx
            .send(Outbound { topic: topic.to_owned(), envelope })
            .await
            .map_err(|_| TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{MessageType, StatusResponse};

    fn envelope() -> Envelope {
        match Envelope::new(MessageType::TasTeardownResponse, "taf", &StatusResponse::ok()) {
            Ok(e) => e,
            Err(e) => panic!("envelope: {e}"),
        }
    }

    #[tokio::test]
    async fn channel_transport_delivers_in_order() {
        let (transport, mut rx) = ChannelTransport::new(4);
        for topic in ["a", "b"] {
            if let Err(e) = transport.send(topic, envelope()).await {
                panic!("send failed: {e}");
            }
        }
        assert_eq!(rx.recv().await.map(|o| o.topic), Some("a".to_owned()));
        assert_eq!(rx.recv().await.map(|o| o.topic), Some("b".to_owned()));
    }

    #[tokio::test]
    async fn send_after_receiver_dropped_reports_closed() {
        let (transport, rx) = ChannelTransport::new(1);
        drop(rx);
        let result = transport.send("a", envelope()).await;
        assert!(matches!(result, Err(TransportError::Closed)), "dropped receiver must close the transport");
    }
}
