use crate::types::Endpoint;

/// Network abstraction for the runtime.
///
/// In production: implemented by `MulticastChannel` (UDP multicast + unicast).
/// In tests: implemented by `MockTransport` (records sends, injects datagrams).
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send_multicast(&self, data: &[u8]) -> Result<(), String>;

    async fn send_unicast(&self, to: Endpoint, data: &[u8]) -> Result<(), String>;

    /// Next inbound datagram and its sender. Must be cancel-safe.
    async fn recv(&self) -> Result<(Vec<u8>, Endpoint), String>;

    fn local_endpoint(&self) -> Endpoint;
}

// ── Impl for MulticastChannel (production) ──────────────────────────

#[async_trait::async_trait]
impl Transport for gka_transport::MulticastChannel {
    async fn send_multicast(&self, data: &[u8]) -> Result<(), String> {
        gka_transport::MulticastChannel::send_multicast(self, data)
            .await
            .map_err(|e| e.to_string())
    }

    async fn send_unicast(&self, to: Endpoint, data: &[u8]) -> Result<(), String> {
        gka_transport::MulticastChannel::send_unicast(self, data, to)
            .await
            .map_err(|e| e.to_string())
    }

    async fn recv(&self) -> Result<(Vec<u8>, Endpoint), String> {
        gka_transport::MulticastChannel::recv(self)
            .await
            .map_err(|e| e.to_string())
    }

    fn local_endpoint(&self) -> Endpoint {
        gka_transport::MulticastChannel::local_endpoint(self)
    }
}

// ── MockTransport (tests) ───────────────────────────────────────────

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    /// A datagram the runtime handed to the mock.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Sent {
        Multicast(Vec<u8>),
        Unicast(Endpoint, Vec<u8>),
    }

    impl Sent {
        pub fn bytes(&self) -> &[u8] {
            match self {
                Sent::Multicast(data) | Sent::Unicast(_, data) => data,
            }
        }
    }

    /// Fake transport that records sends and delivers injected datagrams.
    #[derive(Clone)]
    pub struct MockTransport {
        local: Endpoint,
        sent: Arc<Mutex<Vec<Sent>>>,
        inbound_tx: mpsc::UnboundedSender<(Vec<u8>, Endpoint)>,
        inbound_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<(Vec<u8>, Endpoint)>>>,
        fail_sends: Arc<Mutex<bool>>,
    }

    impl MockTransport {
        pub fn new(local: Endpoint) -> Self {
            let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
            Self {
                local,
                sent: Arc::new(Mutex::new(Vec::new())),
                inbound_tx,
                inbound_rx: Arc::new(tokio::sync::Mutex::new(inbound_rx)),
                fail_sends: Arc::new(Mutex::new(false)),
            }
        }

        pub fn sent(&self) -> Vec<Sent> {
            self.sent.lock().unwrap().clone()
        }

        pub fn clear_sent(&self) {
            self.sent.lock().unwrap().clear();
        }

        pub fn set_fail_sends(&self, fail: bool) {
            *self.fail_sends.lock().unwrap() = fail;
        }

        /// Queue a datagram as if `from` had sent it.
        pub fn inject(&self, data: Vec<u8>, from: Endpoint) {
            let _ = self.inbound_tx.send((data, from));
        }

        fn record(&self, sent: Sent) -> Result<(), String> {
            if *self.fail_sends.lock().unwrap() {
                return Err("mock: send failed".to_string());
            }
            self.sent.lock().unwrap().push(sent);
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl Transport for MockTransport {
        async fn send_multicast(&self, data: &[u8]) -> Result<(), String> {
            self.record(Sent::Multicast(data.to_vec()))
        }

        async fn send_unicast(&self, to: Endpoint, data: &[u8]) -> Result<(), String> {
            self.record(Sent::Unicast(to, data.to_vec()))
        }

        async fn recv(&self) -> Result<(Vec<u8>, Endpoint), String> {
            let mut rx = self.inbound_rx.lock().await;
            match rx.recv().await {
                Some(datagram) => Ok(datagram),
                // The mock holds its own sender, so this never closes.
                None => std::future::pending().await,
            }
        }

        fn local_endpoint(&self) -> Endpoint {
            self.local
        }
    }
}
