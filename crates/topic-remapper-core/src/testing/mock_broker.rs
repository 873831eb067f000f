//! Mock broker for integration testing.
//!
//! A lightweight broker that:
//! - Accepts admin protocol connections
//! - Records every request received
//! - Serves and stores per-topic views, enforcing the epoch guard on apply

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, RwLock};
use tokio_util::codec::Framed;

use crate::cluster::{AdminCodec, AdminFrame, AdminRequest, AdminResponse, ApplyAck, MappingSlice};
use crate::mapping::BrokerTopicView;

#[derive(Debug, Default)]
struct BrokerState {
    views: HashMap<String, BrokerTopicView>,
    apply_delay: Option<Duration>,
}

/// Mock broker for testing.
pub struct MockBroker {
    name: String,
    address: Option<String>,
    shutdown_tx: Option<broadcast::Sender<()>>,
    state: Arc<RwLock<BrokerState>>,
    call_log: Arc<RwLock<Vec<AdminRequest>>>,
    connections: Arc<AtomicUsize>,
}

impl MockBroker {
    /// Create a mock broker named `name`. Call [`start`](Self::start) to listen.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: None,
            shutdown_tx: None,
            state: Arc::new(RwLock::new(BrokerState::default())),
            call_log: Arc::new(RwLock::new(Vec::new())),
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Start listening on an ephemeral localhost port.
    ///
    /// Returns the address the broker is listening on.
    ///
    /// # Errors
    ///
    /// Returns an error if binding fails.
    pub async fn start(&mut self) -> std::io::Result<String> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?.to_string();
        self.address = Some(address.clone());

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx.clone());

        let name = self.name.clone();
        let state = Arc::clone(&self.state);
        let call_log = Arc::clone(&self.call_log);
        let connections = Arc::clone(&self.connections);
        let mut shutdown_rx = shutdown_tx.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    result = listener.accept() => {
                        let Ok((stream, _)) = result else { break };
                        connections.fetch_add(1, Ordering::SeqCst);

                        let name = name.clone();
                        let state = Arc::clone(&state);
                        let call_log = Arc::clone(&call_log);
                        let shutdown_rx = shutdown_tx.subscribe();
                        tokio::spawn(async move {
                            Self::handle_connection(stream, name, state, call_log, shutdown_rx).await;
                        });
                    }
                }
            }
        });

        Ok(address)
    }

    /// Stop accepting and close open connections.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Broker name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Listening address, once started.
    #[must_use]
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Install (or replace) the broker's view of a topic.
    pub async fn set_view(&self, view: BrokerTopicView) {
        self.state
            .write()
            .await
            .views
            .insert(view.topic().to_string(), view);
    }

    /// Current view of `topic`.
    pub async fn view(&self, topic: &str) -> Option<BrokerTopicView> {
        self.state.read().await.views.get(topic).cloned()
    }

    /// Delay every apply response, to provoke client timeouts.
    pub async fn set_apply_delay(&self, delay: Duration) {
        self.state.write().await.apply_delay = Some(delay);
    }

    /// All requests received so far.
    pub async fn calls(&self) -> Vec<AdminRequest> {
        self.call_log.read().await.clone()
    }

    /// Apply requests received so far.
    pub async fn apply_calls(&self) -> Vec<MappingSlice> {
        self.call_log
            .read()
            .await
            .iter()
            .filter_map(|call| match call {
                AdminRequest::ApplyMapping { slice } => Some(slice.clone()),
                AdminRequest::GetTopicView { .. } => None,
            })
            .collect()
    }

    /// Number of connections accepted.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    async fn handle_connection(
        stream: TcpStream,
        name: String,
        state: Arc<RwLock<BrokerState>>,
        call_log: Arc<RwLock<Vec<AdminRequest>>>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut framed = Framed::new(stream, AdminCodec::new());
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                frame = framed.next() => {
                    let Some(Ok(frame)) = frame else { break };

                    let response = match serde_json::from_slice::<AdminRequest>(&frame.payload) {
                        Ok(request) => {
                            call_log.write().await.push(request.clone());
                            Self::respond(&name, &state, request).await
                        }
                        Err(e) => AdminResponse::Error {
                            message: format!("malformed request: {e}"),
                        },
                    };

                    let Ok(payload) = serde_json::to_vec(&response) else { break };
                    let reply = AdminFrame {
                        correlation_id: frame.correlation_id,
                        payload: Bytes::from(payload),
                    };
                    if framed.send(reply).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    async fn respond(name: &str, state: &RwLock<BrokerState>, request: AdminRequest) -> AdminResponse {
        match request {
            AdminRequest::GetTopicView { topic } => AdminResponse::TopicView {
                view: state.read().await.views.get(&topic).cloned(),
            },
            AdminRequest::ApplyMapping { slice } => {
                let delay = state.read().await.apply_delay;
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                Self::apply(name, &mut *state.write().await, slice)
            }
        }
    }

    fn apply(name: &str, state: &mut BrokerState, slice: MappingSlice) -> AdminResponse {
        if slice.broker != name || slice.view.broker != name {
            return AdminResponse::Error {
                message: format!("slice for '{}' sent to broker '{name}'", slice.broker),
            };
        }

        if let Some(local) = state.views.get(&slice.topic) {
            if !slice.force && local.epoch != slice.expected_epoch {
                return AdminResponse::Rejected {
                    reason: format!(
                        "epoch mismatch: local {} != expected {}",
                        local.epoch, slice.expected_epoch
                    ),
                };
            }
        }

        let epoch = slice.view.epoch;
        state.views.insert(slice.topic.clone(), slice.view);
        AdminResponse::Applied(ApplyAck {
            broker: name.to_string(),
            epoch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::BrokerAdmin;
    use crate::cluster::BrokerClient;
    use crate::config::AdminConfig;
    use crate::error::RpcError;

    fn slice(expected_epoch: u64, force: bool) -> MappingSlice {
        MappingSlice {
            topic: "orders".to_string(),
            broker: "broker-a".to_string(),
            expected_epoch,
            force,
            view: BrokerTopicView::new("broker-a", "orders", 5, 1),
        }
    }

    #[tokio::test]
    async fn test_mock_broker_start_stop() {
        let mut broker = MockBroker::new("broker-a");
        let address = broker.start().await.unwrap();
        assert!(address.starts_with("127.0.0.1:"));
        assert_eq!(broker.address(), Some(address.as_str()));
        broker.stop().await;
    }

    #[tokio::test]
    async fn test_apply_accepts_matching_epoch() {
        let mut broker = MockBroker::new("broker-a");
        broker.set_view(BrokerTopicView::new("broker-a", "orders", 4, 1)).await;
        let address = broker.start().await.unwrap();

        let client = BrokerClient::new(&AdminConfig::default());
        let ack = client
            .apply_mapping(&address, &slice(4, false), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(ack.epoch, 5);
        assert_eq!(broker.view("orders").await.unwrap().epoch, 5);
        assert_eq!(broker.apply_calls().await.len(), 1);
        assert!(matches!(
            broker.calls().await.as_slice(),
            [AdminRequest::ApplyMapping { .. }]
        ));

        broker.stop().await;
    }

    #[tokio::test]
    async fn test_apply_rejects_stale_epoch_unless_forced() {
        let mut broker = MockBroker::new("broker-a");
        broker.set_view(BrokerTopicView::new("broker-a", "orders", 9, 1)).await;
        let address = broker.start().await.unwrap();

        let client = BrokerClient::new(&AdminConfig::default());
        let result = client
            .apply_mapping(&address, &slice(4, false), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(RpcError::Rejected { .. })));
        assert_eq!(broker.view("orders").await.unwrap().epoch, 9);

        let ack = client
            .apply_mapping(&address, &slice(4, true), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(ack.epoch, 5);

        broker.stop().await;
    }

    #[tokio::test]
    async fn test_apply_without_local_view_is_accepted() {
        let mut broker = MockBroker::new("broker-a");
        let address = broker.start().await.unwrap();

        let client = BrokerClient::new(&AdminConfig::default());
        client
            .apply_mapping(&address, &slice(4, false), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(broker.view("orders").await.is_some());

        broker.stop().await;
    }

    #[tokio::test]
    async fn test_slice_for_other_broker_is_an_error() {
        let mut broker = MockBroker::new("broker-b");
        let address = broker.start().await.unwrap();

        let client = BrokerClient::new(&AdminConfig::default());
        let result = client
            .apply_mapping(&address, &slice(4, false), Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(RpcError::Remote { .. })));

        broker.stop().await;
    }
}
