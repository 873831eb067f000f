//! TCP admin client.
//!
//! Keeps at most one connection per broker address. A connection is taken
//! out of the pool for the duration of a request and only returned once the
//! response has been read, so a timed-out or cancelled request never leaves
//! a half-read stream behind.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::config::AdminConfig;
use crate::error::{RpcError, RpcResult};
use crate::mapping::BrokerTopicView;

use super::admin::{AdminRequest, AdminResponse, ApplyAck, BrokerAdmin, MappingSlice};
use super::codec::{AdminCodec, AdminFrame};

type Connection = Framed<TcpStream, AdminCodec>;
type Slot = Arc<Mutex<Option<Connection>>>;

/// Pooled admin client speaking the framed JSON protocol.
pub struct BrokerClient {
    connections: DashMap<String, Slot>,
    correlation_id: AtomicI32,
    connect_timeout: Duration,
    request_timeout: Duration,
    max_frame_size: usize,
}

impl BrokerClient {
    /// Create a client from the `admin` config section.
    #[must_use]
    pub fn new(config: &AdminConfig) -> Self {
        Self {
            connections: DashMap::new(),
            correlation_id: AtomicI32::new(0),
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
            max_frame_size: config.max_frame_size,
        }
    }

    /// Number of addresses with a pooled slot.
    #[must_use]
    pub fn pooled(&self) -> usize {
        self.connections.len()
    }

    fn next_correlation_id(&self) -> i32 {
        self.correlation_id.fetch_add(1, Ordering::Relaxed)
    }

    fn slot(&self, address: &str) -> Slot {
        Arc::clone(
            self.connections
                .entry(address.to_string())
                .or_default()
                .value(),
        )
    }

    async fn connect(&self, address: &str) -> RpcResult<Connection> {
        let stream = match timeout(self.connect_timeout, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                warn!(address, error = %e, "failed to connect to broker");
                return Err(RpcError::Io(e));
            }
            Err(_) => {
                warn!(address, "connection timeout");
                return Err(RpcError::ConnectTimeout {
                    address: address.to_string(),
                    timeout_ms: millis(self.connect_timeout),
                });
            }
        };
        stream.set_nodelay(true)?;
        debug!(address, "connected to broker");
        Ok(Framed::new(
            stream,
            AdminCodec::with_max_frame_size(self.max_frame_size),
        ))
    }

    /// Send one request and wait for its response.
    async fn round_trip(
        &self,
        address: &str,
        request: &AdminRequest,
        request_timeout: Duration,
    ) -> RpcResult<AdminResponse> {
        let slot = self.slot(address);
        let mut guard = slot.lock().await;

        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => self.connect(address).await?,
        };

        let correlation_id = self.next_correlation_id();
        let payload = serde_json::to_vec(request).map_err(|e| RpcError::Protocol {
            message: format!("failed to encode request: {e}"),
        })?;

        debug!(address, correlation_id, request_len = payload.len(), "sending request");

        let outgoing = AdminFrame {
            correlation_id,
            payload: Bytes::from(payload),
        };
        let exchange = async {
            conn.send(outgoing).await?;
            let reply = conn.next().await.transpose()?;
            Ok::<_, std::io::Error>(reply)
        };

        let frame = match timeout(request_timeout, exchange).await {
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => {
                return Err(RpcError::Closed {
                    address: address.to_string(),
                })
            }
            Ok(Err(e)) => return Err(RpcError::Io(e)),
            Err(_) => {
                return Err(RpcError::RequestTimeout {
                    address: address.to_string(),
                    timeout_ms: millis(request_timeout),
                })
            }
        };

        if frame.correlation_id != correlation_id {
            return Err(RpcError::CorrelationIdMismatch {
                expected: correlation_id,
                actual: frame.correlation_id,
            });
        }

        let response = serde_json::from_slice(&frame.payload).map_err(|e| RpcError::Protocol {
            message: format!("failed to decode response from {address}: {e}"),
        })?;

        debug!(address, correlation_id, "received response");
        *guard = Some(conn);
        Ok(response)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl BrokerAdmin for BrokerClient {
    async fn fetch_topic_view(&self, address: &str, topic: &str) -> RpcResult<Option<BrokerTopicView>> {
        let request = AdminRequest::GetTopicView {
            topic: topic.to_string(),
        };
        match self.round_trip(address, &request, self.request_timeout).await? {
            AdminResponse::TopicView { view } => Ok(view),
            AdminResponse::Error { message } => Err(RpcError::Remote { message }),
            other => Err(RpcError::Protocol {
                message: format!("unexpected response to topic view request: {other:?}"),
            }),
        }
    }

    async fn apply_mapping(&self, address: &str, slice: &MappingSlice, timeout: Duration) -> RpcResult<ApplyAck> {
        let request = AdminRequest::ApplyMapping {
            slice: slice.clone(),
        };
        match self.round_trip(address, &request, timeout).await? {
            AdminResponse::Applied(ack) => Ok(ack),
            AdminResponse::Rejected { reason } => Err(RpcError::Rejected { reason }),
            AdminResponse::Error { message } => Err(RpcError::Remote { message }),
            AdminResponse::TopicView { .. } => Err(RpcError::Protocol {
                message: "unexpected topic view in reply to apply request".to_string(),
            }),
        }
    }

    async fn shutdown(&self) {
        let count = self.connections.len();
        self.connections.clear();
        info!(connections = count, "admin connection pool closed");
    }
}
