//! Domain error types for static topic remapping.
//!
//! Uses `thiserror` for ergonomic error definitions with proper context.
//! Validation and planning errors abort a run before any broker is touched;
//! [`ApplyError`] is collected per broker instead of being raised.

use std::path::PathBuf;

use thiserror::Error;

/// Errors related to configuration parsing and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Invalid address format.
    #[error("invalid address format for broker '{broker}': {address} (expected 'host:port')")]
    InvalidAddress { broker: String, address: String },

    /// The same broker name is declared in two clusters.
    #[error("broker '{broker}' is declared in both cluster '{first}' and cluster '{second}'")]
    DuplicateBroker {
        broker: String,
        first: String,
        second: String,
    },

    /// Block size used to round logical offsets must be positive.
    #[error("block_seq_size must be at least 1, got {0}")]
    InvalidBlockSeqSize(i64),

    /// A timeout of zero would fail every request.
    #[error("{name} must be greater than zero")]
    ZeroTimeout { name: &'static str },
}

/// The cluster's per-broker views of a topic do not form a valid snapshot.
///
/// Never resolved automatically; always surfaced to the operator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyError {
    /// No broker reported a view of the topic.
    #[error("no broker hosts topic '{topic}'")]
    EmptyBrokerSet { topic: String },

    /// A view is filed under a different broker name than it reports.
    #[error("view keyed by broker '{key}' reports broker name '{reported}'")]
    BrokerNameMismatch { key: String, reported: String },

    /// A view belongs to another topic.
    #[error("broker '{broker}' reports topic '{found}', expected '{expected}'")]
    TopicMismatch {
        broker: String,
        expected: String,
        found: String,
    },

    /// Two views disagree on the mapping epoch.
    #[error("epoch does not match: {expected} != {found} in broker '{broker}'")]
    EpochMismatch {
        broker: String,
        expected: u64,
        found: u64,
    },

    /// Two views disagree on the number of logical queues.
    #[error("logical queue count does not match: {expected} != {found} in broker '{broker}'")]
    QueueCountMismatch {
        broker: String,
        expected: u32,
        found: u32,
    },

    /// A logical queue has no mapping items.
    #[error("logical queue {queue} has no mapping items in broker '{broker}'")]
    EmptyHistory { broker: String, queue: u32 },

    /// A logical queue's item sequence breaks the timeline invariant.
    #[error("invalid history for logical queue {queue} in broker '{broker}': {reason}")]
    InvalidHistory {
        broker: String,
        queue: u32,
        reason: String,
    },

    /// Two brokers both claim to lead the same logical queue.
    #[error("logical queue {queue} is led by both '{first}' and '{second}'")]
    DuplicateLeader {
        queue: u32,
        first: String,
        second: String,
    },

    /// The led logical queues do not cover `0..total_queues` exactly.
    #[error("logical queue {queue} is not led by any broker (total queues {total})")]
    MissingQueue { queue: u32, total: u32 },

    /// A led logical queue id falls outside the configured count.
    #[error("logical queue {queue} is out of range (total queues {total})")]
    QueueOutOfRange { queue: u32, total: u32 },

    /// Two logical queues map onto the same physical queue.
    #[error("physical queue {broker}/{queue_id} is used by logical queues {first} and {second}")]
    PhysicalQueueReused {
        broker: String,
        queue_id: u32,
        first: u32,
        second: u32,
    },

    /// A broker hosts an item beyond its configured queue counts.
    #[error("broker '{broker}' hosts physical queue {queue_id} but only has {read} read / {write} write queues")]
    PhysicalQueueOutOfRange {
        broker: String,
        queue_id: u32,
        read: u32,
        write: u32,
    },
}

/// Errors raised while computing a remapping plan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    /// The operator asked for no brokers at all.
    #[error("target broker set is empty")]
    EmptyTarget,

    /// The request would not change the assignment.
    #[error("topic '{topic}' already matches the requested broker set, nothing to do")]
    NoOp { topic: String },

    /// The broker giving up a queue did not report where its writes end.
    #[error("broker '{broker}' reported no write offset for physical queue {queue_id} (logical queue {queue})")]
    MissingWriteOffset {
        broker: String,
        queue: u32,
        queue_id: u32,
    },

    /// The snapshot epoch has no successor.
    #[error("topic '{topic}' is at epoch {epoch}, which cannot be advanced")]
    EpochOverflow { topic: String, epoch: u64 },

    /// The input (or the computed output) failed the consistency check.
    #[error(transparent)]
    Inconsistent(#[from] ConsistencyError),
}

/// Errors from writing or reading snapshot artifacts.
#[derive(Error, Debug)]
pub enum PersistError {
    /// Filesystem failure.
    #[error("artifact I/O failed for '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Snapshot could not be serialized.
    #[error("failed to encode snapshot: {0}")]
    Encode(#[source] serde_json::Error),

    /// Bytes are not a valid snapshot.
    #[error("failed to decode snapshot: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Transport-level errors talking to a broker.
#[derive(Error, Debug)]
pub enum RpcError {
    /// TCP/IO error.
    #[error("connection error: {0}")]
    Io(#[from] std::io::Error),

    /// Could not connect within the configured timeout.
    #[error("connect to {address} timed out after {timeout_ms}ms")]
    ConnectTimeout { address: String, timeout_ms: u64 },

    /// No response within the request timeout.
    #[error("no response from {address} within {timeout_ms}ms")]
    RequestTimeout { address: String, timeout_ms: u64 },

    /// Broker closed the connection before answering.
    #[error("connection to {address} closed")]
    Closed { address: String },

    /// Request or response body was not valid JSON for the protocol.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// Response correlation ID mismatch.
    #[error("correlation ID mismatch: expected {expected}, got {actual}")]
    CorrelationIdMismatch { expected: i32, actual: i32 },

    /// Broker answered with an error.
    #[error("broker error: {message}")]
    Remote { message: String },

    /// Broker refused to apply a mapping.
    #[error("rejected by broker: {reason}")]
    Rejected { reason: String },

    /// Cluster topology is empty or unavailable.
    #[error("cluster topology unavailable: {message}")]
    TopologyUnavailable { message: String },
}

/// Per-broker failure during the apply phase.
#[derive(Error, Debug)]
pub enum ApplyError {
    /// The broker did not answer within the per-request timeout.
    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The broker refused the plan (for example an epoch mismatch).
    #[error("rejected: {reason}")]
    Rejected { reason: String },

    /// The request could not be delivered or answered.
    #[error("transport failure: {0}")]
    Transport(RpcError),
}

impl From<RpcError> for ApplyError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::Rejected { reason } => Self::Rejected { reason },
            RpcError::RequestTimeout { timeout_ms, .. } => Self::Timeout { timeout_ms },
            other => Self::Transport(other),
        }
    }
}

/// Errors that abort a remapping run.
#[derive(Error, Debug)]
pub enum RemapError {
    /// Cluster views disagree.
    #[error("inconsistent cluster state: {0}")]
    InconsistentState(#[from] ConsistencyError),

    /// Planning failed or had nothing to do.
    #[error(transparent)]
    Plan(#[from] PlanError),

    /// The target selector expanded to no brokers.
    #[error("no brokers selected for topic '{topic}'")]
    EmptyTarget { topic: String },

    /// A broker name could not be resolved to a master address.
    #[error("cannot resolve address for broker '{broker}'")]
    BrokerUnresolved { broker: String },

    /// The operator request itself is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Topic name fails validation.
    #[error("invalid topic name '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },

    /// Could not read the cluster layout.
    #[error("failed to read cluster topology: {0}")]
    Topology(#[source] RpcError),

    /// Could not fetch a broker's view of the topic.
    #[error("failed to fetch topic view from broker '{broker}': {source}")]
    Fetch {
        broker: String,
        #[source]
        source: RpcError,
    },

    /// An audit artifact could not be written or read.
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistError),
}

/// Result type alias for remapping runs.
pub type Result<T> = std::result::Result<T, RemapError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for consistency checks.
pub type CheckResult<T> = std::result::Result<T, ConsistencyError>;

/// Result type alias for planning.
pub type PlanResult<T> = std::result::Result<T, PlanError>;

/// Result type alias for artifact operations.
pub type PersistResult<T> = std::result::Result<T, PersistError>;

/// Result type alias for broker RPCs.
pub type RpcResult<T> = std::result::Result<T, RpcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consistency_error_display() {
        let err = ConsistencyError::EpochMismatch {
            broker: "broker-b".to_string(),
            expected: 3,
            found: 4,
        };
        let msg = err.to_string();
        assert!(msg.contains("broker-b"));
        assert!(msg.contains('3'));
        assert!(msg.contains('4'));
    }

    #[test]
    fn test_plan_error_from_consistency() {
        let err: PlanError = ConsistencyError::EmptyBrokerSet {
            topic: "orders".to_string(),
        }
        .into();
        assert!(matches!(err, PlanError::Inconsistent(_)));
        assert!(err.to_string().contains("orders"));
    }

    #[test]
    fn test_rpc_rejection_becomes_apply_rejection() {
        let err: ApplyError = RpcError::Rejected {
            reason: "epoch 5 != 3".to_string(),
        }
        .into();
        assert!(matches!(err, ApplyError::Rejected { .. }));

        let err: ApplyError = RpcError::Closed {
            address: "127.0.0.1:1".to_string(),
        }
        .into();
        assert!(matches!(err, ApplyError::Transport(_)));

        let err: ApplyError = RpcError::RequestTimeout {
            address: "127.0.0.1:1".to_string(),
            timeout_ms: 250,
        }
        .into();
        assert!(matches!(err, ApplyError::Timeout { timeout_ms: 250 }));
    }

    #[test]
    fn test_remap_error_from_plan() {
        let err: RemapError = PlanError::NoOp {
            topic: "orders".to_string(),
        }
        .into();
        assert!(matches!(err, RemapError::Plan(PlanError::NoOp { .. })));
    }

    #[test]
    fn test_persist_error_display_includes_path() {
        let err = PersistError::Io {
            path: PathBuf::from("/nowhere/x.json"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert!(err.to_string().contains("/nowhere/x.json"));
    }
}
