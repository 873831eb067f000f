//! Test utilities for the static topic remapper.
//!
//! This module provides infrastructure for integration testing:
//!
//! - [`MockBroker`] - An admin-protocol broker holding per-topic views
//! - [`MockCluster`] - Several mock brokers plus a matching topology
//! - [`static_topic`] - Builds a consistent snapshot from a leader list
//!
//! # Example
//!
//! ```rust,ignore
//! use topic_remapper_core::testing::{static_topic, MockCluster};
//!
//! #[tokio::test]
//! async fn test_move_topic() {
//!     let cluster = MockCluster::start("DefaultCluster", &["a", "b", "c"]).await;
//!     cluster.seed(&static_topic("orders", 3, &["a", "a", "b", "b"], 100)).await;
//!
//!     let orchestrator = cluster.orchestrator(&config);
//!     let report = orchestrator.run(&request).await.unwrap();
//!     assert!(report.is_success());
//! }
//! ```

pub mod harness;
pub mod mock_broker;

pub use harness::{static_topic, MockCluster};
pub use mock_broker::MockBroker;
