//! Static Topic Remapper Core Library
//!
//! This library moves the logical queues of a static topic from one set of
//! brokers to another. A static topic keeps a fixed number of logical queues
//! whose offsets stay continuous while the physical queue behind each of them
//! changes; every logical queue carries the history of the physical queues it
//! has lived on.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Domain-specific error types
//! - [`mapping`] - Snapshot model, consistency checker and remapping planner
//! - [`artifact`] - Before/after snapshot files
//! - [`cluster`] - Cluster topology, broker admin protocol and TCP client
//! - [`apply`] - Concurrent per-broker plan application
//! - [`orchestrator`] - The end-to-end run driver
//! - [`metrics`] - Prometheus metrics collection
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use topic_remapper_core::{
//!     BrokerClient, Orchestrator, RemapRequest, RemapperConfig, StaticTopology, TargetSelector,
//! };
//!
//! let config = RemapperConfig::from_file("remapper.yaml")?;
//! let orchestrator = Orchestrator::new(
//!     Arc::new(StaticTopology::from_config(&config.cluster)),
//!     Arc::new(BrokerClient::new(&config.admin)),
//!     &config,
//! );
//!
//! let request = RemapRequest::live(
//!     "orders",
//!     TargetSelector::Brokers(vec!["broker-b".into(), "broker-c".into()]),
//! );
//! let report = orchestrator.run(&request).await?;
//! println!("{}", report.apply.summary());
//! ```

#![forbid(unsafe_code)]

pub mod apply;
pub mod artifact;
pub mod cluster;
pub mod config;
pub mod error;
pub mod mapping;
pub mod metrics;
pub mod orchestrator;

/// Test utilities for integration testing.
///
/// This module is only available when compiling tests or when the `testing` feature is enabled.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use apply::{Applicator, ApplyReport, BrokerOutcome};
pub use artifact::ArtifactStore;
pub use cluster::{BrokerAdmin, BrokerClient, ClusterTopology, MappingSlice, StaticTopology};
pub use config::RemapperConfig;
pub use error::{ApplyError, ConfigError, ConsistencyError, PersistError, PlanError, RemapError, Result, RpcError};
pub use mapping::{BrokerTopicView, MappingItem, MappingSnapshot, Planner, SnapshotKind};
pub use metrics::RemapMetrics;
pub use orchestrator::{Orchestrator, RemapRequest, RunReport, Stage, TargetSelector};
