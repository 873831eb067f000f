//! Broker and cluster collaborators.
//!
//! - [`ClusterTopology`] answers which brokers exist and where they listen
//! - [`BrokerAdmin`] reads and writes a broker's view of a topic
//! - [`BrokerClient`] implements [`BrokerAdmin`] over pooled TCP connections

pub mod admin;
pub mod client;
pub mod codec;
pub mod topology;

pub use admin::{AdminRequest, AdminResponse, ApplyAck, BrokerAdmin, MappingSlice};
pub use client::BrokerClient;
pub use codec::{AdminCodec, AdminFrame, DEFAULT_MAX_FRAME_SIZE};
pub use topology::{ClusterTopology, StaticTopology};
