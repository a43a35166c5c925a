//! Feature service replication protocol.

mod client;
pub mod models;

pub use client::PortalClient;
pub use models::{JobState, JobStatus, ReplicaRequest, ServiceDefinition};
