//! Testing utilities for re-synchronisation pipelines.
//!
//! This module provides:
//! - In-memory survey replicas and prior destinations
//! - Fault-injecting workspace wrappers
//! - Stage doubles for exercising the orchestrator

mod fixtures;
mod mocks;

pub use fixtures::{
    form_schema, memory_ports, prior_destination, repeat_schema, sample_parameters, t0, t0_plus,
    SurveyFixture, DESTINATION, SAMPLE_PREFIX, STAGING_LOCATION,
};
pub use mocks::{
    FailingExtractor, FaultyWorkspace, RecordingStage, StaticExtractor, WorkspaceOp,
};
