//! Pipeline orchestration.
//!
//! This module provides:
//! - The [`SurveyReprojector`] orchestrator
//! - Compensating cleanup for failed runs

mod cleanup;
mod integration_tests;
mod orchestrator;

pub use cleanup::CompensatingCleanup;
pub use orchestrator::{SurveyReprojector, FAILURE_EXIT_CODE};
