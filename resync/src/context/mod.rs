//! Run state shared by the pipeline stages.
//!
//! A single [`ProcessContext`] is created per run and lent mutably to each
//! stage in turn. It carries the run's time anchor, the watermark, and the
//! compensating actions the orchestrator owes if the run fails.

mod process;

pub use process::{CleanupOperations, LoadState, ProcessContext, ProcessStage, RunReport};
