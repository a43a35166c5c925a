//! # Resync
//!
//! Incremental re-synchronisation of hosted survey data into a destination
//! store, reprojected on the way.
//!
//! A run is a fixed three-stage pipeline:
//!
//! - **Extract**: export the feature service through an async replica job and
//!   unpack it into a local staged dataset
//! - **Transform**: narrow the staged copy to records created since the last
//!   run and stamp them with this run's synchronisation time
//! - **Load**: create the destination schema on the first run, append the
//!   staged rows and re-key attachments onto their new parents
//!
//! Any failure triggers compensating cleanup of what the run wrote before a
//! single terminal error is handed back.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use resync::prelude::*;
//!
//! let parameters = load_parameters(path, None)?.validate()?;
//! let messenger = Arc::new(Messenger::new());
//! let pipeline = SurveyReprojector::standard(
//!     parameters,
//!     StorePorts::default(),
//!     Arc::new(StandaloneHost),
//!     messenger,
//! )?;
//! let report = pipeline.run().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod context;
pub mod errors;
pub mod host;
pub mod observability;
pub mod pipeline;
pub mod portal;
pub mod stages;
pub mod store;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{load_parameters, ExtractConfig, Parameters, RawParameters};
    pub use crate::context::{LoadState, ProcessContext, ProcessStage, RunReport};
    pub use crate::errors::{MigrationError, StoreError, TerminalError};
    pub use crate::host::{HostSession, InteractiveHost, StandaloneHost};
    pub use crate::observability::{init_logging, LogFormat, Messenger};
    pub use crate::pipeline::SurveyReprojector;
    pub use crate::stages::{Extractor, Loader, StagedDataset, StorePorts, Transformer};
    pub use crate::store::{Workspace, WorkspaceFactory};
    pub use crate::utils::Timestamp;
}
