//! Run configuration.

mod file;
mod parameters;

pub use file::{load_parameters, parse_parameters, section_names};
pub use parameters::{ExtractConfig, Parameters, RawParameters, DEFAULT_TRANSFORMATION};
