//! Utility functions for timestamps and GUIDs.

mod guids;
pub mod timestamps;

pub use guids::{generate_guid, normalize_guid};
pub use timestamps::{
    now_in_timezone, parse_timezone, process_time, timestamp_text, to_utc,
    truncate_to_seconds, Timestamp,
};
