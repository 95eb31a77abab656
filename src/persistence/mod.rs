//! Durable deal state.
//!
//! Each instrument's progress lives in a marker file in the active-state
//! directory until the deal reaches `Profit`, when the marker is moved into
//! the archive directory:
//! - `marker`: audit record format, state tags and file naming
//! - `store`: resolving, transitioning and archiving markers

mod marker;
mod store;

pub use marker::{
    archive_file_name, marker_file_name, ArchivedRecord, AuditEntry, AuditEvent, DealState,
    MarkerRecord,
};
pub use store::{read_record, ActiveMarker, DealStateStore, MarkerHandle, MarkerLocation};
