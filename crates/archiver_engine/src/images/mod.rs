//! Image archival.
//!
//! References are grouped by source URL so each resource is fetched once per
//! run. Fetches run under the per-run limit; decoding and re-encoding also
//! need one of the process-wide [`ConversionSlots`] and run on the blocking
//! pool. Any failure drops the affected references and never the run.

mod archive;
mod convert;
mod slots;

pub use archive::{ArchivedImages, ImageArchiver};
pub use slots::{ConversionSlots, SlotError};
