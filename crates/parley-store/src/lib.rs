//! # parley-store
//!
//! Flat-file persistence for the Parley chat server.
//!
//! - [`RoomLogStore`]: one JSON array per room, rewritten whole on every
//!   mutation and serialised per room.
//! - [`ReportStore`]: abuse reports, one pretty-printed file each.
//! - [`UploadStore`]: chat attachments stored as opaque files.

pub mod reports;
pub mod room_log;
pub mod uploads;

mod error;
mod paths;

pub use error::{Result, StoreError};
pub use reports::{Report, ReportStore, StoredReport};
pub use room_log::{EditOutcome, RoomLogStore};
pub use uploads::UploadStore;
