//! Bed occupancy, reservation and transfer bookkeeping for care facilities.
//!
//! Each facility is an [`engine::Engine`]: bed states held in memory behind
//! per-bed locks and made durable through a write-ahead log. Every write
//! re-checks availability under the lock of the bed(s) it touches and
//! commits, bed-status change included, as a single log record.

pub mod config;
pub mod engine;
pub mod facility;
pub mod limits;
pub mod model;
pub mod observability;
pub mod wal;
