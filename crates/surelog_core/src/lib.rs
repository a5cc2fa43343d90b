//! # surelog core
//!
//! A durable, at-least-once event log.
//!
//! This crate provides:
//! - Segment files with BEGIN/COMMIT records and crash recovery
//! - Periodic rotation of the current segment into a sealed set
//! - Immediate processing of submitted events, with background retry of
//!   events the processor could not handle yet
//! - Read-only inspection of log directories
//!
//! ## Guarantees
//!
//! - An event is durable before it is first offered to the processor.
//! - Every durable event is eventually handled or reported as a terminal
//!   failure, across restarts.
//! - Events may be offered more than once; processors must be idempotent.
//! - Order of delivery is not preserved.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod handlers;
pub mod inspect;
mod manager;
mod processing;
mod retry;
mod surelog;
mod types;
pub mod wal;

pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use handlers::{CorruptionHandler, CorruptionReport, FailureHandler, LogCorruption, LogFailure};
pub use manager::{parse_sealed, sealed_name, RotationPause, SegmentManager, CURRENT_SEGMENT};
pub use processing::{Disposition, EventProcessor, ProcessingFault, TerminalFailure};
pub use surelog::{processor_fn, PendingEvent, Submission, SureLog, SureLogBuilder};
pub use types::EventId;
pub use wal::{BeginOutcome, Segment, SegmentContext};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
