//! # surelog Testkit
//!
//! Test utilities for surelog.
//!
//! This crate provides:
//! - Temporary logs with scripted processors and recording handlers
//! - Crash simulation: torn tails, garbage, failing storage
//! - Hand-built segment files for recovery tests
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use surelog_testkit::prelude::*;
//!
//! #[test]
//! fn deferred_events_are_retried() {
//!     let test_log = TestLog::new();
//!     test_log.processor.set(Script::Defer);
//!     let log = test_log.open();
//!     log.submit(&Parcel::new(1, "north")).unwrap();
//!     test_log.processor.set(Script::Handle);
//!     log.rotate().unwrap();
//!     assert!(wait_until(DEFAULT_WAIT, || test_log.processor.handled().len() == 1));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
