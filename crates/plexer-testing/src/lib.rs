//! Test clocks, environments, and fixtures for plexer.
//!
//! Shared by crate-level and end-to-end tests. Not compiled into the
//! production binary.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod env;
pub mod time;

pub use env::TestEnv;
pub use time::TestClock;
