//! Stdio front end of the trust assessment engine.
//!
//! Envelopes arrive as JSON lines on stdin and leave as JSON lines on
//! stdout, each tagged with its destination topic. Logs go to stderr.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod error;
pub mod logging;
pub mod stdio;

pub use error::DaemonError;
