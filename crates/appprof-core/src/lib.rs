//! App-scoped profiling: permission provisioning and sandboxed collection.
//!
//! Two phases:
//!
//! - **prepare**: grant one app permission to sample itself, either as a
//!   durable grant record ([`grant`]) or by relaxing the kernel's perf
//!   restriction for the boot ([`platform`]), then export the tracepoint list
//!   ([`tracepoint`]).
//! - **collect**: re-enter the app's sandbox ([`sandbox`]), watch for
//!   cancellation ([`stop_signal`]), pack the recording data into one ZIP
//!   archive ([`collector`]), and remove the data directory on
//!   success ([`cleaner`]).

pub mod cleaner;
pub mod collector;
pub mod error;
pub mod grant;
pub mod platform;
pub mod property;
pub mod sandbox;
pub mod stop_signal;
pub mod tracepoint;
pub mod uid;

pub use error::{Error, Result};
