//! Test support
//!
//! In-memory implementations used by this crate's own tests and available to
//! downstream crates that want to exercise shadow logic without a broker.

pub mod mocks;

pub use mocks::{MockTransport, MockTransportError};
