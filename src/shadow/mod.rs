//! The shadow protocol engine
//!
//! Split by responsibility: [`client`] is the public surface, [`inflight`]
//! correlates requests with replies and timeouts, [`delta`] holds the
//! desired-state handlers, [`dispatcher`] routes inbound traffic, and
//! [`registry`] tracks live clients for the timeout reaper.

pub mod client;
pub mod delta;
pub mod dispatcher;
pub mod inflight;
pub mod registry;

pub use client::{SessionState, ShadowClient};
pub use delta::DeltaRegistry;
pub use inflight::{ActionCallback, InFlightTable, MAX_REQUEST_ID_LENGTH};
pub use registry::REAPER_TICK;
