//! Reply Scheduler — decides when and in what order composed email
//! responses are dispatched, retries failed sends with exponential
//! backoff, and exposes live scheduling state.

pub mod config;
pub mod error;
pub mod response;
pub mod rules;
pub mod scheduler;
pub mod transport;
