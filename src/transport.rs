//! Transport trait — the external delivery capability.
//!
//! The scheduler never implements protocol-level delivery. It depends on
//! this abstract send capability; the surrounding application wires in an
//! SMTP or API implementation.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::response::ComposedResponse;

/// Abstract message transport — pure I/O, no scheduling logic.
///
/// `send` may block or take non-trivial time; the dispatch worker calls it
/// from its own loop so callers of `schedule`/`cancel` are never stalled.
/// The transport is responsible for bounding its own latency — a send that
/// never returns stalls the worker loop.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Transport name (e.g. "smtp", "sendgrid").
    fn name(&self) -> &str;

    /// Attempt delivery of one response.
    ///
    /// `Ok(false)` and `Err(_)` both signal a transient failure and take
    /// the retry/backoff path.
    async fn send(&self, response: &ComposedResponse) -> Result<bool, TransportError>;
}
