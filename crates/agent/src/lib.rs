//! Planned execution for FlowPilot.
//!
//! A request in agent mode runs in two stages:
//!
//! 1. **Plan**: the [`Planner`] produces one advisory [`ActionPlan`]
//!    (cache, fast path or a single model call; never fails).
//! 2. **Execute**: the [`AgentExecutor`] alternates model calls and tool
//!    calls until the model answers, bounded by an iteration ceiling.
//!
//! The [`Engine`] runs each request on its own task and reports progress as
//! an [`EventStream`] that ends with exactly one terminal event.
//!
//! [`ActionPlan`]: flowpilot_core::plan::ActionPlan

pub mod engine;
pub mod executor;
pub mod planner;

pub use engine::{Engine, Request, RequestMode};
pub use executor::{AgentExecutor, AgentOutcome};
pub use planner::{PlanSource, Planner};

use flowpilot_core::cancel::CancellationToken;
use flowpilot_core::channel::EventStream;
use flowpilot_core::event::Event;

/// Ask the request holding `token` to stop at its next checkpoint.
///
/// Returns `false` if cancellation had already been signalled.
pub fn signal_cancel(token: &CancellationToken) -> bool {
    token.signal()
}

/// Collect every event of a request, terminal event included.
pub async fn drain(stream: EventStream) -> Vec<Event> {
    stream.drain().await
}
