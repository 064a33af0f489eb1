//! # FlowPilot Core
//!
//! Domain types, traits, and error definitions for the FlowPilot planned
//! execution pipeline. Everything a request needs to report its lifecycle
//! lives here: the cancellation token, the event channel, step timing and
//! the per-request execution context.
//!
//! The model and tool contracts are defined as traits; implementations live
//! in their respective crates.

pub mod cancel;
pub mod channel;
pub mod error;
pub mod event;
pub mod execution;
pub mod message;
pub mod plan;
pub mod provider;
pub mod timing;
pub mod tool;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export key types at crate root for ergonomics
pub use cancel::CancellationToken;
pub use channel::{EventSender, EventStream, event_channel};
pub use error::{ProviderError, RunError, ToolError};
pub use event::{Event, EventKind, StepDisplay, StepKey, StepKind, StepStatus};
pub use execution::ExecutionContext;
pub use message::{Message, Role};
pub use plan::{ActionPlan, PlanStep, QueryType};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use timing::TimingTracker;
pub use tool::{Tool, ToolCall, ToolRegistry, ToolResult};
