//! Request engine: one worker task per request, observed through its stream.
//!
//! `start_request` returns immediately. The worker owns the request's
//! [`ExecutionContext`] and publishes exactly one terminal event. A
//! supervisor awaits the worker and publishes an `error` if the worker
//! panicked or returned without finishing the stream.

use flowpilot_config::AppConfig;
use flowpilot_core::cancel::CancellationToken;
use flowpilot_core::channel::{EventStream, event_channel};
use flowpilot_core::error::RunError;
use flowpilot_core::event::Event;
use flowpilot_core::execution::ExecutionContext;
use flowpilot_core::plan::ActionPlan;
use flowpilot_core::provider::Provider;
use flowpilot_core::tool::ToolRegistry;
use flowpilot_workflow::{FlowBuilder, PhasePipeline};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, error, info, info_span};

use crate::executor::AgentExecutor;
use crate::planner::Planner;

/// Which path a request takes through the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestMode {
    /// Planner, then the agent executor.
    #[default]
    Agent,
    /// The fixed analyze → search → build pipeline.
    FlowBuild,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub query: String,
    #[serde(default)]
    pub mode: RequestMode,
}

impl Request {
    pub fn agent(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            mode: RequestMode::Agent,
        }
    }

    pub fn flow(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            mode: RequestMode::FlowBuild,
        }
    }
}

/// Shared by every request; cheap to clone.
#[derive(Clone)]
pub struct Engine {
    planner: Option<Arc<Planner>>,
    executor: Arc<AgentExecutor>,
    pipeline: Arc<PhasePipeline>,
    time_limit: Option<Duration>,
}

impl Engine {
    /// Build an engine from configuration around one provider and tool set.
    pub fn new(provider: Arc<dyn Provider>, tools: ToolRegistry, config: &AppConfig) -> Self {
        let planner = config.planner.enabled.then(|| {
            Planner::new(provider.clone(), config.planner_model())
                .with_temperature(config.temperature)
                .with_fast_path(config.planner.fast_path)
                .with_cache_size(config.planner.cache_size)
                .with_tool_hints("check_tool", config.flow.search_tool.clone())
        });

        let mut executor = AgentExecutor::new(provider.clone(), &config.model, tools.clone())
            .with_max_iterations(config.executor.max_iterations)
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens);
        if let Some(prompt) = &config.executor.system_prompt {
            executor = executor.with_system_prompt(prompt.clone());
        }

        let pipeline = FlowBuilder::new(provider, tools, config.flow_model())
            .with_search_tool(config.flow.search_tool.clone())
            .with_temperature(config.temperature)
            .with_max_tokens(config.max_tokens)
            .pipeline();

        Self::from_parts(planner, executor, pipeline).with_time_limit(config.time_limit())
    }

    pub fn from_parts(
        planner: Option<Planner>,
        executor: AgentExecutor,
        pipeline: PhasePipeline,
    ) -> Self {
        Self {
            planner: planner.map(Arc::new),
            executor: Arc::new(executor),
            pipeline: Arc::new(pipeline),
            time_limit: None,
        }
    }

    pub fn with_time_limit(mut self, limit: Option<Duration>) -> Self {
        self.time_limit = limit;
        self
    }

    /// Start `request` on its own task and return its event stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_request(&self, request: Request, token: CancellationToken) -> EventStream {
        let (events, stream) = event_channel();
        let supervisor_events = events.clone();
        let ctx = ExecutionContext::new(events, token).with_time_limit(self.time_limit);
        let request_id = ctx.request_id();
        let span = info_span!("request", %request_id, mode = ?request.mode);

        let engine = self.clone();
        let worker = tokio::spawn(async move { engine.run(request, ctx).await }.instrument(span));

        tokio::spawn(async move {
            let message = match worker.await {
                Ok(()) if supervisor_events.is_terminated() => return,
                Ok(()) => "internal error: request ended without a result".to_string(),
                Err(e) => {
                    error!(%request_id, error = %e, "Request worker failed");
                    format!("internal error: {e}")
                }
            };
            supervisor_events.publish(Event::error(message, None));
        });

        stream
    }

    async fn run(&self, request: Request, mut ctx: ExecutionContext) {
        info!(query_len = request.query.len(), "Request started");
        let result = match request.mode {
            RequestMode::Agent => self.run_agent(&request.query, &mut ctx).await,
            RequestMode::FlowBuild => self
                .pipeline
                .run(&request.query, &mut ctx)
                .await
                .map(|outcome| {
                    for record in &outcome.records {
                        info!(
                            phase = %record.name,
                            started = %record.start_time,
                            duration = ?record.duration,
                            status = ?record.status,
                            "Phase record"
                        );
                    }
                    (outcome.output, None)
                }),
        };
        match result {
            Ok((answer, plan)) => ctx.finish_done(answer, plan),
            Err(e) => ctx.finish_failed(&e),
        }
    }

    async fn run_agent(
        &self,
        query: &str,
        ctx: &mut ExecutionContext,
    ) -> Result<(String, Option<ActionPlan>), RunError> {
        let plan = match &self.planner {
            Some(planner) => Some(planner.plan(query, ctx).await?),
            None => None,
        };
        let outcome = self.executor.run(query, plan.as_ref(), ctx).await?;
        Ok((outcome.answer, plan))
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("planner", &self.planner.is_some())
            .field("max_iterations", &self.executor.max_iterations())
            .field("pipeline", &self.pipeline)
            .field("time_limit", &self.time_limit)
            .finish()
    }
}
