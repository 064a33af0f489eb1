//! The agent reasoning loop.
//!
//! Each iteration is one model call (a reasoning step) followed by the tool
//! calls it requests (one action step each). The loop ends when the model
//! answers without tool calls, when the iteration ceiling is hit, or at the
//! first failed checkpoint.

use flowpilot_core::error::RunError;
use flowpilot_core::event::{StepDisplay, StepStatus};
use flowpilot_core::execution::ExecutionContext;
use flowpilot_core::message::Message;
use flowpilot_core::plan::ActionPlan;
use flowpilot_core::provider::{Provider, ProviderRequest};
use flowpilot_core::tool::{ToolCall, ToolRegistry};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::planner::Planner;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a workflow automation assistant. \
Use the available tools to look up integrations and their configuration, \
then answer concisely. Do not repeat a tool call that already succeeded.";

/// Result of a finished executor run.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentOutcome {
    pub answer: String,
    pub iterations: u32,
    pub tool_calls: u32,
}

pub struct AgentExecutor {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    tools: ToolRegistry,
    max_iterations: u32,
    system_prompt: String,
}

impl AgentExecutor {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, tools: ToolRegistry) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.2,
            max_tokens: None,
            tools,
            max_iterations: 25,
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
        }
    }

    /// Set the maximum number of model calls per run.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    fn system_message(&self, plan: Option<&ActionPlan>) -> Message {
        match plan {
            Some(plan) => Message::system(format!(
                "{}\n\n{}",
                self.system_prompt,
                Planner::format_for_agent(plan)
            )),
            None => Message::system(self.system_prompt.clone()),
        }
    }

    /// Run the loop until the model produces a final answer.
    pub async fn run(
        &self,
        query: &str,
        plan: Option<&ActionPlan>,
        ctx: &mut ExecutionContext,
    ) -> Result<AgentOutcome, RunError> {
        info!(
            request_id = %ctx.request_id(),
            tools = self.tools.len(),
            max_iterations = self.max_iterations,
            "Starting agent run"
        );

        let mut messages = vec![self.system_message(plan), Message::user(query)];
        let tool_definitions = self.tools.definitions();
        let mut iteration = 0;
        let mut tool_calls = 0;

        loop {
            iteration += 1;
            if iteration > self.max_iterations {
                warn!(
                    request_id = %ctx.request_id(),
                    limit = self.max_iterations,
                    "Iteration ceiling reached"
                );
                return Err(RunError::IterationLimitExceeded {
                    limit: self.max_iterations,
                });
            }

            ctx.checkpoint()?;
            debug!(request_id = %ctx.request_id(), iteration, "Agent loop iteration");

            let key = ctx.reasoning_key();
            let display = StepDisplay::new("💭", "Thinking");
            ctx.begin_step(key, display.clone());

            let request = ProviderRequest {
                model: self.model.clone(),
                messages: messages.clone(),
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                tools: tool_definitions.clone(),
            };
            let response = self.provider.complete(request).await;
            ctx.checkpoint()?;

            let response = match response {
                Ok(response) => {
                    ctx.complete_step(key, display, StepStatus::Completed);
                    response
                }
                Err(e) => {
                    warn!(request_id = %ctx.request_id(), iteration, error = %e, "Model call failed");
                    ctx.complete_step(key, display, StepStatus::Failed);
                    return Err(RunError::Model(e));
                }
            };

            if response.is_final() {
                ctx.status("Finalizing response");
                info!(
                    request_id = %ctx.request_id(),
                    iterations = iteration,
                    tool_calls,
                    "Agent run finished"
                );
                return Ok(AgentOutcome {
                    answer: response.content,
                    iterations: iteration,
                    tool_calls,
                });
            }

            debug!(
                request_id = %ctx.request_id(),
                count = response.tool_calls.len(),
                "Executing tool calls"
            );
            messages.push(Message::assistant_tool_calls(
                response.content,
                response.tool_calls.clone(),
            ));

            for call in &response.tool_calls {
                let content = self.run_tool(call, ctx).await?;
                tool_calls += 1;
                messages.push(Message::tool_result(call.id.clone(), content));
            }
        }
    }

    /// Execute one tool call as an action step. Returns the text fed back to
    /// the model; only a failed checkpoint is an error.
    async fn run_tool(
        &self,
        call: &ToolCall,
        ctx: &mut ExecutionContext,
    ) -> Result<String, RunError> {
        ctx.checkpoint()?;
        let key = ctx.next_action_key();
        let display = self.tools.display_for(call);
        ctx.begin_step(key, display.clone());
        ctx.tool_status(format!("Using {}", display.label), call.name.clone());

        let result = self.tools.execute(call).await;
        ctx.checkpoint()?;

        let (status, content) = match result {
            Ok(result) if result.success => (StepStatus::Completed, result.output),
            Ok(result) => {
                warn!(request_id = %ctx.request_id(), tool = %call.name, "Tool reported failure");
                (StepStatus::Failed, result.output)
            }
            Err(e) => {
                warn!(request_id = %ctx.request_id(), tool = %call.name, error = %e, "Tool execution failed");
                (StepStatus::Failed, format!("Error: {e}"))
            }
        };
        ctx.complete_step(key, display, status);
        Ok(content)
    }
}
