//! Scripted providers and tools for tests.
//!
//! Enabled inside this crate's own tests and, for dependents, through the
//! `testing` feature.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::{ProviderError, ToolError};
use crate::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use crate::tool::{Tool, ToolCall, ToolResult};

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `complete` pops the next response. Once the script runs out
/// the last response repeats when `repeat_last` is set, otherwise the call
/// fails with `ProviderError::NotConfigured`.
pub struct SequentialMockProvider {
    script: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    last: Mutex<Option<Result<ProviderResponse, ProviderError>>>,
    repeat_last: bool,
    call_count: AtomicUsize,
    requests: Mutex<Vec<ProviderRequest>>,
    delay: Option<Duration>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self::scripted(responses.into_iter().map(Ok).collect())
    }

    pub fn scripted(script: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            repeat_last: false,
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// A provider that answers every call with `response`.
    pub fn repeating(response: ProviderResponse) -> Self {
        Self {
            repeat_last: true,
            ..Self::new(vec![response])
        }
    }

    pub fn single_text(text: &str) -> Self {
        Self::new(vec![text_response(text)])
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(response) => {
                *self.last.lock().unwrap() = Some(response.clone());
                response
            }
            None if self.repeat_last => self.last.lock().unwrap().clone().unwrap_or_else(|| {
                Err(ProviderError::NotConfigured("empty script".into()))
            }),
            None => Err(ProviderError::NotConfigured(format!(
                "SequentialMockProvider: no more responses (call #{})",
                self.call_count()
            ))),
        }
    }
}

fn mock_usage() -> Option<Usage> {
    Some(Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    })
}

/// A final text response (no tool calls).
pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        content: text.to_string(),
        tool_calls: Vec::new(),
        usage: mock_usage(),
        model: "mock-model".into(),
    }
}

/// A response requesting tool calls, with optional thought content.
pub fn tool_call_response(tool_calls: Vec<ToolCall>, thought: &str) -> ProviderResponse {
    ProviderResponse {
        content: thought.to_string(),
        tool_calls,
        usage: mock_usage(),
        model: "mock-model".into(),
    }
}

pub fn tool_call(name: &str, args: serde_json::Value) -> ToolCall {
    ToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: args,
    }
}

type Hook = Box<dyn Fn() + Send + Sync>;

/// What a [`ScriptedTool`] does when executed.
#[derive(Debug, Clone)]
pub enum ToolBehavior {
    Succeed(String),
    /// Returns a result with `success = false`
    Unsuccessful(String),
    Fail(String),
}

/// A tool with a fixed behavior and an optional side effect on execute.
pub struct ScriptedTool {
    name: String,
    icon: String,
    label: String,
    behavior: ToolBehavior,
    on_execute: Option<Hook>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    arguments: Mutex<Vec<serde_json::Value>>,
}

impl ScriptedTool {
    pub fn new(name: &str, behavior: ToolBehavior) -> Self {
        Self {
            name: name.to_string(),
            icon: "🔧".into(),
            label: name.to_string(),
            behavior,
            on_execute: None,
            delay: None,
            calls: AtomicUsize::new(0),
            arguments: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding(name: &str, output: &str) -> Self {
        Self::new(name, ToolBehavior::Succeed(output.to_string()))
    }

    pub fn with_display(mut self, icon: &str, label: &str) -> Self {
        self.icon = icon.to_string();
        self.label = label.to_string();
        self
    }

    /// Run `hook` at the start of every execution.
    pub fn on_execute(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_execute = Some(Box::new(hook));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn received_arguments(&self) -> Vec<serde_json::Value> {
        self.arguments.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tool for ScriptedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Scripted test tool"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "query": { "type": "string" } }
        })
    }

    fn icon(&self) -> &str {
        &self.icon
    }

    fn label(&self) -> &str {
        &self.label
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.arguments.lock().unwrap().push(arguments);
        if let Some(hook) = &self.on_execute {
            hook();
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.behavior {
            ToolBehavior::Succeed(output) => Ok(ToolResult::ok("", output.clone())),
            ToolBehavior::Unsuccessful(output) => Ok(ToolResult::failed("", output.clone())),
            ToolBehavior::Fail(reason) => Err(ToolError::ExecutionFailed {
                tool_name: self.name.clone(),
                reason: reason.clone(),
            }),
        }
    }
}
