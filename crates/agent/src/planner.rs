//! Query planner: one advisory plan per request, produced before execution.
//!
//! Resolution order: empty query → fallback; cache hit; fast-path heuristic;
//! otherwise exactly one model call whose answer is decoded into an
//! [`ActionPlan`]. Any undecodable answer or model failure yields the
//! fallback plan, so the planner only ever fails on a checkpoint.

use flowpilot_core::error::RunError;
use flowpilot_core::event::{StepDisplay, StepKey, StepStatus};
use flowpilot_core::execution::ExecutionContext;
use flowpilot_core::plan::{ActionPlan, PlanStep, QueryType};
use flowpilot_core::provider::{Provider, ProviderRequest};
use moka::sync::Cache;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, info, warn};

const SIMPLE_LOOKUP_KEYWORDS: &[&str] = &[
    "available",
    "exist",
    "exists",
    "support",
    "supported",
    "have",
    "integration",
    "piece",
    "trigger",
    "action",
    "connector",
];
const SIMPLE_LOOKUP_VERBS: &[&str] = &["is", "does", "do", "can", "are", "was"];
const DETAIL_KEYWORDS: &[&str] = &[
    "input",
    "field",
    "property",
    "parameter",
    "configuration",
    "configure",
    "setup",
    "set up",
    "mapping",
    "settings",
];
const ACTION_TERMS: &[&str] = &["action", "trigger", "step", "task", "piece"];
const MAX_SIMPLE_LOOKUP_LEN: usize = 140;
const MAX_DETAIL_LOOKUP_LEN: usize = 260;

/// How a plan was obtained. Shown as the planning step's detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSource {
    Model,
    Cached,
    FastPath,
    Fallback,
}

impl PlanSource {
    fn detail(self) -> &'static str {
        match self {
            Self::Model => "planned",
            Self::Cached => "cached",
            Self::FastPath => "fast path",
            Self::Fallback => "fallback",
        }
    }
}

pub struct Planner {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    fast_path: bool,
    cache: Cache<String, ActionPlan>,
    lookup_tool: String,
    docs_tool: String,
}

impl Planner {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.2,
            fast_path: true,
            cache: Cache::new(64),
            lookup_tool: "check_tool".into(),
            docs_tool: "search_docs".into(),
        }
    }

    pub fn with_fast_path(mut self, enabled: bool) -> Self {
        self.fast_path = enabled;
        self
    }

    pub fn with_cache_size(mut self, size: usize) -> Self {
        self.cache = Cache::new(size as u64);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Tool names the fast-path plans recommend.
    pub fn with_tool_hints(
        mut self,
        lookup_tool: impl Into<String>,
        docs_tool: impl Into<String>,
    ) -> Self {
        self.lookup_tool = lookup_tool.into();
        self.docs_tool = docs_tool.into();
        self
    }

    /// Produce the plan for `query`, reported as the planning step.
    pub async fn plan(
        &self,
        query: &str,
        ctx: &mut ExecutionContext,
    ) -> Result<ActionPlan, RunError> {
        ctx.checkpoint()?;
        let display = StepDisplay::new("🧠", "Planning");
        ctx.begin_step(StepKey::PLANNING, display.clone());

        let (plan, source) = self.resolve(query.trim(), ctx).await?;

        ctx.complete_step(
            StepKey::PLANNING,
            display.with_detail(source.detail()),
            StepStatus::Completed,
        );
        info!(
            request_id = %ctx.request_id(),
            query_type = ?plan.query_type,
            steps = plan.steps.len(),
            source = source.detail(),
            "Plan ready"
        );
        Ok(plan)
    }

    async fn resolve(
        &self,
        query: &str,
        ctx: &ExecutionContext,
    ) -> Result<(ActionPlan, PlanSource), RunError> {
        if query.is_empty() {
            return Ok((ActionPlan::fallback(query), PlanSource::Fallback));
        }

        let key = self.cache_key(query);
        if let Some(plan) = self.cache.get(&key) {
            debug!(request_id = %ctx.request_id(), "Planner cache hit");
            return Ok((plan, PlanSource::Cached));
        }

        if self.fast_path
            && let Some(plan) = self.fast_plan(query)
        {
            debug!(request_id = %ctx.request_id(), query_type = ?plan.query_type, "Planner fast path");
            self.cache.insert(key, plan.clone());
            return Ok((plan, PlanSource::FastPath));
        }

        let mut request = ProviderRequest::prompt(&self.model, planning_prompt(query));
        request.temperature = self.temperature;
        let response = self.provider.complete(request).await;
        ctx.checkpoint()?;

        let (plan, source) = match response {
            Ok(response) => match ActionPlan::decode(&response.content) {
                Some(plan) => (plan, PlanSource::Model),
                None => {
                    warn!(request_id = %ctx.request_id(), "Planner output was not a usable plan, using fallback");
                    (ActionPlan::fallback(query), PlanSource::Fallback)
                }
            },
            Err(e) => {
                warn!(request_id = %ctx.request_id(), error = %e, "Planner call failed, using fallback");
                (ActionPlan::fallback(query), PlanSource::Fallback)
            }
        };
        self.cache.insert(key, plan.clone());
        Ok((plan, source))
    }

    fn cache_key(&self, query: &str) -> String {
        format!("{}:{}", self.model, query.to_lowercase())
    }

    /// Canned plans for query shapes that never need a planning call.
    pub fn fast_plan(&self, query: &str) -> Option<ActionPlan> {
        let query = query.trim();
        if query.is_empty() {
            return None;
        }
        let lowered = query.to_lowercase();
        if looks_like_simple_lookup(&lowered) {
            Some(self.simple_lookup_plan(query))
        } else if looks_like_detail_lookup(&lowered) {
            Some(self.detail_lookup_plan(query))
        } else {
            None
        }
    }

    fn simple_lookup_plan(&self, query: &str) -> ActionPlan {
        let tool = &self.lookup_tool;
        ActionPlan {
            intent: format!("Verify whether '{query}' is available"),
            query_type: QueryType::SimpleCheck,
            steps: vec![
                PlanStep::new(format!(
                    "Call {tool} once with the exact query. Success means details are returned."
                ))
                .with_tool(tool.as_str()),
                PlanStep::new("If a result is found, summarize the key facts and stop."),
                PlanStep::new(
                    "If nothing is found, say it is unavailable and suggest an HTTP request or webhook instead.",
                ),
            ],
            recommended_tools: vec![tool.clone()],
            search_queries: vec![query.to_string()],
            max_tool_calls: Some(1),
            stopping_condition: Some(format!(
                "After a single {tool} call, respond with the findings."
            )),
            fallback_strategy: Some(
                "If the lookup fails, explain the issue and suggest checking manually.".into(),
            ),
            context: Some("Fast path plan, no planning call".into()),
        }
    }

    fn detail_lookup_plan(&self, query: &str) -> ActionPlan {
        let tool = &self.docs_tool;
        ActionPlan {
            intent: format!("Gather configuration details for '{query}'"),
            query_type: QueryType::Configuration,
            steps: vec![
                PlanStep::new(format!(
                    "Call {tool} once with the query. Success means input properties with types are listed."
                ))
                .with_tool(tool.as_str()),
                PlanStep::new("Summarize required and optional fields, types and defaults, then stop."),
                PlanStep::new("If details remain unclear, name the gaps."),
            ],
            recommended_tools: vec![tool.clone()],
            search_queries: vec![query.to_string()],
            max_tool_calls: Some(1),
            stopping_condition: Some(format!(
                "After one {tool} call, respond with the gathered details."
            )),
            fallback_strategy: Some(
                "If the search fails, give general guidance from known practice.".into(),
            ),
            context: Some("Fast path plan for configuration-style queries".into()),
        }
    }

    /// Render a plan as advisory guidance for the executor's system prompt.
    pub fn format_for_agent(plan: &ActionPlan) -> String {
        let mut out = String::from("QUERY ANALYSIS (advisory, deviate if the situation demands it)\n\n");
        let _ = writeln!(out, "Intent: {}", plan.intent);
        let _ = writeln!(out, "Query type: {:?}", plan.query_type);
        out.push_str("\nSuggested steps:\n");
        for (i, step) in plan.steps.iter().enumerate() {
            let _ = write!(out, "{}. {}", i + 1, step.instruction);
            if let Some(tool) = &step.tool {
                let _ = write!(out, " [tool: {tool}]");
            }
            if let Some(rationale) = &step.rationale {
                let _ = write!(out, " ({rationale})");
            }
            out.push('\n');
        }
        if !plan.recommended_tools.is_empty() {
            let _ = writeln!(out, "\nRecommended tools: {}", plan.recommended_tools.join(", "));
        }
        if !plan.search_queries.is_empty() {
            out.push_str("\nSuggested searches:\n");
            for query in &plan.search_queries {
                let _ = writeln!(out, "  - \"{query}\"");
            }
        }
        if let Some(max) = plan.max_tool_calls {
            let _ = writeln!(out, "\nTool call budget: {max}");
        }
        if let Some(stop) = &plan.stopping_condition {
            let _ = writeln!(out, "\nStop when: {stop}");
        }
        if let Some(fallback) = &plan.fallback_strategy {
            let _ = writeln!(out, "\nIf tools fail: {fallback}");
        }
        if let Some(context) = &plan.context {
            let _ = writeln!(out, "\nContext: {context}");
        }
        out
    }
}

fn looks_like_simple_lookup(lowered: &str) -> bool {
    if lowered.chars().count() > MAX_SIMPLE_LOOKUP_LEN {
        return false;
    }
    if SIMPLE_LOOKUP_KEYWORDS.iter().any(|k| lowered.contains(k)) {
        return true;
    }
    if lowered.ends_with('?')
        && lowered
            .split('?')
            .next()
            .is_some_and(|head| head.matches(' ').count() <= 8)
    {
        return true;
    }
    SIMPLE_LOOKUP_VERBS
        .iter()
        .any(|verb| lowered.starts_with(&format!("{verb} ")))
}

fn looks_like_detail_lookup(lowered: &str) -> bool {
    lowered.chars().count() <= MAX_DETAIL_LOOKUP_LEN
        && DETAIL_KEYWORDS.iter().any(|k| lowered.contains(k))
        && ACTION_TERMS.iter().any(|t| lowered.contains(t))
}

fn planning_prompt(query: &str) -> String {
    format!(
        r#"You are the query analyzer for a workflow automation assistant. Create a clear, specific and efficient plan that keeps the assistant from making redundant tool calls.

Rules:
1. Each step has a clear success criterion.
2. Give a maximum number of tool calls (usually 1-2).
3. Say what "good enough" information looks like.
4. Add a fallback if a tool fails.
5. Say explicitly when to stop and respond.

Analyze this user query:
"{query}"

Respond in this exact JSON format:
{{
  "intent": "brief description of what the user wants",
  "query_type": "simple_check|flow_building|explanation|troubleshooting|configuration",
  "action_plan": ["step 1 with success criterion", "step 2 with success criterion"],
  "recommended_tools": ["tool1"],
  "search_queries": ["specific query"],
  "max_tool_calls": 2,
  "stopping_condition": "when the assistant has enough to respond",
  "fallback_strategy": "what to do if tools fail",
  "context": "additional considerations"
}}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowpilot_core::cancel::CancellationToken;
    use flowpilot_core::channel::{EventStream, event_channel};
    use flowpilot_core::error::ProviderError;
    use flowpilot_core::event::Event;
    use flowpilot_core::testing::{SequentialMockProvider, text_response};

    fn context() -> (ExecutionContext, CancellationToken, EventStream) {
        let (tx, rx) = event_channel();
        let token = CancellationToken::new();
        (ExecutionContext::new(tx, token.clone()), token, rx)
    }

    const FLOW_PLAN: &str = r#"```json
{"intent": "Build a Drive to email flow", "query_type": "flow_building",
 "action_plan": ["Search the trigger once", "Search the action once", "Compile the flow"],
 "recommended_tools": ["search_docs"], "max_tool_calls": 2}
```"#;

    #[tokio::test]
    async fn decodes_model_plan_and_reports_planning_step() {
        let provider = Arc::new(SequentialMockProvider::single_text(FLOW_PLAN));
        let planner = Planner::new(provider.clone(), "m").with_fast_path(false);
        let (mut ctx, _token, rx) = context();

        let plan = planner
            .plan("send an email when a new file lands in Drive", &mut ctx)
            .await
            .unwrap();
        assert_eq!(plan.query_type, QueryType::FlowBuild);
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(provider.call_count(), 1);
        assert_eq!(ctx.action_counter(), 0);
        ctx.finish_done("", None);

        let events = rx.drain().await;
        assert_eq!(events[0].step(), Some(StepKey::PLANNING));
        match &events[1] {
            Event::LogUpdate {
                step,
                status,
                duration,
                detail,
                ..
            } => {
                assert_eq!(*step, StepKey::PLANNING);
                assert_eq!(*status, StepStatus::Completed);
                assert!(duration.is_some_and(|d| d >= 0.0));
                assert_eq!(detail.as_deref(), Some("planned"));
            }
            other => panic!("expected log_update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn undecodable_output_yields_fallback() {
        let provider = Arc::new(SequentialMockProvider::single_text("Sure! First you should..."));
        let planner = Planner::new(provider, "m").with_fast_path(false);
        let (mut ctx, _token, _rx) = context();

        let plan = planner.plan("build me something", &mut ctx).await.unwrap();
        assert!(plan.is_fallback());
        assert_eq!(plan.query_type, QueryType::General);
        assert_eq!(plan.steps.len(), 1);
    }

    #[tokio::test]
    async fn empty_steps_yield_fallback() {
        let provider = Arc::new(SequentialMockProvider::single_text(
            r#"{"intent": "x", "query_type": "explanation", "steps": []}"#,
        ));
        let planner = Planner::new(provider, "m").with_fast_path(false);
        let (mut ctx, _token, _rx) = context();
        assert!(planner.plan("explain webhooks", &mut ctx).await.unwrap().is_fallback());
    }

    #[tokio::test]
    async fn model_error_yields_fallback() {
        let provider = Arc::new(SequentialMockProvider::scripted(vec![Err(
            ProviderError::RateLimited {
                retry_after_secs: 5,
            },
        )]));
        let planner = Planner::new(provider, "m").with_fast_path(false);
        let (mut ctx, _token, _rx) = context();
        assert!(planner.plan("explain webhooks", &mut ctx).await.unwrap().is_fallback());
    }

    #[tokio::test]
    async fn cache_hit_makes_no_model_call() {
        let provider = Arc::new(SequentialMockProvider::new(vec![text_response(FLOW_PLAN)]));
        let planner = Planner::new(provider.clone(), "m").with_fast_path(false);

        let (mut ctx, _token, _rx) = context();
        let first = planner.plan("Build a Drive flow", &mut ctx).await.unwrap();
        let (mut ctx, _token, rx) = context();
        let second = planner.plan("  build a drive FLOW ", &mut ctx).await.unwrap();
        ctx.finish_done("", None);

        assert_eq!(first, second);
        assert_eq!(provider.call_count(), 1);
        let events = rx.drain().await;
        assert!(matches!(
            &events[1],
            Event::LogUpdate { detail: Some(d), .. } if d == "cached"
        ));
    }

    #[tokio::test]
    async fn fast_path_makes_no_model_call() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let planner = Planner::new(provider.clone(), "m");
        let (mut ctx, _token, _rx) = context();

        let plan = planner.plan("Is Gmail available?", &mut ctx).await.unwrap();
        assert_eq!(plan.query_type, QueryType::SimpleCheck);
        assert_eq!(plan.recommended_tools, ["check_tool"]);
        assert_eq!(plan.max_tool_calls, Some(1));
        assert_eq!(provider.call_count(), 0);
    }

    #[test]
    fn fast_path_classification() {
        let planner = Planner::new(Arc::new(SequentialMockProvider::new(vec![])), "m")
            .with_tool_hints("lookup", "docs");

        let detail = planner
            .fast_plan("Which inputs must I configure on the Slack send message step when posting to a private channel from a scheduled flow in production")
            .unwrap();
        assert_eq!(detail.query_type, QueryType::Configuration);
        assert_eq!(detail.recommended_tools, ["docs"]);

        assert!(planner
            .fast_plan("Write a flow that copies rows from Airtable into Postgres every night")
            .is_none());
        assert!(planner.fast_plan("   ").is_none());
    }

    #[test]
    fn lookup_length_counts_characters() {
        let planner = Planner::new(Arc::new(SequentialMockProvider::new(vec![])), "m");

        let question = format!("{}?", "集成".repeat(30));
        assert!(question.len() > MAX_SIMPLE_LOOKUP_LEN);
        let plan = planner.fast_plan(&question).unwrap();
        assert_eq!(plan.query_type, QueryType::SimpleCheck);

        let too_long = format!("{}?", "集".repeat(MAX_SIMPLE_LOOKUP_LEN));
        assert!(planner.fast_plan(&too_long).is_none());
    }

    #[tokio::test]
    async fn empty_query_is_fallback_without_model_call() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let planner = Planner::new(provider.clone(), "m");
        let (mut ctx, _token, _rx) = context();
        assert!(planner.plan("  ", &mut ctx).await.unwrap().is_fallback());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn cancelled_before_planning() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let planner = Planner::new(provider.clone(), "m");
        let (mut ctx, token, _rx) = context();
        token.signal();
        let err = planner.plan("Is Gmail available?", &mut ctx).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_during_planning_call_skips_update() {
        let provider = Arc::new(
            SequentialMockProvider::single_text(FLOW_PLAN)
                .with_delay(std::time::Duration::from_secs(2)),
        );
        let planner = Planner::new(provider, "m").with_fast_path(false);
        let (mut ctx, token, rx) = context();

        let signaller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            signaller.signal();
        });

        let err = planner.plan("build a flow", &mut ctx).await.unwrap_err();
        assert!(err.is_cancelled());
        ctx.finish_failed(&err);

        let events = rx.drain().await;
        assert_eq!(events[0].kind(), flowpilot_core::event::EventKind::LogStart);
        assert!(!events.iter().any(|e| matches!(e, Event::LogUpdate { .. })));
        assert!(matches!(events.last(), Some(Event::Cancelled { last_step: None, .. })));
    }

    #[test]
    fn format_for_agent_is_advisory() {
        let plan = ActionPlan::decode(FLOW_PLAN).unwrap();
        let text = Planner::format_for_agent(&plan);
        assert!(text.contains("advisory"));
        assert!(text.contains("1. Search the trigger once"));
        assert!(text.contains("Tool call budget: 2"));
        assert!(text.contains("search_docs"));
    }
}
