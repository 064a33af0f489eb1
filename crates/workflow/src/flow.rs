//! Built-in flow-build phases: analyze → search → build.
//!
//! Turns a request like "send an email when a file lands in Drive" into a
//! step-by-step automation guide. The analyze and build phases each make one
//! model call; search looks up the trigger and every needed action through a
//! registry tool.

use async_trait::async_trait;
use flowpilot_core::execution::ExecutionContext;
use flowpilot_core::plan::extract_json;
use flowpilot_core::provider::{Provider, ProviderRequest};
use flowpilot_core::tool::{ToolCall, ToolRegistry};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::pipeline::{FlowState, Phase, PhaseError, PhasePipeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Complex,
    #[default]
    #[serde(other)]
    Moderate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Low,
    #[default]
    #[serde(other)]
    Medium,
}

/// What the analyze phase understood about the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowAnalysis {
    pub flow_goal: String,

    /// The event that starts the flow, or "unclear"
    #[serde(default, alias = "trigger_type")]
    pub trigger: Option<String>,

    #[serde(default)]
    pub actions_needed: Vec<String>,

    #[serde(default = "default_true")]
    pub is_clear: bool,

    #[serde(default)]
    pub missing_info: Vec<String>,

    #[serde(default)]
    pub complexity: Complexity,

    #[serde(default)]
    pub confidence: Confidence,
}

fn default_true() -> bool {
    true
}

const UNCLEAR: &str = "unclear";

impl FlowAnalysis {
    /// Used when the model's analysis is unavailable or undecodable.
    pub fn fallback(request: &str) -> Self {
        Self {
            flow_goal: request.trim().to_string(),
            trigger: None,
            actions_needed: Vec::new(),
            is_clear: true,
            missing_info: Vec::new(),
            complexity: Complexity::Moderate,
            confidence: Confidence::Medium,
        }
    }

    pub fn decode(raw: &str) -> Option<Self> {
        let analysis: Self = serde_json::from_str(extract_json(raw)).ok()?;
        if analysis.flow_goal.trim().is_empty() {
            None
        } else {
            Some(analysis)
        }
    }

    pub fn needs_clarification(&self) -> bool {
        !self.is_clear || self.confidence == Confidence::Low
    }

    /// Lookup terms for the trigger and each action, deduplicated in order.
    /// Components marked unclear are skipped.
    pub fn search_terms(&self) -> Vec<String> {
        let mut terms: Vec<String> = Vec::new();
        let components = self.trigger.iter().chain(self.actions_needed.iter());
        for component in components {
            if component.trim().to_lowercase().starts_with(UNCLEAR) {
                continue;
            }
            let term = keywords(component, 4);
            if !term.is_empty() && !terms.contains(&term) {
                terms.push(term);
            }
        }
        terms
    }
}

/// The first `max_words` words of `text`, stripped of punctuation.
fn keywords(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| ",-:;|".contains(c)))
        .filter(|w| !w.is_empty())
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

/// One search result, kept for the build phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub term: String,
    pub output: String,
}

// ── Analyze ───────────────────────────────────────────────────────────────

pub struct AnalyzePhase {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
}

impl AnalyzePhase {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.2,
        }
    }

    fn prompt(request: &str) -> String {
        format!(
            r#"You are a workflow automation analyst. Users build flows by picking a trigger (what starts the flow) and a sequence of actions.

Analyze this flow request and determine what the user wants to accomplish, what is clear versus unclear, and how complex the flow is.

User Request: "{request}"

Respond in this exact JSON format:
{{
  "flow_goal": "brief description of what the user wants to accomplish",
  "trigger": "identified trigger or 'unclear'",
  "actions_needed": ["action 1", "action 2"],
  "is_clear": true,
  "missing_info": ["what is missing"],
  "complexity": "simple|moderate|complex",
  "confidence": "high|medium|low"
}}"#
        )
    }
}

#[async_trait]
impl Phase for AnalyzePhase {
    fn name(&self) -> &str {
        "analyze"
    }

    fn icon(&self) -> &str {
        "🔍"
    }

    fn label(&self) -> &str {
        "Analyzing request"
    }

    async fn run(
        &self,
        state: &mut FlowState,
        _ctx: &ExecutionContext,
    ) -> Result<(), PhaseError> {
        let mut request = ProviderRequest::prompt(&self.model, Self::prompt(&state.request));
        request.temperature = self.temperature;

        let analysis = match self.provider.complete(request).await {
            Ok(response) => FlowAnalysis::decode(&response.content).unwrap_or_else(|| {
                warn!("Flow analysis was not decodable, using fallback analysis");
                FlowAnalysis::fallback(&state.request)
            }),
            Err(e) => {
                warn!(error = %e, "Flow analysis call failed, using fallback analysis");
                FlowAnalysis::fallback(&state.request)
            }
        };

        debug!(
            goal = %analysis.flow_goal,
            clear = analysis.is_clear,
            complexity = ?analysis.complexity,
            "Flow analyzed"
        );
        state.analysis = Some(analysis);
        Ok(())
    }
}

// ── Search ────────────────────────────────────────────────────────────────

pub struct SearchPhase {
    tools: ToolRegistry,
    tool_name: String,
}

impl SearchPhase {
    pub fn new(tools: ToolRegistry, tool_name: impl Into<String>) -> Self {
        Self {
            tools,
            tool_name: tool_name.into(),
        }
    }
}

#[async_trait]
impl Phase for SearchPhase {
    fn name(&self) -> &str {
        "search"
    }

    fn icon(&self) -> &str {
        "📚"
    }

    fn label(&self) -> &str {
        "Searching components"
    }

    async fn run(
        &self,
        state: &mut FlowState,
        ctx: &ExecutionContext,
    ) -> Result<(), PhaseError> {
        if self.tools.get(&self.tool_name).is_none() {
            warn!(tool = %self.tool_name, "Search tool not registered, skipping component search");
            return Ok(());
        }

        let mut terms = state
            .analysis
            .as_ref()
            .map(FlowAnalysis::search_terms)
            .unwrap_or_default();
        if terms.is_empty() {
            terms.push(keywords(&state.request, 4));
        }

        for (i, term) in terms.into_iter().enumerate() {
            ctx.checkpoint()?;
            ctx.tool_status(format!("Searching for {term}"), self.tool_name.clone());
            let call = ToolCall {
                id: format!("search_{i}"),
                name: self.tool_name.clone(),
                arguments: serde_json::json!({ "query": term }),
            };
            let result = self.tools.execute(&call).await?;
            if !result.success {
                return Err(PhaseError::Failed(format!(
                    "search for '{term}' failed: {}",
                    result.output
                )));
            }
            debug!(term = %term, "Component search hit");
            state.search_results.push(SearchHit {
                term,
                output: result.output,
            });
        }
        Ok(())
    }
}

// ── Build ─────────────────────────────────────────────────────────────────

pub struct BuildPhase {
    provider: Arc<dyn Provider>,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl BuildPhase {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.2,
            max_tokens: None,
        }
    }

    fn prompt(state: &FlowState, analysis: &FlowAnalysis) -> String {
        let mut prompt = format!(
            "You are a workflow automation architect. Write a detailed, step-by-step guide \
             for building the flow below. Cover an overview, prerequisites, trigger \
             configuration, every action with its required inputs, data mapping between \
             steps, testing, and common issues.\n\nUser Request: \"{}\"\nGoal: {}\n",
            state.request, analysis.flow_goal
        );
        if let Some(trigger) = &analysis.trigger {
            let _ = writeln!(prompt, "Trigger: {trigger}");
        }
        if !analysis.actions_needed.is_empty() {
            let _ = writeln!(prompt, "Actions: {}", analysis.actions_needed.join(", "));
        }
        if !state.search_results.is_empty() {
            prompt.push_str("\nComponent research:\n");
            for hit in &state.search_results {
                let _ = writeln!(prompt, "### {}\n{}", hit.term, hit.output);
            }
        }
        prompt.push_str("\nFormat the guide in Markdown.");
        prompt
    }

    /// Guide assembled without the model.
    fn basic_guide(state: &FlowState, analysis: &FlowAnalysis) -> String {
        let mut guide = format!(
            "# Flow Building Guide: {}\n\n## Overview\n{}\n\n",
            analysis.flow_goal, analysis.flow_goal
        );
        if let Some(trigger) = analysis.trigger.as_deref().filter(|t| *t != UNCLEAR) {
            let _ = writeln!(
                guide,
                "## Trigger Setup\n1. Add the **{trigger}** trigger\n2. Configure its settings\n"
            );
        }
        if !analysis.actions_needed.is_empty() {
            guide.push_str("## Actions\n");
            for (i, action) in analysis.actions_needed.iter().enumerate() {
                let _ = writeln!(guide, "{}. {action}", i + 1);
            }
            guide.push('\n');
        }
        if !state.search_results.is_empty() {
            guide.push_str("## Components Found\n");
            for hit in &state.search_results {
                let _ = writeln!(guide, "- **{}**: {}", hit.term, hit.output);
            }
            guide.push('\n');
        }
        guide.push_str(
            "## Next Steps\n1. Create a new flow\n2. Add and configure the trigger\n\
             3. Add and configure the actions\n4. Test the flow\n",
        );
        guide
    }

    fn clarifications(analysis: &FlowAnalysis) -> String {
        let mut section = String::from("\n\n## Questions to refine this flow\n");
        if analysis.missing_info.is_empty() {
            section.push_str("- What event should start this flow?\n");
            section.push_str("- Which apps or services are involved?\n");
        } else {
            for item in &analysis.missing_info {
                let _ = writeln!(section, "- Can you tell me more about: {item}?");
            }
        }
        section
    }
}

#[async_trait]
impl Phase for BuildPhase {
    fn name(&self) -> &str {
        "build"
    }

    fn icon(&self) -> &str {
        "🛠️"
    }

    fn label(&self) -> &str {
        "Building flow guide"
    }

    async fn run(
        &self,
        state: &mut FlowState,
        _ctx: &ExecutionContext,
    ) -> Result<(), PhaseError> {
        let analysis = state
            .analysis
            .clone()
            .unwrap_or_else(|| FlowAnalysis::fallback(&state.request));

        let mut request = ProviderRequest::prompt(&self.model, Self::prompt(state, &analysis));
        request.temperature = self.temperature;
        request.max_tokens = self.max_tokens;

        let mut guide = match self.provider.complete(request).await {
            Ok(response) if !response.content.trim().is_empty() => response.content.trim().to_string(),
            Ok(_) => {
                warn!("Flow guide came back empty, assembling a basic guide");
                Self::basic_guide(state, &analysis)
            }
            Err(e) => {
                warn!(error = %e, "Flow guide call failed, assembling a basic guide");
                Self::basic_guide(state, &analysis)
            }
        };

        if analysis.needs_clarification() {
            guide.push_str(&Self::clarifications(&analysis));
        }
        state.output = Some(guide);
        Ok(())
    }
}

// ── Assembly ──────────────────────────────────────────────────────────────

/// Assembles the analyze → search → build pipeline.
pub struct FlowBuilder {
    provider: Arc<dyn Provider>,
    tools: ToolRegistry,
    model: String,
    search_tool: String,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl FlowBuilder {
    pub fn new(provider: Arc<dyn Provider>, tools: ToolRegistry, model: impl Into<String>) -> Self {
        Self {
            provider,
            tools,
            model: model.into(),
            search_tool: "search_docs".into(),
            temperature: 0.2,
            max_tokens: None,
        }
    }

    pub fn with_search_tool(mut self, name: impl Into<String>) -> Self {
        self.search_tool = name.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn pipeline(&self) -> PhasePipeline {
        let analyze = AnalyzePhase {
            temperature: self.temperature,
            ..AnalyzePhase::new(self.provider.clone(), &self.model)
        };
        let search = SearchPhase::new(self.tools.clone(), &self.search_tool);
        let build = BuildPhase {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            ..BuildPhase::new(self.provider.clone(), &self.model)
        };
        PhasePipeline::new(vec![Arc::new(analyze), Arc::new(search), Arc::new(build)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowpilot_core::error::{ProviderError, RunError};
    use flowpilot_core::event::Event;
    use flowpilot_core::cancel::CancellationToken;
    use flowpilot_core::channel::{EventStream, event_channel};
    use flowpilot_core::testing::{ScriptedTool, SequentialMockProvider, ToolBehavior, text_response};

    fn context() -> (ExecutionContext, CancellationToken, EventStream) {
        let (tx, rx) = event_channel();
        let token = CancellationToken::new();
        (ExecutionContext::new(tx, token.clone()), token, rx)
    }

    const CLEAR_ANALYSIS: &str = r#"```json
{"flow_goal": "Email when a Drive file is added", "trigger_type": "Google Drive - New File",
 "actions_needed": ["Send Email via Gmail"], "is_clear": true, "missing_info": [],
 "complexity": "simple", "confidence": "high"}
```"#;

    #[test]
    fn analysis_decodes_with_aliases() {
        let analysis = FlowAnalysis::decode(CLEAR_ANALYSIS).unwrap();
        assert_eq!(analysis.trigger.as_deref(), Some("Google Drive - New File"));
        assert_eq!(analysis.complexity, Complexity::Simple);
        assert_eq!(analysis.confidence, Confidence::High);
        assert!(!analysis.needs_clarification());
    }

    #[test]
    fn unknown_levels_default() {
        let analysis =
            FlowAnalysis::decode(r#"{"flow_goal": "x", "complexity": "epic", "confidence": "meh"}"#)
                .unwrap();
        assert_eq!(analysis.complexity, Complexity::Moderate);
        assert_eq!(analysis.confidence, Confidence::Medium);
        assert!(analysis.is_clear);
    }

    #[test]
    fn levels_use_lowercase_names() {
        let analysis = FlowAnalysis::decode(
            r#"{"flow_goal": "x", "complexity": "moderate", "confidence": "low"}"#,
        )
        .unwrap();
        assert_eq!(analysis.complexity, Complexity::Moderate);
        assert!(analysis.needs_clarification());

        let json = serde_json::to_value(&analysis).unwrap();
        assert_eq!(json["complexity"], "moderate");
        assert_eq!(json["confidence"], "low");
    }

    #[test]
    fn search_terms_skip_unclear_and_dedupe() {
        let analysis = FlowAnalysis {
            trigger: Some("unclear".into()),
            actions_needed: vec![
                "Send Email via Gmail to the team".into(),
                "Send Email via Gmail to the team".into(),
                "unclear - depends on steps".into(),
                "Post to Slack".into(),
            ],
            ..FlowAnalysis::fallback("onboarding")
        };
        assert_eq!(
            analysis.search_terms(),
            ["Send Email via Gmail", "Post to Slack"]
        );
    }

    #[tokio::test]
    async fn analyze_falls_back_on_garbage() {
        let (ctx, _token, _rx) = context();
        let provider = Arc::new(SequentialMockProvider::single_text("no json here"));
        let phase = AnalyzePhase::new(provider, "m");
        let mut state = FlowState::new("sync contacts");
        phase.run(&mut state, &ctx).await.unwrap();
        assert_eq!(state.analysis.unwrap().flow_goal, "sync contacts");
    }

    #[tokio::test]
    async fn analyze_falls_back_on_model_error() {
        let (ctx, _token, _rx) = context();
        let provider = Arc::new(SequentialMockProvider::scripted(vec![Err(
            ProviderError::Network("down".into()),
        )]));
        let phase = AnalyzePhase::new(provider, "m");
        let mut state = FlowState::new("sync contacts");
        assert!(phase.run(&mut state, &ctx).await.is_ok());
        assert!(state.analysis.is_some());
    }

    #[tokio::test]
    async fn search_calls_tool_per_term() {
        let (ctx, _token, _rx) = context();
        let tool = Arc::new(ScriptedTool::succeeding("search_docs", "piece: gmail"));
        let mut tools = ToolRegistry::new();
        tools.register(tool.clone());

        let mut state = FlowState::new("email on new file");
        state.analysis = FlowAnalysis::decode(CLEAR_ANALYSIS);
        SearchPhase::new(tools, "search_docs")
            .run(&mut state, &ctx)
            .await
            .unwrap();

        assert_eq!(tool.call_count(), 2);
        assert_eq!(tool.received_arguments()[0]["query"], "Google Drive New File");
        assert_eq!(state.search_results.len(), 2);
    }

    #[tokio::test]
    async fn search_stops_at_checkpoint_between_terms() {
        let (ctx, token, rx) = context();
        let signaller = token.clone();
        let tool = Arc::new(
            ScriptedTool::succeeding("search_docs", "hit").on_execute(move || {
                signaller.signal();
            }),
        );
        let mut tools = ToolRegistry::new();
        tools.register(tool.clone());

        let mut state = FlowState::new("onboard a hire");
        state.analysis = Some(FlowAnalysis {
            trigger: Some("New row in Sheets".into()),
            actions_needed: vec![
                "Create Slack user".into(),
                "Send Gmail welcome".into(),
                "Add Notion page".into(),
            ],
            ..FlowAnalysis::fallback("onboard a hire")
        });

        let err = SearchPhase::new(tools, "search_docs")
            .run(&mut state, &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, PhaseError::Interrupted(RunError::Cancelled)));
        assert_eq!(tool.call_count(), 1);
        assert_eq!(state.search_results.len(), 1);

        drop(ctx);
        let statuses = rx
            .drain()
            .await
            .into_iter()
            .filter(|e| matches!(e, Event::Status { tool: Some(t), .. } if t == "search_docs"))
            .count();
        assert_eq!(statuses, 1);
    }

    #[tokio::test]
    async fn search_without_tool_is_skipped() {
        let (ctx, _token, _rx) = context();
        let mut state = FlowState::new("email on new file");
        SearchPhase::new(ToolRegistry::new(), "search_docs")
            .run(&mut state, &ctx)
            .await
            .unwrap();
        assert!(state.search_results.is_empty());
    }

    #[tokio::test]
    async fn search_failures_fail_the_phase() {
        let (ctx, _token, _rx) = context();
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(ScriptedTool::new(
            "search_docs",
            ToolBehavior::Fail("index offline".into()),
        )));
        let mut state = FlowState::new("email on new file");
        let err = SearchPhase::new(tools, "search_docs")
            .run(&mut state, &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("index offline"));

        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(ScriptedTool::new(
            "search_docs",
            ToolBehavior::Unsuccessful("no matches".into()),
        )));
        let err = SearchPhase::new(tools, "search_docs")
            .run(&mut state, &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no matches"));
    }

    #[tokio::test]
    async fn build_appends_clarifications_when_unclear() {
        let (ctx, _token, _rx) = context();
        let provider = Arc::new(SequentialMockProvider::new(vec![text_response("# Guide")]));
        let mut state = FlowState::new("automate onboarding");
        state.analysis = Some(FlowAnalysis {
            is_clear: false,
            missing_info: vec!["trigger source".into()],
            ..FlowAnalysis::fallback("automate onboarding")
        });
        BuildPhase::new(provider, "m").run(&mut state, &ctx).await.unwrap();

        let output = state.output.unwrap();
        assert!(output.starts_with("# Guide"));
        assert!(output.contains("trigger source"));
    }

    #[tokio::test]
    async fn build_uses_basic_guide_when_model_fails() {
        let (ctx, _token, _rx) = context();
        let provider = Arc::new(SequentialMockProvider::scripted(vec![Err(
            ProviderError::Timeout("slow".into()),
        )]));
        let mut state = FlowState::new("email on new file");
        state.analysis = FlowAnalysis::decode(CLEAR_ANALYSIS);
        BuildPhase::new(provider, "m").run(&mut state, &ctx).await.unwrap();

        let output = state.output.unwrap();
        assert!(output.contains("# Flow Building Guide"));
        assert!(output.contains("Google Drive - New File"));
    }

    #[test]
    fn builder_assembles_three_phases() {
        let provider = Arc::new(SequentialMockProvider::new(vec![]));
        let pipeline = FlowBuilder::new(provider, ToolRegistry::new(), "m").pipeline();
        assert_eq!(pipeline.phase_names(), ["analyze", "search", "build"]);
    }
}
