//! Action plans: advisory, structured decompositions of a query.
//!
//! A plan is produced once per request before execution. It guides the
//! executor's reasoning but never constrains it mechanically.

use serde::{Deserialize, Serialize};

/// Coarse classification of what the user is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    SimpleCheck,
    #[serde(alias = "flow_building")]
    FlowBuild,
    Explanation,
    Troubleshooting,
    Configuration,
    #[default]
    #[serde(other)]
    General,
}

/// One advisory instruction in a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawPlanStep")]
pub struct PlanStep {
    pub instruction: String,
    /// Tool or phase the step prefers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

impl PlanStep {
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            tool: None,
            rationale: None,
        }
    }

    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }
}

/// Planners answer with either bare strings or objects per step.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawPlanStep {
    Text(String),
    Detailed {
        #[serde(alias = "step", alias = "description", alias = "action")]
        instruction: String,
        #[serde(default)]
        tool: Option<String>,
        #[serde(default, alias = "reason")]
        rationale: Option<String>,
    },
}

impl From<RawPlanStep> for PlanStep {
    fn from(raw: RawPlanStep) -> Self {
        match raw {
            RawPlanStep::Text(instruction) => PlanStep::new(instruction),
            RawPlanStep::Detailed {
                instruction,
                tool,
                rationale,
            } => PlanStep {
                instruction,
                tool,
                rationale,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionPlan {
    #[serde(default)]
    pub intent: String,

    #[serde(default)]
    pub query_type: QueryType,

    /// Never empty in a plan handed to the executor.
    #[serde(alias = "action_plan")]
    pub steps: Vec<PlanStep>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommended_tools: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub search_queries: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tool_calls: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopping_condition: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_strategy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl ActionPlan {
    /// The built-in plan used whenever a planner response is unusable.
    pub fn fallback(query: &str) -> Self {
        let query = query.trim();
        Self {
            intent: "Process user query".into(),
            query_type: QueryType::General,
            steps: vec![PlanStep::new(
                "Analyze the query, use the appropriate tools to gather information, \
                 and provide a complete response",
            )],
            recommended_tools: Vec::new(),
            search_queries: if query.is_empty() {
                Vec::new()
            } else {
                vec![query.to_string()]
            },
            max_tool_calls: None,
            stopping_condition: None,
            fallback_strategy: None,
            context: Some("Fallback plan - process the query normally".into()),
        }
    }

    /// Decode a model response into a plan.
    ///
    /// Accepts raw JSON or JSON wrapped in a Markdown code fence. Returns
    /// `None` when the text is not a plan or the plan has no steps.
    pub fn decode(raw: &str) -> Option<Self> {
        let plan: Self = serde_json::from_str(extract_json(raw)).ok()?;
        if plan.steps.is_empty() { None } else { Some(plan) }
    }

    pub fn is_fallback(&self) -> bool {
        self.query_type == QueryType::General && self.intent == "Process user query"
    }
}

/// Strip a Markdown code fence (```json … ``` or ``` … ```) around a payload.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();
    let body = if let Some((_, rest)) = text.split_once("```json") {
        rest
    } else if let Some((_, rest)) = text.split_once("```") {
        rest
    } else {
        return text;
    };
    body.split_once("```").map_or(body, |(inner, _)| inner).trim()
}
