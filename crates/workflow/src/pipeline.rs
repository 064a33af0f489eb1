//! Fixed-order phase pipeline.
//!
//! Phases run strictly one after another. Each one is an action step: it is
//! numbered by the request's action counter and reported with a
//! `log_start` / `log_update` pair. The first failure halts the pipeline and
//! becomes the run's error; later phases never start.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowpilot_core::error::{ProviderError, RunError, ToolError};
use flowpilot_core::event::{StepDisplay, StepStatus};
use flowpilot_core::execution::ExecutionContext;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::flow::{FlowAnalysis, SearchHit};

/// Why a phase failed.
#[derive(Debug, thiserror::Error)]
pub enum PhaseError {
    #[error(transparent)]
    Model(#[from] ProviderError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("{0}")]
    Failed(String),

    /// A checkpoint inside the phase stopped the run.
    #[error(transparent)]
    Interrupted(#[from] RunError),
}

/// State threaded through the phases of one request.
#[derive(Debug, Clone, Default)]
pub struct FlowState {
    pub request: String,
    pub analysis: Option<FlowAnalysis>,
    pub search_results: Vec<SearchHit>,
    /// Set by the final phase; its absence after the last phase is a bug.
    pub output: Option<String>,
}

impl FlowState {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait Phase: Send + Sync {
    /// Stable identifier, used in `PhaseFailed` and in [`PhaseRecord`].
    fn name(&self) -> &str;

    fn icon(&self) -> &str;

    fn label(&self) -> &str;

    /// Run the phase. `ctx` is read-only: phases may checkpoint and publish
    /// status, while step events stay with the pipeline.
    async fn run(&self, state: &mut FlowState, ctx: &ExecutionContext) -> Result<(), PhaseError>;
}

/// Timing record of one executed phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub duration: Option<f64>,
    pub status: StepStatus,
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub output: String,
    pub records: Vec<PhaseRecord>,
}

#[derive(Clone, Default)]
pub struct PhasePipeline {
    phases: Vec<Arc<dyn Phase>>,
}

impl PhasePipeline {
    pub fn new(phases: Vec<Arc<dyn Phase>>) -> Self {
        Self { phases }
    }

    pub fn phase_names(&self) -> Vec<&str> {
        self.phases.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub async fn run(
        &self,
        request: &str,
        ctx: &mut ExecutionContext,
    ) -> Result<PipelineOutcome, RunError> {
        let mut state = FlowState::new(request);
        let mut records = Vec::with_capacity(self.phases.len());

        for phase in &self.phases {
            ctx.checkpoint()?;
            let key = ctx.next_action_key();
            let display = StepDisplay::new(phase.icon(), phase.label());
            let start_time = ctx.begin_step(key, display.clone());

            let result = phase.run(&mut state, ctx).await;

            match result {
                Ok(()) => {
                    ctx.checkpoint()?;
                    let duration = ctx.complete_step(key, display, StepStatus::Completed);
                    records.push(PhaseRecord {
                        name: phase.name().to_string(),
                        start_time,
                        duration,
                        status: StepStatus::Completed,
                    });
                }
                Err(PhaseError::Interrupted(err)) => {
                    debug!(
                        request_id = %ctx.request_id(),
                        phase = phase.name(),
                        reason = %err,
                        "Phase interrupted at a checkpoint"
                    );
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        request_id = %ctx.request_id(),
                        phase = phase.name(),
                        error = %err,
                        "Phase failed, halting pipeline"
                    );
                    let duration = ctx.complete_step(key, display, StepStatus::Failed);
                    records.push(PhaseRecord {
                        name: phase.name().to_string(),
                        start_time,
                        duration,
                        status: StepStatus::Failed,
                    });
                    return Err(RunError::PhaseFailed {
                        phase: phase.name().to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        let output = state
            .output
            .ok_or_else(|| RunError::Internal("pipeline finished without output".into()))?;
        info!(
            request_id = %ctx.request_id(),
            phases = records.len(),
            "Pipeline completed"
        );
        Ok(PipelineOutcome { output, records })
    }
}

impl std::fmt::Debug for PhasePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhasePipeline")
            .field("phases", &self.phase_names())
            .finish()
    }
}
