//! Phase pipeline for FlowPilot's flow-build mode.
//!
//! Unlike the agent executor, the pipeline never chooses what to do next:
//! order and count of phases are fixed when it is built, and the first
//! failing phase ends the run.

pub mod flow;
pub mod pipeline;

pub use flow::{
    AnalyzePhase, BuildPhase, Complexity, Confidence, FlowAnalysis, FlowBuilder, SearchHit,
    SearchPhase,
};
pub use pipeline::{FlowState, Phase, PhaseError, PhasePipeline, PhaseRecord, PipelineOutcome};
