//! LLM Provider implementations for FlowPilot.
//!
//! All providers implement the `flowpilot_core::Provider` trait.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;
