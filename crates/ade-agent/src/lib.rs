//! ADE Agent - reusable executor runtime
//!
//! The agent-side half of the engine: a harness that consumes a type's task
//! channel, validates envelopes, runs a `StageExecutor`, and publishes
//! complete results back to the orchestrator. Concrete agents implement
//! `StageExecutor` and hand it to `AgentRuntime`; everything else
//! (consumer groups, acknowledgement discipline, result schema, dedup on
//! message_id) is handled here.

pub mod executor;
pub mod runtime;

pub use executor::{ScriptedBehavior, ScriptedExecutor, StageExecutor, PAYLOAD_BEHAVIOR_KEY};
pub use runtime::AgentRuntime;
