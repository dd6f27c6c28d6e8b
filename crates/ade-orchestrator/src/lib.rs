// ADE Orchestrator - the workflow orchestration core
//
// Drives each workflow through its stage graph: admission (surface gate,
// pre-execution validation), per-stage envelope build and dispatch, result
// consumption, definition-driven routing with legacy fallback, CAS-guarded
// state transitions, and timeout/pending reapers.

pub mod builder;
pub mod definitions;
pub mod dispatcher;
pub mod engine;
pub mod gate;
pub mod machine;
pub mod reaper;
pub mod results;
pub mod router;
pub mod service;

pub use builder::EnvelopeBuilder;
pub use definitions::DefinitionService;
pub use dispatcher::TaskDispatcher;
pub use engine::Engine;
pub use gate::SurfaceGate;
pub use machine::{transition, Action, MachineEvent, MachineState, WorkflowMachine};
pub use reaper::{HeartbeatReaper, PendingReaper, TimeoutReaper};
pub use results::ResultConsumer;
pub use router::{
    legacy_next, legacy_sequence, ResolvedStage, RouteDecision, StageOutcome, StageRouter,
};
pub use service::WorkflowService;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
