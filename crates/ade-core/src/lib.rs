// ADE Core - Foundation types and ports for the Agentic Delivery Engine
//
// This crate defines the data model of the workflow orchestration core and
// the two ports everything else plugs into: the message substrate and the
// persistence store. No adapter code lives here.

pub mod agent;
pub mod config;
pub mod definition;
pub mod envelope;
pub mod error;
pub mod event;
pub mod platform;
pub mod registry;
pub mod result;
pub mod store;
pub mod substrate;
pub mod task;
pub mod workflow;

// Re-export core types
pub use agent::{AgentRecord, AgentStatus};
pub use config::{
    EngineConfig, ObservabilityConfig, ReaperConfig, StoreConfig, SubstrateConfig,
};
pub use definition::{DefinitionDocument, StageDefinition, StageRoute, WorkflowDefinition};
pub use envelope::{
    AgentEnvelope, Constraints, EnvelopeMetadata, EnvelopeStatus, Priority, TraceContext,
    WorkflowContext, DEFAULT_MAX_RETRIES, DEFAULT_REQUIRED_CONFIDENCE, DEFAULT_TIMEOUT_MS,
    ENVELOPE_VERSION,
};
pub use error::{AdeError, AdeResult};
pub use event::{WorkflowEvent, WorkflowEventKind};
pub use platform::{Platform, PlatformSurface, SurfaceType};
pub use registry::{AgentRegistry, RegistryRef};
pub use result::{AgentErrorDetail, AgentResult, ResultBody, ResultMetrics, ResultStatus};
pub use store::{StoreRef, WorkflowStore};
pub use substrate::{
    stream_mirror, task_channel, task_group, FnHandler, MessageHandler, MessageSubstrate,
    PublishOptions, SubscribeOptions, SubscriptionHandle, SubstrateRef, RESULTS_CHANNEL,
    RESULTS_GROUP,
};
pub use task::{AgentTask, TaskStatus};
pub use workflow::{
    CreateWorkflowRequest, SurfaceContext, Workflow, WorkflowStatus, WorkflowSummary,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
