// Engine - wiring of the orchestration core
//
// Builds the component graph over a substrate and a store, exposing the
// ingress service, the admin service, and the background loops (result
// consumer plus reapers).

use std::sync::Arc;
use std::time::Duration;

use ade_core::{
    AdeResult, AgentRegistry, ReaperConfig, StoreRef, SubscriptionHandle, SubstrateRef,
};

use crate::definitions::DefinitionService;
use crate::dispatcher::TaskDispatcher;
use crate::gate::SurfaceGate;
use crate::machine::WorkflowMachine;
use crate::reaper::{HeartbeatReaper, PendingReaper, TimeoutReaper};
use crate::results::ResultConsumer;
use crate::router::StageRouter;
use crate::service::WorkflowService;

/// The assembled orchestration engine
pub struct Engine {
    store: StoreRef,
    substrate: SubstrateRef,
    registry: Arc<AgentRegistry>,
    router: Arc<StageRouter>,
    gate: Arc<SurfaceGate>,
    dispatcher: Arc<TaskDispatcher>,
    machine: Arc<WorkflowMachine>,
    service: Arc<WorkflowService>,
    definitions: Arc<DefinitionService>,
    consumer: Arc<ResultConsumer>,
}

impl Engine {
    pub fn new(store: StoreRef, substrate: SubstrateRef) -> Self {
        let registry = Arc::new(AgentRegistry::new(store.clone()));
        let router = Arc::new(StageRouter::new(store.clone()));
        let gate = Arc::new(SurfaceGate::new(store.clone()));
        let dispatcher = Arc::new(TaskDispatcher::new(
            store.clone(),
            substrate.clone(),
            registry.clone(),
        ));
        let machine = Arc::new(WorkflowMachine::new(
            store.clone(),
            router.clone(),
            dispatcher.clone(),
        ));
        let service = Arc::new(WorkflowService::new(
            store.clone(),
            gate.clone(),
            router.clone(),
            registry.clone(),
            machine.clone(),
        ));
        let definitions = Arc::new(DefinitionService::new(
            store.clone(),
            router.clone(),
            gate.clone(),
        ));
        let consumer = Arc::new(ResultConsumer::new(
            substrate.clone(),
            store.clone(),
            machine.clone(),
        ));

        Self {
            store,
            substrate,
            registry,
            router,
            gate,
            dispatcher,
            machine,
            service,
            definitions,
            consumer,
        }
    }

    /// Start the result consumer under the orchestrator's consumer group.
    pub async fn start_result_consumer(
        &self,
        consumer_name: &str,
    ) -> AdeResult<SubscriptionHandle> {
        self.consumer.clone().start(consumer_name).await
    }

    /// Spawn the timeout, pending, and heartbeat reapers.
    pub fn spawn_reapers(&self, config: &ReaperConfig) -> Vec<SubscriptionHandle> {
        let timeout_reaper = Arc::new(TimeoutReaper::new(
            self.store.clone(),
            self.substrate.clone(),
            Duration::from_millis(config.timeout_scan_interval_ms),
        ));
        let pending_reaper = Arc::new(PendingReaper::new(
            self.store.clone(),
            self.dispatcher.clone(),
            Duration::from_millis(config.pending_retry_interval_ms),
        ));
        let heartbeat_reaper = Arc::new(HeartbeatReaper::new(
            self.registry.clone(),
            Duration::from_millis(config.heartbeat_scan_interval_ms),
        ));
        vec![
            timeout_reaper.spawn(),
            pending_reaper.spawn(),
            heartbeat_reaper.spawn(),
        ]
    }

    pub fn service(&self) -> Arc<WorkflowService> {
        self.service.clone()
    }

    pub fn definitions(&self) -> Arc<DefinitionService> {
        self.definitions.clone()
    }

    pub fn registry(&self) -> Arc<AgentRegistry> {
        self.registry.clone()
    }

    pub fn router(&self) -> Arc<StageRouter> {
        self.router.clone()
    }

    pub fn gate(&self) -> Arc<SurfaceGate> {
        self.gate.clone()
    }

    pub fn machine(&self) -> Arc<WorkflowMachine> {
        self.machine.clone()
    }

    pub fn dispatcher(&self) -> Arc<TaskDispatcher> {
        self.dispatcher.clone()
    }

    pub fn store(&self) -> StoreRef {
        self.store.clone()
    }

    pub fn substrate(&self) -> SubstrateRef {
        self.substrate.clone()
    }
}
