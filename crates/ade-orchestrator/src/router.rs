// StageRouter - definition-driven stage selection with legacy fallback
//
// Resolves each workflow's next stage from its platform's enabled
// definitions. When no definition resolves (no platform, disabled or
// missing definition, internal error) the router falls back to the
// hard-coded legacy sequence keyed by workflow type, preserving behavior
// for workflows created before definitions existed.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use ade_core::{
    AdeError, AdeResult, AgentRegistry, StageRoute, StoreRef, Workflow, WorkflowDefinition,
};

/// Legacy stage sequences keyed by workflow type. Agent type equals stage
/// name under legacy routing.
const LEGACY_APP_SEQUENCE: &[&str] = &[
    "initialization",
    "scaffolding",
    "validation",
    "e2e",
    "integration",
    "deployment",
];

const LEGACY_BUGFIX_SEQUENCE: &[&str] =
    &["initialization", "analysis", "patch", "validation", "deployment"];

const LEGACY_DEFAULT_SEQUENCE: &[&str] = &["initialization", "execution", "validation"];

/// The legacy sequence for a workflow type.
pub fn legacy_sequence(workflow_type: &str) -> &'static [&'static str] {
    match workflow_type {
        "app" => LEGACY_APP_SEQUENCE,
        "bugfix" => LEGACY_BUGFIX_SEQUENCE,
        _ => LEGACY_DEFAULT_SEQUENCE,
    }
}

/// Outcome of the stage whose result is being routed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Success,
    Failure,
}

/// A concrete next stage with its executor type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStage {
    pub stage: String,
    pub agent_type: String,
}

/// Routing decision for one transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    /// The next stage, or None for END
    pub next: Option<ResolvedStage>,

    /// Meaningful only when `next` is None: true means the workflow
    /// terminates failed, false means it completes.
    pub terminal_failure: bool,

    /// True when the current stage failed but was routed through `skip`:
    /// its weight counts toward progress, its output is not stored.
    pub skipped_current: bool,

    /// True when the decision came from the legacy sequence rather than a
    /// resolved definition.
    pub is_fallback: bool,
}

impl RouteDecision {
    fn completed() -> Self {
        Self {
            next: None,
            terminal_failure: false,
            skipped_current: false,
            is_fallback: false,
        }
    }

    fn failed() -> Self {
        Self {
            next: None,
            terminal_failure: true,
            skipped_current: false,
            is_fallback: false,
        }
    }
}

/// Preliminary next-stage computation against the legacy sequence. Pure and
/// synchronous so the state machine's transition function stays
/// deterministic; the async router pass may override it.
pub fn legacy_next(
    workflow_type: &str,
    current_stage: &str,
    outcome: StageOutcome,
) -> RouteDecision {
    let sequence = legacy_sequence(workflow_type);
    let Some(index) = sequence.iter().position(|s| *s == current_stage) else {
        // Stage outside the legacy sequence: nothing sensible to advance to.
        return RouteDecision {
            is_fallback: true,
            ..RouteDecision::failed()
        };
    };

    match outcome {
        StageOutcome::Failure => RouteDecision {
            is_fallback: true,
            ..RouteDecision::failed()
        },
        StageOutcome::Success => match sequence.get(index + 1) {
            Some(next) => RouteDecision {
                next: Some(ResolvedStage {
                    stage: (*next).to_string(),
                    agent_type: (*next).to_string(),
                }),
                terminal_failure: false,
                skipped_current: false,
                is_fallback: true,
            },
            None => RouteDecision {
                is_fallback: true,
                ..RouteDecision::completed()
            },
        },
    }
}

/// Definition-driven stage router with a per-platform cache
pub struct StageRouter {
    store: StoreRef,
    /// platform_id -> enabled definitions, invalidated on any definition
    /// mutation
    cache: DashMap<String, Arc<Vec<WorkflowDefinition>>>,
}

impl StageRouter {
    pub fn new(store: StoreRef) -> Self {
        Self {
            store,
            cache: DashMap::new(),
        }
    }

    /// Drop the cached definitions of a platform. Called by every definition
    /// mutation endpoint.
    pub fn invalidate(&self, platform_id: &str) {
        self.cache.remove(platform_id);
    }

    async fn enabled_definitions(
        &self,
        platform_id: &str,
    ) -> AdeResult<Arc<Vec<WorkflowDefinition>>> {
        if let Some(cached) = self.cache.get(platform_id) {
            return Ok(cached.clone());
        }
        let mut definitions = self.store.list_definitions(platform_id, true).await?;
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        let definitions = Arc::new(definitions);
        self.cache
            .insert(platform_id.to_string(), definitions.clone());
        Ok(definitions)
    }

    /// Resolve the definition governing a workflow, if any. Pinned
    /// definitions take precedence; otherwise the platform's enabled
    /// definitions are consulted, preferring one named after the workflow
    /// type.
    pub async fn resolve_definition(
        &self,
        workflow: &Workflow,
    ) -> AdeResult<Option<WorkflowDefinition>> {
        if let Some(definition_id) = &workflow.workflow_definition_id {
            match self.store.get_definition(definition_id).await? {
                Some(definition) if definition.enabled => return Ok(Some(definition)),
                Some(_) => {
                    warn!(
                        workflow_id = %workflow.id,
                        definition_id = %definition_id,
                        "pinned definition is disabled, falling back"
                    );
                    return Ok(None);
                }
                None => {
                    warn!(
                        workflow_id = %workflow.id,
                        definition_id = %definition_id,
                        "pinned definition not found, falling back"
                    );
                    return Ok(None);
                }
            }
        }

        let Some(platform_id) = &workflow.platform_id else {
            return Ok(None);
        };
        let definitions = self.enabled_definitions(platform_id).await?;
        let chosen = definitions
            .iter()
            .find(|d| d.name == workflow.workflow_type)
            .or_else(|| definitions.first())
            .cloned();
        Ok(chosen)
    }

    /// Initial stage for a freshly created workflow. Returns the stage and
    /// whether the legacy fallback was used.
    pub async fn initial_stage(&self, workflow: &Workflow) -> AdeResult<(ResolvedStage, bool)> {
        match self.resolve_definition(workflow).await? {
            Some(definition) => {
                let entry = definition.definition.entry_stage().ok_or_else(|| {
                    AdeError::DefinitionInvalid(format!(
                        "definition {} has no stages",
                        definition.id
                    ))
                })?;
                Ok((
                    ResolvedStage {
                        stage: entry.name.clone(),
                        agent_type: entry.agent_type.clone(),
                    },
                    false,
                ))
            }
            None => {
                let sequence = legacy_sequence(&workflow.workflow_type);
                let first = sequence[0];
                debug!(
                    workflow_id = %workflow.id,
                    workflow_type = %workflow.workflow_type,
                    "no definition resolvable, using legacy sequence"
                );
                Ok((
                    ResolvedStage {
                        stage: first.to_string(),
                        agent_type: first.to_string(),
                    },
                    true,
                ))
            }
        }
    }

    /// Route the transition out of `current_stage` for the given outcome.
    pub async fn next_stage(
        &self,
        workflow: &Workflow,
        current_stage: &str,
        outcome: StageOutcome,
    ) -> AdeResult<RouteDecision> {
        let Some(definition) = self.resolve_definition(workflow).await? else {
            return Ok(legacy_next(&workflow.workflow_type, current_stage, outcome));
        };

        let doc = &definition.definition;
        let stage = doc.stage(current_stage).ok_or_else(|| {
            AdeError::Internal(format!(
                "workflow {} is at stage '{}' which does not exist in definition {}",
                workflow.id, current_stage, definition.id
            ))
        })?;

        let route = match outcome {
            StageOutcome::Success => &stage.on_success,
            StageOutcome::Failure => &stage.on_failure,
        };

        let decision = match route {
            StageRoute::End => match outcome {
                StageOutcome::Success => RouteDecision::completed(),
                StageOutcome::Failure => RouteDecision::failed(),
            },
            StageRoute::Skip => {
                let next = doc
                    .stage_index(current_stage)
                    .and_then(|index| doc.stages.get(index + 1));
                RouteDecision {
                    next: next.map(|s| ResolvedStage {
                        stage: s.name.clone(),
                        agent_type: s.agent_type.clone(),
                    }),
                    terminal_failure: false,
                    skipped_current: outcome == StageOutcome::Failure,
                    is_fallback: false,
                }
            }
            StageRoute::Stage(name) => {
                let target = doc.stage(name).ok_or_else(|| {
                    AdeError::Internal(format!(
                        "definition {} routes '{}' to unknown stage '{}'",
                        definition.id, current_stage, name
                    ))
                })?;
                RouteDecision {
                    next: Some(ResolvedStage {
                        stage: target.name.clone(),
                        agent_type: target.agent_type.clone(),
                    }),
                    terminal_failure: false,
                    skipped_current: false,
                    is_fallback: false,
                }
            }
        };

        Ok(decision)
    }

    /// Authoritative progress for a workflow: completed stage weights under
    /// the active definition, or uniform shares under legacy fallback.
    /// Skipped stages count; the validation_error sentinel does not.
    pub async fn progress(&self, workflow: &Workflow) -> AdeResult<u8> {
        let mut completed: Vec<&str> = workflow
            .stage_outputs
            .keys()
            .map(String::as_str)
            .filter(|k| *k != "validation_error")
            .collect();
        completed.extend(workflow.skipped_stages.iter().map(String::as_str));

        match self.resolve_definition(workflow).await? {
            Some(definition) => Ok(definition.progress_for(&completed)),
            None => {
                let sequence = legacy_sequence(&workflow.workflow_type);
                let count = sequence.iter().filter(|s| completed.contains(s)).count();
                let last_done = sequence
                    .last()
                    .map(|s| completed.contains(s))
                    .unwrap_or(false);
                if last_done || count == sequence.len() {
                    Ok(100)
                } else {
                    Ok(((100 / sequence.len() as u32) * count as u32).min(100) as u8)
                }
            }
        }
    }

    /// Pre-execution validation: every agent type referenced by the
    /// workflow's resolved definition (or legacy sequence) must have an
    /// online agent. Returns the missing types.
    pub async fn validate(
        &self,
        workflow: &Workflow,
        registry: &AgentRegistry,
    ) -> AdeResult<Vec<String>> {
        let agent_types: Vec<String> = match self.resolve_definition(workflow).await? {
            Some(definition) => definition
                .definition
                .agent_types()
                .into_iter()
                .map(str::to_string)
                .collect(),
            None => legacy_sequence(&workflow.workflow_type)
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };
        let type_refs: Vec<&str> = agent_types.iter().map(String::as_str).collect();
        registry
            .missing_agent_types(&type_refs, workflow.platform_id.as_deref())
            .await
    }
}
