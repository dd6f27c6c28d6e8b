// ADE Core - Workflow definition types
//
// A WorkflowDefinition is a per-platform directed graph of stages with
// success/failure routing and progress weights. Definitions are versioned
// and never mutated in place; updating one writes a new version.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Routing target of a stage edge. Serialized as the literal `"END"`, the
/// literal `"skip"`, or the name of another stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StageRoute {
    /// Route to a named stage
    Stage(String),
    /// Workflow completes
    End,
    /// Continue as if success to the next stage in list order
    Skip,
}

impl From<String> for StageRoute {
    fn from(s: String) -> Self {
        match s.as_str() {
            "END" => StageRoute::End,
            "skip" => StageRoute::Skip,
            _ => StageRoute::Stage(s),
        }
    }
}

impl From<StageRoute> for String {
    fn from(route: StageRoute) -> Self {
        match route {
            StageRoute::End => "END".to_string(),
            StageRoute::Skip => "skip".to_string(),
            StageRoute::Stage(name) => name,
        }
    }
}

/// One stage of a definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Stage name, unique within the definition
    pub name: String,

    /// Free-string agent type that executes this stage
    pub agent_type: String,

    /// Progress contribution when the stage completes. Weights summing past
    /// 100 are tolerated and clamped at report time.
    pub weight: u32,

    /// Per-stage envelope timeout override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    /// Per-stage retry budget override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Route on successful stage completion
    pub on_success: StageRoute,

    /// Route on stage failure (default: terminate)
    #[serde(default = "default_on_failure")]
    pub on_failure: StageRoute,
}

fn default_on_failure() -> StageRoute {
    StageRoute::End
}

/// The routed stage graph carried inside a WorkflowDefinition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionDocument {
    /// Ordered stage list. The first stage is the entry point; list order
    /// also resolves `skip` routing.
    pub stages: Vec<StageDefinition>,
}

impl DefinitionDocument {
    /// Look up a stage by name.
    pub fn stage(&self, name: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Position of a stage in list order.
    pub fn stage_index(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    /// Entry stage (first in list order).
    pub fn entry_stage(&self) -> Option<&StageDefinition> {
        self.stages.first()
    }

    /// All distinct agent types referenced by the graph.
    pub fn agent_types(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.stages
            .iter()
            .filter(|s| seen.insert(s.agent_type.as_str()))
            .map(|s| s.agent_type.as_str())
            .collect()
    }

    /// Validate the graph: stage names unique, no dangling routing targets,
    /// and END reachable from every stage reachable from the entry point.
    pub fn validate(&self) -> Result<(), String> {
        if self.stages.is_empty() {
            return Err("definition has no stages".to_string());
        }

        let names: HashSet<&str> = self.stages.iter().map(|s| s.name.as_str()).collect();
        if names.len() != self.stages.len() {
            return Err("duplicate stage names in definition".to_string());
        }

        for stage in &self.stages {
            if stage.name.is_empty() {
                return Err("stage name cannot be empty".to_string());
            }
            if stage.agent_type.is_empty() {
                return Err(format!("stage '{}' has no agent_type", stage.name));
            }
            for route in [&stage.on_success, &stage.on_failure] {
                if let StageRoute::Stage(target) = route {
                    if !names.contains(target.as_str()) {
                        return Err(format!(
                            "stage '{}' routes to unknown stage '{}'",
                            stage.name, target
                        ));
                    }
                }
            }
        }

        // Reachability: walk forward from the entry stage resolving skip as
        // list-order advancement, and require that every visited stage can
        // still terminate at END.
        let reachable = self.reachable_stages();
        let can_end = self.stages_reaching_end();
        for name in &reachable {
            if !can_end.contains(name.as_str()) {
                return Err(format!(
                    "stage '{}' is reachable but can never terminate at END",
                    name
                ));
            }
        }

        Ok(())
    }

    /// Resolve the effective successor set of a stage, with `skip`
    /// translated to the next stage in list order (or END at the tail).
    fn successors(&self, stage: &StageDefinition) -> Vec<Option<String>> {
        let mut out = Vec::with_capacity(2);
        for route in [&stage.on_success, &stage.on_failure] {
            match route {
                StageRoute::End => out.push(None),
                StageRoute::Stage(name) => out.push(Some(name.clone())),
                StageRoute::Skip => {
                    let next = self
                        .stage_index(&stage.name)
                        .and_then(|idx| self.stages.get(idx + 1));
                    out.push(next.map(|s| s.name.clone()));
                }
            }
        }
        out
    }

    fn reachable_stages(&self) -> Vec<String> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: Vec<String> = match self.entry_stage() {
            Some(s) => vec![s.name.clone()],
            None => return Vec::new(),
        };
        while let Some(name) = queue.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }
            if let Some(stage) = self.stage(&name) {
                for succ in self.successors(stage).into_iter().flatten() {
                    queue.push(succ);
                }
            }
        }
        visited.into_iter().collect()
    }

    fn stages_reaching_end(&self) -> HashSet<&str> {
        // Fixed-point reverse reachability from END.
        let mut can_end: HashSet<&str> = HashSet::new();
        loop {
            let mut changed = false;
            for stage in &self.stages {
                if can_end.contains(stage.name.as_str()) {
                    continue;
                }
                let reaches = self.successors(stage).into_iter().any(|succ| match succ {
                    None => true,
                    Some(name) => can_end.contains(name.as_str()),
                });
                if reaches {
                    can_end.insert(stage.name.as_str());
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        can_end
    }
}

/// Versioned, per-platform workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Stable identifier
    pub id: String,

    /// Owning platform
    pub platform_id: String,

    /// Definition name, unique per platform
    pub name: String,

    /// Monotonic version; updates write a new version
    pub version: u32,

    /// Disabled definitions are invisible to the router
    pub enabled: bool,

    /// The stage graph
    pub definition: DefinitionDocument,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    pub fn new(
        platform_id: impl Into<String>,
        name: impl Into<String>,
        definition: DefinitionDocument,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            platform_id: platform_id.into(),
            name: name.into(),
            version: 1,
            enabled: true,
            definition,
            created_at: now,
            updated_at: now,
        }
    }

    /// Total weight declared by the stage list (unclamped).
    pub fn total_weight(&self) -> u32 {
        self.definition.stages.iter().map(|s| s.weight).sum()
    }

    /// Progress for a set of completed stages, clamped to [0, 100].
    pub fn progress_for(&self, completed_stages: &[&str]) -> u8 {
        let completed: HashMap<&str, ()> =
            completed_stages.iter().map(|name| (*name, ())).collect();
        let sum: u32 = self
            .definition
            .stages
            .iter()
            .filter(|s| completed.contains_key(s.name.as_str()))
            .map(|s| s.weight)
            .sum();
        sum.min(100) as u8
    }
}
