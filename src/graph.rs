//! Graph model: nodes, edges, blueprints.
//!
//! These types are built during analysis, frozen into a [`WorkflowBlueprint`]
//! by the builder, and never mutated at run time. Everything serializes
//! through JSON-compatible structures (camelCase keys) so a blueprint
//! round-trips byte-identically.

use std::collections::BTreeMap;
use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::diagnostics::SourceLocation;

/// Well-known `uses` values the runtime supplies implementations for.
pub mod kinds {
    pub const START: &str = "start";
    pub const SUBFLOW: &str = "subflow";
    pub const LOOP_CONTROLLER: &str = "loop-controller";
    pub const JOIN: &str = "join";
    pub const MERGE: &str = "merge";
    pub const GATHER: &str = "gather";
    pub const SLEEP: &str = "sleep";
    pub const WAIT: &str = "wait";
    pub const WEBHOOK: &str = "webhook";
    pub const INPUT_MAPPER: &str = "input-mapper";
    pub const OUTPUT_MAPPER: &str = "output-mapper";
    pub const CONDITIONAL_JOIN: &str = "conditional-join";
    pub const PARALLEL_CONTAINER: &str = "parallel-container";
}

/// Edge actions minted by the flow analyzer.
pub mod actions {
    pub const CONTINUE: &str = "continue";
    pub const BREAK: &str = "break";
}

/// Built-in node kinds, plus an open user kind via [`NodeKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltInKind {
    Start,
    Subflow,
    LoopController,
    Join,
    Merge,
    Gather,
    Sleep,
    Wait,
    Webhook,
    InputMapper,
    OutputMapper,
    ConditionalJoin,
    ParallelContainer,
}

impl BuiltInKind {
    pub fn from_uses(uses: &str) -> Option<Self> {
        Some(match uses {
            kinds::START => Self::Start,
            kinds::SUBFLOW => Self::Subflow,
            kinds::LOOP_CONTROLLER => Self::LoopController,
            kinds::JOIN => Self::Join,
            kinds::MERGE => Self::Merge,
            kinds::GATHER => Self::Gather,
            kinds::SLEEP => Self::Sleep,
            kinds::WAIT => Self::Wait,
            kinds::WEBHOOK => Self::Webhook,
            kinds::INPUT_MAPPER => Self::InputMapper,
            kinds::OUTPUT_MAPPER => Self::OutputMapper,
            kinds::CONDITIONAL_JOIN => Self::ConditionalJoin,
            kinds::PARALLEL_CONTAINER => Self::ParallelContainer,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => kinds::START,
            Self::Subflow => kinds::SUBFLOW,
            Self::LoopController => kinds::LOOP_CONTROLLER,
            Self::Join => kinds::JOIN,
            Self::Merge => kinds::MERGE,
            Self::Gather => kinds::GATHER,
            Self::Sleep => kinds::SLEEP,
            Self::Wait => kinds::WAIT,
            Self::Webhook => kinds::WEBHOOK,
            Self::InputMapper => kinds::INPUT_MAPPER,
            Self::OutputMapper => kinds::OUTPUT_MAPPER,
            Self::ConditionalJoin => kinds::CONDITIONAL_JOIN,
            Self::ParallelContainer => kinds::PARALLEL_CONTAINER,
        }
    }

    /// Kinds that are transparent when computing logical producers.
    ///
    /// Output mappers are the exception handled by the builder: the walk
    /// stops at them and records their `originalId`.
    pub fn is_transparent(self) -> bool {
        matches!(
            self,
            Self::Subflow
                | Self::LoopController
                | Self::Join
                | Self::Merge
                | Self::Gather
                | Self::InputMapper
                | Self::ConditionalJoin
                | Self::ParallelContainer
        )
    }
}

/// A node's implementation identity: a built-in kind or a user step name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    BuiltIn(BuiltInKind),
    User(String),
}

impl NodeKind {
    pub fn from_uses(uses: &str) -> Self {
        match BuiltInKind::from_uses(uses) {
            Some(kind) => Self::BuiltIn(kind),
            None => Self::User(uses.to_string()),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuiltIn(kind) => write!(f, "{}", kind.as_str()),
            Self::User(name) => write!(f, "{}", name),
        }
    }
}

/// How a node with multiple incoming edges becomes runnable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinStrategy {
    /// Proceed on first arrival; later arrivals are discarded.
    #[default]
    Any,
    /// Proceed after every predecessor has completed.
    All,
}

/// Recognized per-node options. Unknown keys are carried opaquely in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join_strategy: Option<JoinStrategy>,
    /// Node id to re-run in place if every retry fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    /// Total attempt count, >= 1.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Delay between attempts, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<u64>,
    /// Per-attempt timeout, in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NodeConfig {
    pub fn is_empty(&self) -> bool {
        self.join_strategy.is_none()
            && self.fallback.is_none()
            && self.max_retries.is_none()
            && self.retry_delay.is_none()
            && self.timeout.is_none()
            && self.extra.is_empty()
    }
}

/// One node of a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefinition {
    pub id: String,
    /// User step name, built-in kind, or internal mapper/container kind.
    pub uses: String,
    /// Literal arguments extracted from source.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<NodeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_location: Option<SourceLocation>,
    /// For flattened/synthetic nodes: the user node this one represents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_id: Option<String>,
}

impl NodeDefinition {
    pub fn new(id: impl Into<String>, uses: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uses: uses.into(),
            params: Map::new(),
            config: None,
            source_location: None,
            original_id: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn with_config(mut self, config: NodeConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn kind(&self) -> NodeKind {
        NodeKind::from_uses(&self.uses)
    }

    pub fn join_strategy(&self) -> JoinStrategy {
        self.config
            .as_ref()
            .and_then(|c| c.join_strategy)
            .unwrap_or_default()
    }

    /// Ensure a config exists and hand it out for mutation.
    pub fn config_mut(&mut self) -> &mut NodeConfig {
        self.config.get_or_insert_with(NodeConfig::default)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }
}

/// A directed edge. `action` partitions a source's outgoing edges;
/// `condition` is uninterpreted source text evaluated by the runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeDefinition {
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_location: Option<SourceLocation>,
}

impl EdgeDefinition {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            action: None,
            condition: None,
            source_location: None,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn is_default(&self) -> bool {
        self.action.is_none() && self.condition.is_none()
    }
}

/// An analyzed but not yet flattened workflow graph.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraph {
    pub id: String,
    pub nodes: Vec<NodeDefinition>,
    pub edges: Vec<EdgeDefinition>,
}

impl WorkflowGraph {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Node ids with no incoming edge, in node order.
    pub fn root_ids(&self) -> Vec<&str> {
        let targets: FxHashSet<&str> = self.edges.iter().map(|e| e.target.as_str()).collect();
        self.nodes
            .iter()
            .filter(|n| !targets.contains(n.id.as_str()))
            .map(|n| n.id.as_str())
            .collect()
    }

    /// Node ids with no outgoing edge, in node order.
    pub fn terminal_ids(&self) -> Vec<&str> {
        let sources: FxHashSet<&str> = self.edges.iter().map(|e| e.source.as_str()).collect();
        self.nodes
            .iter()
            .filter(|n| !sources.contains(n.id.as_str()))
            .map(|n| n.id.as_str())
            .collect()
    }
}

/// Fully flattened, serializable workflow. The runtime's unit of execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowBlueprint {
    pub id: String,
    pub nodes: Vec<NodeDefinition>,
    pub edges: Vec<EdgeDefinition>,
    pub start_node_id: String,
    /// Direct in-degree per node, used by `all`-join arrival counting.
    pub predecessor_count_map: BTreeMap<String, usize>,
    /// Logical producers per node, mappers/containers traversed through.
    pub original_predecessor_id_map: BTreeMap<String, Vec<String>>,
}

impl WorkflowBlueprint {
    pub fn node(&self, id: &str) -> Option<&NodeDefinition> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn outgoing<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a EdgeDefinition> {
        self.edges.iter().filter(move |e| e.source == id)
    }

    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a EdgeDefinition> {
        self.edges.iter().filter(move |e| e.target == id)
    }

    /// Check the structural invariants of a well-formed blueprint.
    ///
    /// Returns human-readable violations; an empty list means the blueprint
    /// is sound. The builder always produces sound blueprints; this exists
    /// for hand-built graphs and for tests.
    pub fn verify(&self) -> Vec<String> {
        let mut violations = Vec::new();

        // Unique ids.
        let mut seen: FxHashSet<&str> = FxHashSet::default();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                violations.push(format!("duplicate node id '{}'", node.id));
            }
        }

        // Edge endpoints exist.
        for edge in &self.edges {
            if !seen.contains(edge.source.as_str()) {
                violations.push(format!(
                    "edge {} -> {} references unknown source",
                    edge.source, edge.target
                ));
            }
            if !seen.contains(edge.target.as_str()) {
                violations.push(format!(
                    "edge {} -> {} references unknown target",
                    edge.source, edge.target
                ));
            }
        }

        // Start node exists and everything is reachable from it.
        if !seen.contains(self.start_node_id.as_str()) {
            violations.push(format!(
                "start node '{}' is not in the node set",
                self.start_node_id
            ));
        } else {
            let mut adjacency: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
            for edge in &self.edges {
                adjacency
                    .entry(edge.source.as_str())
                    .or_default()
                    .push(edge.target.as_str());
            }
            let mut visited: FxHashSet<&str> = FxHashSet::default();
            let mut queue = vec![self.start_node_id.as_str()];
            while let Some(id) = queue.pop() {
                if visited.insert(id) {
                    if let Some(next) = adjacency.get(id) {
                        queue.extend(next.iter().copied());
                    }
                }
            }
            // Fallback targets are entered by the resiliency envelope, not
            // by edges; treat a fallback reference as reachability.
            let mut changed = true;
            while changed {
                changed = false;
                for node in &self.nodes {
                    if !visited.contains(node.id.as_str()) {
                        continue;
                    }
                    if let Some(fallback) =
                        node.config.as_ref().and_then(|c| c.fallback.as_deref())
                    {
                        if visited.insert(fallback) {
                            let mut queue = vec![fallback];
                            while let Some(id) = queue.pop() {
                                if let Some(next) = adjacency.get(id) {
                                    for t in next {
                                        if visited.insert(t) {
                                            queue.push(t);
                                        }
                                    }
                                }
                            }
                            changed = true;
                        }
                    }
                }
            }
            for node in &self.nodes {
                if !visited.contains(node.id.as_str()) {
                    violations.push(format!(
                        "node '{}' is unreachable from start '{}'",
                        node.id, self.start_node_id
                    ));
                }
            }
        }

        // In-degree bookkeeping and all-join validity.
        let mut in_degree: FxHashMap<&str, usize> = FxHashMap::default();
        for edge in &self.edges {
            *in_degree.entry(edge.target.as_str()).or_insert(0) += 1;
        }
        for node in &self.nodes {
            let actual = in_degree.get(node.id.as_str()).copied().unwrap_or(0);
            let recorded = self
                .predecessor_count_map
                .get(&node.id)
                .copied()
                .unwrap_or(0);
            if actual != recorded {
                violations.push(format!(
                    "predecessorCountMap['{}'] is {} but {} edges target it",
                    node.id, recorded, actual
                ));
            }
            if node.join_strategy() == JoinStrategy::All && actual < 2 {
                violations.push(format!(
                    "node '{}' uses joinStrategy 'all' with {} incoming edges",
                    node.id, actual
                ));
            }
        }

        // Internal mappers/containers must carry originalId.
        for node in &self.nodes {
            if let NodeKind::BuiltIn(kind) = node.kind() {
                if matches!(
                    kind,
                    BuiltInKind::InputMapper
                        | BuiltInKind::OutputMapper
                        | BuiltInKind::ParallelContainer
                        | BuiltInKind::ConditionalJoin
                ) && node.original_id.is_none()
                {
                    violations.push(format!(
                        "internal node '{}' ({}) is missing originalId",
                        node.id, node.uses
                    ));
                }
            }
        }

        // Out-degree per (source, action): more than one only for
        // conditional sources and parallel containers.
        let mut fanout: FxHashMap<(&str, Option<&str>), usize> = FxHashMap::default();
        for edge in &self.edges {
            if edge.condition.is_some() {
                continue;
            }
            *fanout
                .entry((edge.source.as_str(), edge.action.as_deref()))
                .or_insert(0) += 1;
        }
        for ((source, action), count) in fanout {
            if count <= 1 {
                continue;
            }
            let node = self.node(source);
            let is_container = node
                .map(|n| {
                    matches!(
                        n.kind(),
                        NodeKind::BuiltIn(
                            BuiltInKind::ParallelContainer | BuiltInKind::LoopController
                        )
                    )
                })
                .unwrap_or(false);
            let is_conditional = self.outgoing(source).any(|e| e.condition.is_some());
            if !is_container && !is_conditional {
                violations.push(format!(
                    "node '{}' has {} unconditional edges for action {:?}",
                    source, count, action
                ));
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn linear_blueprint() -> WorkflowBlueprint {
        let nodes = vec![
            NodeDefinition::new("a_1", "A"),
            NodeDefinition::new("b_1", "B"),
        ];
        let edges = vec![EdgeDefinition::new("a_1", "b_1")];
        let mut counts = BTreeMap::new();
        counts.insert("a_1".to_string(), 0);
        counts.insert("b_1".to_string(), 1);
        let mut originals = BTreeMap::new();
        originals.insert("a_1".to_string(), vec![]);
        originals.insert("b_1".to_string(), vec!["a_1".to_string()]);
        WorkflowBlueprint {
            id: "main".into(),
            nodes,
            edges,
            start_node_id: "a_1".into(),
            predecessor_count_map: counts,
            original_predecessor_id_map: originals,
        }
    }

    #[test]
    fn builtin_kind_round_trips_uses() {
        for uses in [
            "start",
            "subflow",
            "loop-controller",
            "join",
            "merge",
            "gather",
            "sleep",
            "wait",
            "webhook",
            "input-mapper",
            "output-mapper",
            "conditional-join",
            "parallel-container",
        ] {
            let kind = BuiltInKind::from_uses(uses).unwrap();
            assert_eq!(kind.as_str(), uses);
        }
        assert!(BuiltInKind::from_uses("fetchUser").is_none());
    }

    #[test]
    fn node_kind_is_open_over_user_steps() {
        assert_eq!(
            NodeKind::from_uses("fetchUser"),
            NodeKind::User("fetchUser".into())
        );
        assert_eq!(
            NodeKind::from_uses("sleep"),
            NodeKind::BuiltIn(BuiltInKind::Sleep)
        );
    }

    #[test]
    fn config_serializes_camel_case() {
        let config = NodeConfig {
            join_strategy: Some(JoinStrategy::All),
            fallback: Some("recover_1".into()),
            max_retries: Some(3),
            retry_delay: Some(250),
            timeout: Some(5_000),
            extra: Map::new(),
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(
            json,
            json!({
                "joinStrategy": "all",
                "fallback": "recover_1",
                "maxRetries": 3,
                "retryDelay": 250,
                "timeout": 5000
            })
        );
    }

    #[test]
    fn config_carries_unknown_keys_opaquely() {
        let json = json!({"joinStrategy": "any", "team": "payments"});
        let config: NodeConfig = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(config.join_strategy, Some(JoinStrategy::Any));
        assert_eq!(config.extra.get("team"), Some(&json!("payments")));
        assert_eq!(serde_json::to_value(&config).unwrap(), json);
    }

    #[test]
    fn blueprint_json_round_trip_is_identity() {
        let blueprint = linear_blueprint();
        let text = serde_json::to_string(&blueprint).unwrap();
        let back: WorkflowBlueprint = serde_json::from_str(&text).unwrap();
        assert_eq!(back, blueprint);
    }

    #[test]
    fn verify_accepts_sound_blueprint() {
        assert!(linear_blueprint().verify().is_empty());
    }

    #[test]
    fn verify_flags_duplicate_ids() {
        let mut blueprint = linear_blueprint();
        blueprint.nodes.push(NodeDefinition::new("a_1", "A"));
        let violations = blueprint.verify();
        assert!(violations.iter().any(|v| v.contains("duplicate node id")));
    }

    #[test]
    fn verify_flags_dangling_edge() {
        let mut blueprint = linear_blueprint();
        blueprint
            .edges
            .push(EdgeDefinition::new("b_1", "ghost"));
        let violations = blueprint.verify();
        assert!(violations.iter().any(|v| v.contains("unknown target")));
    }

    #[test]
    fn verify_flags_bad_predecessor_count() {
        let mut blueprint = linear_blueprint();
        blueprint
            .predecessor_count_map
            .insert("b_1".to_string(), 7);
        let violations = blueprint.verify();
        assert!(violations
            .iter()
            .any(|v| v.contains("predecessorCountMap['b_1']")));
    }

    #[test]
    fn verify_flags_single_input_all_join() {
        let mut blueprint = linear_blueprint();
        blueprint.nodes[1].config_mut().join_strategy = Some(JoinStrategy::All);
        let violations = blueprint.verify();
        assert!(violations
            .iter()
            .any(|v| v.contains("joinStrategy 'all'")));
    }

    #[test]
    fn verify_flags_unreachable_node() {
        let mut blueprint = linear_blueprint();
        blueprint.nodes.push(NodeDefinition::new("orphan_1", "C"));
        blueprint
            .predecessor_count_map
            .insert("orphan_1".to_string(), 0);
        let violations = blueprint.verify();
        assert!(violations.iter().any(|v| v.contains("unreachable")));
    }

    #[test]
    fn verify_allows_fallback_only_entry() {
        let mut blueprint = linear_blueprint();
        blueprint.nodes.push(NodeDefinition::new("recover_1", "R"));
        blueprint
            .predecessor_count_map
            .insert("recover_1".to_string(), 0);
        blueprint.nodes[0].config_mut().fallback = Some("recover_1".into());
        assert!(blueprint.verify().is_empty());
    }

    #[test]
    fn roots_and_terminals() {
        let mut graph = WorkflowGraph::new("wf");
        graph.nodes.push(NodeDefinition::new("a", "A"));
        graph.nodes.push(NodeDefinition::new("b", "B"));
        graph.nodes.push(NodeDefinition::new("c", "C"));
        graph.edges.push(EdgeDefinition::new("a", "b"));
        assert_eq!(graph.root_ids(), vec!["a", "c"]);
        assert_eq!(graph.terminal_ids(), vec!["b", "c"]);
    }
}
