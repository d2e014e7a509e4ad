//! Blueprint builder: flattens user graphs into executable blueprints.
//!
//! Sub-workflow nodes are replaced by a container plus input/output mappers
//! with the child graph inlined under an id prefix; scatter fan-outs get
//! explicit parallel containers; convergence points downstream of declared
//! conditional forks get a conditional-join guard; and the predecessor maps
//! the executor schedules with are computed here.

use std::collections::BTreeMap;

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use thiserror::Error;
use tracing::instrument;

use crate::graph::{
    kinds, BuiltInKind, EdgeDefinition, NodeDefinition, NodeKind, WorkflowBlueprint,
    WorkflowGraph,
};

/// Synthetic root minted when a graph has several entry nodes.
pub const ROOT_PARALLEL_ID: &str = "__root_parallel_start";

/// Build-time lookup for sub-workflow graphs.
pub trait SubWorkflowResolver {
    fn get_graph(&self, id: &str) -> Option<&WorkflowGraph>;
}

/// No sub-workflows available.
impl SubWorkflowResolver for () {
    fn get_graph(&self, _id: &str) -> Option<&WorkflowGraph> {
        None
    }
}

impl SubWorkflowResolver for BTreeMap<String, WorkflowGraph> {
    fn get_graph(&self, id: &str) -> Option<&WorkflowGraph> {
        self.get(id)
    }
}

impl SubWorkflowResolver for FxHashMap<String, WorkflowGraph> {
    fn get_graph(&self, id: &str) -> Option<&WorkflowGraph> {
        self.get(id)
    }
}

/// Fatal build-time problems. Unlike analysis diagnostics these abort the
/// build; the driver reports them and exits.
#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("workflow '{0}' has a cycle and no start node")]
    NoStartNode(String),

    #[error("sub-workflow '{workflow_id}' referenced by node '{node_id}' was not found")]
    UnknownSubWorkflow { node_id: String, workflow_id: String },

    #[error(
        "node '{node_id}' carries a workflowId but its type '{uses}' is not a registered sub-workflow type"
    )]
    UnknownSubWorkflowType { node_id: String, uses: String },

    #[error("sub-workflow '{0}' includes itself (directly or transitively)")]
    RecursiveSubWorkflow(String),
}

/// Recognized builder options; unknown configuration is ignored upstream.
#[derive(Debug, Clone)]
pub struct BuilderOptions {
    /// `uses` values replaced by container + mappers + inlined child.
    pub sub_workflow_types: FxHashSet<String>,
    /// `uses` values whose fan-out is conditional (guards convergence
    /// points with a conditional-join).
    pub conditional_types: FxHashSet<String>,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        let mut sub_workflow_types = FxHashSet::default();
        sub_workflow_types.insert(kinds::SUBFLOW.to_string());
        Self {
            sub_workflow_types,
            conditional_types: FxHashSet::default(),
        }
    }
}

pub struct BlueprintBuilder<'r> {
    resolver: &'r dyn SubWorkflowResolver,
    options: BuilderOptions,
}

impl<'r> BlueprintBuilder<'r> {
    pub fn new(resolver: &'r dyn SubWorkflowResolver) -> Self {
        Self {
            resolver,
            options: BuilderOptions::default(),
        }
    }

    pub fn with_options(mut self, options: BuilderOptions) -> Self {
        self.options = options;
        self
    }

    /// Flatten `graph` and derive the executable blueprint.
    #[instrument(skip_all, fields(workflow = %graph.id))]
    pub fn build(&self, graph: &WorkflowGraph) -> Result<WorkflowBlueprint, BuilderError> {
        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        let mut inline_stack = Vec::new();
        self.flatten(graph, "", &mut nodes, &mut edges, &mut inline_stack)?;

        self.insert_conditional_joins(&mut nodes, &mut edges);
        self.insert_parallel_containers(&mut nodes, &mut edges);
        let start_node_id = self.select_start(graph, &mut nodes, &mut edges)?;

        let predecessor_count_map = predecessor_counts(&nodes, &edges);
        let original_predecessor_id_map = original_predecessors(&nodes, &edges);

        Ok(WorkflowBlueprint {
            id: graph.id.clone(),
            nodes,
            edges,
            start_node_id,
            predecessor_count_map,
            original_predecessor_id_map,
        })
    }

    // ------------------------------------------------------------------
    // Flatten pass
    // ------------------------------------------------------------------

    fn flatten(
        &self,
        graph: &WorkflowGraph,
        prefix: &str,
        nodes: &mut Vec<NodeDefinition>,
        edges: &mut Vec<EdgeDefinition>,
        inline_stack: &mut Vec<String>,
    ) -> Result<(), BuilderError> {
        let local_ids: FxHashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();

        // Which local nodes are sub-workflows, and what they inline.
        let mut sub_ids: FxHashSet<String> = FxHashSet::default();
        for node in &graph.nodes {
            if let Some(workflow_id) = sub_workflow_id(node) {
                if !self.options.sub_workflow_types.contains(&node.uses) {
                    if node.params.contains_key("workflowId") {
                        return Err(BuilderError::UnknownSubWorkflowType {
                            node_id: node.id.clone(),
                            uses: node.uses.clone(),
                        });
                    }
                    continue;
                }
                if inline_stack.iter().any(|id| id == &workflow_id) {
                    return Err(BuilderError::RecursiveSubWorkflow(workflow_id));
                }
                if self.resolver.get_graph(&workflow_id).is_none() {
                    return Err(BuilderError::UnknownSubWorkflow {
                        node_id: node.id.clone(),
                        workflow_id,
                    });
                }
                sub_ids.insert(node.id.clone());
            }
        }

        for node in &graph.nodes {
            let flat_id = format!("{}{}", prefix, node.id);
            if sub_ids.contains(&node.id) {
                let workflow_id = sub_workflow_id(node).expect("checked above");
                let child = self.resolver.get_graph(&workflow_id).expect("checked above");

                // Container preserves the original id; mappers carry the
                // container as their originalId so predecessor walks can
                // name the sub-workflow they stand for. The workflow-id
                // param comes off the container: its body is inlined now,
                // which also makes re-flattening a no-op.
                let mut container = node.clone();
                container.id = flat_id.clone();
                container.original_id.get_or_insert_with(|| node.id.clone());
                container.params.remove("blueprintId");
                container.params.remove("workflowId");
                nodes.push(container);

                let input_mapper_id = format!("{}_input_mapper", flat_id);
                let mut input_mapper = NodeDefinition::new(&input_mapper_id, kinds::INPUT_MAPPER);
                input_mapper.original_id = Some(flat_id.clone());
                if let Some(inputs) = node.params.get("inputs") {
                    input_mapper.params.insert("inputs".into(), inputs.clone());
                }
                nodes.push(input_mapper);

                let output_mapper_id = format!("{}_output_mapper", flat_id);
                let mut output_mapper =
                    NodeDefinition::new(&output_mapper_id, kinds::OUTPUT_MAPPER);
                output_mapper.original_id = Some(flat_id.clone());
                if let Some(outputs) = node.params.get("outputs") {
                    output_mapper
                        .params
                        .insert("outputs".into(), outputs.clone());
                }
                nodes.push(output_mapper);

                edges.push(EdgeDefinition::new(&flat_id, &input_mapper_id));

                let child_prefix = format!("{}:", flat_id);
                let child_roots: Vec<String> =
                    child.root_ids().iter().map(|id| id.to_string()).collect();
                let child_terminals: Vec<String> = child
                    .terminal_ids()
                    .iter()
                    .map(|id| id.to_string())
                    .collect();
                let child_subs: FxHashSet<String> = child
                    .nodes
                    .iter()
                    .filter(|n| {
                        sub_workflow_id(n).is_some()
                            && self.options.sub_workflow_types.contains(&n.uses)
                    })
                    .map(|n| n.id.clone())
                    .collect();

                inline_stack.push(workflow_id.clone());
                self.flatten(child, &child_prefix, nodes, edges, inline_stack)?;
                inline_stack.pop();

                for root in &child_roots {
                    edges.push(EdgeDefinition::new(
                        &input_mapper_id,
                        format!("{}{}", child_prefix, root),
                    ));
                }
                for terminal in &child_terminals {
                    // A terminal that is itself a sub-workflow produces its
                    // result at its own output mapper.
                    let source = if child_subs.contains(terminal) {
                        format!("{}{}_output_mapper", child_prefix, terminal)
                    } else {
                        format!("{}{}", child_prefix, terminal)
                    };
                    edges.push(EdgeDefinition::new(source, &output_mapper_id));
                }
            } else {
                let mut copy = node.clone();
                copy.id = flat_id;
                copy.original_id.get_or_insert_with(|| node.id.clone());
                rewrite_local_refs(&mut copy, &local_ids, prefix);
                nodes.push(copy);
            }
        }

        for edge in &graph.edges {
            let source = if sub_ids.contains(&edge.source) {
                format!("{}{}_output_mapper", prefix, edge.source)
            } else {
                format!("{}{}", prefix, edge.source)
            };
            let mut copy = edge.clone();
            copy.source = source;
            copy.target = format!("{}{}", prefix, edge.target);
            edges.push(copy);
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Conditional joins
    // ------------------------------------------------------------------

    /// Guard the first common descendant of each declared-conditional fork
    /// with a synthetic in-degree-1 join so the convergence node is not
    /// mistaken for a true fan-in.
    fn insert_conditional_joins(
        &self,
        nodes: &mut Vec<NodeDefinition>,
        edges: &mut Vec<EdgeDefinition>,
    ) {
        if self.options.conditional_types.is_empty() {
            return;
        }
        let fork_ids: Vec<String> = nodes
            .iter()
            .filter(|n| self.options.conditional_types.contains(&n.uses))
            .map(|n| n.id.clone())
            .collect();

        for fork in fork_ids {
            let heads: Vec<String> = edges
                .iter()
                .filter(|e| e.source == fork)
                .map(|e| e.target.clone())
                .collect();
            if heads.len() < 2 {
                continue;
            }

            // BFS colouring: depth of each node per branch.
            let adjacency = adjacency_of(edges);
            let mut depths: Vec<FxHashMap<String, usize>> = Vec::with_capacity(heads.len());
            for head in &heads {
                let mut depth: FxHashMap<String, usize> = FxHashMap::default();
                let mut queue = std::collections::VecDeque::new();
                depth.insert(head.clone(), 0);
                queue.push_back(head.clone());
                while let Some(current) = queue.pop_front() {
                    let next_depth = depth[&current] + 1;
                    if let Some(successors) = adjacency.get(current.as_str()) {
                        for succ in successors {
                            if !depth.contains_key(*succ) {
                                depth.insert((*succ).to_string(), next_depth);
                                queue.push_back((*succ).to_string());
                            }
                        }
                    }
                }
                depths.push(depth);
            }

            // First common descendant: reachable from every branch,
            // minimal worst-case depth, ties broken by node order.
            let mut convergence: Option<(usize, String)> = None;
            for node in nodes.iter() {
                if node.id == fork {
                    continue;
                }
                let mut worst = 0usize;
                if depths.iter().all(|d| {
                    d.get(&node.id)
                        .map(|depth| {
                            worst = worst.max(*depth);
                            true
                        })
                        .unwrap_or(false)
                }) {
                    match &convergence {
                        Some((best, _)) if *best <= worst => {}
                        _ => convergence = Some((worst, node.id.clone())),
                    }
                }
            }
            let Some((_, convergence)) = convergence else {
                continue;
            };

            // Retarget edges that reach the convergence point from inside
            // the conditional subgraph (the fork itself included).
            let mut colored: FxHashSet<&str> = FxHashSet::default();
            colored.insert(fork.as_str());
            for depth in &depths {
                colored.extend(depth.keys().map(String::as_str));
            }
            let join_id = format!("{}_conditional_join", fork);
            let mut rewired = false;
            for edge in edges.iter_mut() {
                if edge.target == convergence
                    && edge.source != join_id
                    && colored.contains(edge.source.as_str())
                {
                    edge.target = join_id.clone();
                    rewired = true;
                }
            }
            if rewired {
                let mut join = NodeDefinition::new(&join_id, kinds::CONDITIONAL_JOIN);
                join.original_id = Some(fork.clone());
                nodes.push(join);
                edges.push(EdgeDefinition::new(join_id, convergence));
            }
        }
    }

    // ------------------------------------------------------------------
    // Parallel containers
    // ------------------------------------------------------------------

    /// Name each unconditional (source, action) fan-out with an explicit
    /// parallel-container node so schedulers can inspect branch membership
    /// without walking the graph.
    fn insert_parallel_containers(
        &self,
        nodes: &mut Vec<NodeDefinition>,
        edges: &mut Vec<EdgeDefinition>,
    ) {
        let conditional_sources: FxHashSet<String> = edges
            .iter()
            .filter(|e| e.condition.is_some())
            .map(|e| e.source.clone())
            .collect();
        let uses_by_id: FxHashMap<String, String> = nodes
            .iter()
            .map(|n| (n.id.clone(), n.uses.clone()))
            .collect();

        // Group unconditional edges by (source, action), first-seen order.
        let mut group_order: Vec<(String, Option<String>)> = Vec::new();
        let mut groups: FxHashMap<(String, Option<String>), Vec<usize>> = FxHashMap::default();
        for (index, edge) in edges.iter().enumerate() {
            if edge.condition.is_some() {
                continue;
            }
            let key = (edge.source.clone(), edge.action.clone());
            let entry = groups.entry(key.clone()).or_default();
            if entry.is_empty() {
                group_order.push(key);
            }
            entry.push(index);
        }

        let mut to_remove: FxHashSet<usize> = FxHashSet::default();
        let mut new_nodes = Vec::new();
        let mut new_edges = Vec::new();
        for key in group_order {
            let indices = &groups[&key];
            if indices.len() < 2 {
                continue;
            }
            let (source, action) = &key;
            if conditional_sources.contains(source) {
                continue;
            }
            match uses_by_id.get(source).map(String::as_str) {
                Some(kinds::PARALLEL_CONTAINER) | Some(kinds::LOOP_CONTROLLER) => continue,
                _ => {}
            }

            let suffix = match action.as_deref() {
                Some(action) => format!("_{}_parallel_container", action),
                None => "_parallel_container".to_string(),
            };
            let container_id = format!("{}{}", source, suffix);
            let mut container = NodeDefinition::new(&container_id, kinds::PARALLEL_CONTAINER);
            container.original_id = Some(source.clone());
            new_nodes.push(container);

            let mut entry_edge = EdgeDefinition::new(source.clone(), &container_id);
            entry_edge.action = action.clone();
            new_edges.push(entry_edge);
            for &index in indices {
                to_remove.insert(index);
                new_edges.push(EdgeDefinition::new(
                    &container_id,
                    edges[index].target.clone(),
                ));
            }
        }

        if to_remove.is_empty() {
            return;
        }
        let mut index = 0;
        edges.retain(|_| {
            let keep = !to_remove.contains(&index);
            index += 1;
            keep
        });
        nodes.extend(new_nodes);
        edges.extend(new_edges);
    }

    // ------------------------------------------------------------------
    // Start selection
    // ------------------------------------------------------------------

    fn select_start(
        &self,
        graph: &WorkflowGraph,
        nodes: &mut Vec<NodeDefinition>,
        edges: &mut Vec<EdgeDefinition>,
    ) -> Result<String, BuilderError> {
        if nodes.is_empty() {
            return Err(BuilderError::NoStartNode(graph.id.clone()));
        }

        let mut in_degree: FxHashMap<&str, usize> = FxHashMap::default();
        for edge in edges.iter() {
            *in_degree.entry(edge.target.as_str()).or_insert(0) += 1;
        }
        // Fallback targets are entered by the resiliency envelope, never
        // by the scheduler; they are not roots.
        let fallback_targets: FxHashSet<&str> = nodes
            .iter()
            .filter_map(|n| n.config.as_ref().and_then(|c| c.fallback.as_deref()))
            .collect();

        let roots: Vec<String> = nodes
            .iter()
            .filter(|n| {
                !in_degree.contains_key(n.id.as_str())
                    && !fallback_targets.contains(n.id.as_str())
            })
            .map(|n| n.id.clone())
            .collect();

        match roots.len() {
            0 => Err(BuilderError::NoStartNode(graph.id.clone())),
            1 => Ok(roots.into_iter().next().expect("one root")),
            _ => {
                let mut container =
                    NodeDefinition::new(ROOT_PARALLEL_ID, kinds::PARALLEL_CONTAINER);
                container.original_id = Some(ROOT_PARALLEL_ID.to_string());
                nodes.push(container);
                for root in roots {
                    edges.push(EdgeDefinition::new(ROOT_PARALLEL_ID, root));
                }
                Ok(ROOT_PARALLEL_ID.to_string())
            }
        }
    }
}

// ----------------------------------------------------------------------
// Predecessor maps
// ----------------------------------------------------------------------

fn predecessor_counts(
    nodes: &[NodeDefinition],
    edges: &[EdgeDefinition],
) -> BTreeMap<String, usize> {
    let mut counts: BTreeMap<String, usize> = nodes
        .iter()
        .map(|n| (n.id.clone(), 0usize))
        .collect();
    for edge in edges {
        if let Some(count) = counts.get_mut(&edge.target) {
            *count += 1;
        }
    }
    counts
}

/// Logical producers per node: internal mappers/containers are traversed
/// through, except an output-mapper, which stands for its sub-workflow's
/// result and is recorded under the container id it carries as originalId.
fn original_predecessors(
    nodes: &[NodeDefinition],
    edges: &[EdgeDefinition],
) -> BTreeMap<String, Vec<String>> {
    let by_id: FxHashMap<&str, &NodeDefinition> =
        nodes.iter().map(|n| (n.id.as_str(), n)).collect();
    let mut reverse: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
    for edge in edges {
        reverse
            .entry(edge.target.as_str())
            .or_default()
            .push(edge.source.as_str());
    }

    let mut map = BTreeMap::new();
    for node in nodes {
        let mut producers: Vec<String> = Vec::new();
        let mut visited: FxHashSet<&str> = FxHashSet::default();
        let mut queue: std::collections::VecDeque<&str> = reverse
            .get(node.id.as_str())
            .map(|preds| preds.iter().copied().collect())
            .unwrap_or_default();

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            let Some(pred) = by_id.get(current) else {
                continue;
            };
            match pred.kind() {
                NodeKind::BuiltIn(BuiltInKind::OutputMapper) => {
                    let produced = pred
                        .original_id
                        .clone()
                        .unwrap_or_else(|| pred.id.clone());
                    if !producers.contains(&produced) {
                        producers.push(produced);
                    }
                }
                NodeKind::BuiltIn(kind) if kind.is_transparent() => {
                    if let Some(preds) = reverse.get(current) {
                        queue.extend(preds.iter().copied());
                    }
                }
                _ => {
                    let id = pred.id.clone();
                    if !producers.contains(&id) {
                        producers.push(id);
                    }
                }
            }
        }
        map.insert(node.id.clone(), producers);
    }
    map
}

fn sub_workflow_id(node: &NodeDefinition) -> Option<String> {
    let value = node
        .params
        .get("blueprintId")
        .or_else(|| node.params.get("workflowId"))?;
    match value {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Keep param/config references to sibling nodes valid after prefixing.
fn rewrite_local_refs(node: &mut NodeDefinition, local_ids: &FxHashSet<&str>, prefix: &str) {
    if prefix.is_empty() {
        return;
    }
    for value in node.params.values_mut() {
        if let Value::String(text) = value {
            if local_ids.contains(text.as_str()) {
                *text = format!("{}{}", prefix, text);
            } else if let Some(rest) = text.strip_prefix("webhook:") {
                if local_ids.contains(rest) {
                    *text = format!("webhook:{}{}", prefix, rest);
                }
            }
        }
    }
    if let Some(config) = &mut node.config {
        if let Some(fallback) = &mut config.fallback {
            if local_ids.contains(fallback.as_str()) {
                *fallback = format!("{}{}", prefix, fallback);
            }
        }
    }
}

fn adjacency_of(edges: &[EdgeDefinition]) -> FxHashMap<&str, Vec<&str>> {
    let mut adjacency: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
    for edge in edges {
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }
    adjacency
}
