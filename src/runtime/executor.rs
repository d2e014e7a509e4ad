//! Blueprint executor: hydrates a blueprint and schedules it to completion.
//!
//! Scheduling is a single-threaded cooperative loop: one node runs at a
//! time, runnability is decided per arrival (which is what lets loop
//! back-edges re-trigger their controller), and every node execution runs
//! under its resiliency envelope (retries, per-attempt timeout, fallback).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, instrument, warn};

use crate::graph::{kinds, JoinStrategy, NodeDefinition, WorkflowBlueprint};

use super::builtins::built_in_registry;
use super::condition;
use super::context::{ExecutionContext, ExecutionMetadata};
use super::events::{names, EventBus, Logger};
use super::node::{Dependencies, NodeCtx, NodeResult, UserRegistry};
use super::signals::SignalHub;

static EXECUTION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Cooperative cancellation. Cloneable; `cancel` wakes every waiter.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.inner.notify.notified().await;
        }
    }
}

/// Per-execution options.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub execution_id: Option<String>,
    pub environment: String,
    pub cancel: CancelToken,
    /// Backstop against runaway loops: total node executions allowed.
    pub max_node_visits: usize,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            execution_id: None,
            environment: "local".to_string(),
            cancel: CancelToken::new(),
            max_node_visits: 100_000,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Failed,
}

/// Final execution facts returned to the caller.
#[derive(Debug, Clone)]
pub struct RunMetadata {
    pub status: RunStatus,
    pub execution_id: String,
    pub blueprint_id: String,
    /// Milliseconds since the Unix epoch.
    pub started_at: u64,
    pub completed_at: u64,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Context plus metadata, returned on every termination path.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub context: ExecutionContext,
    pub metadata: RunMetadata,
}

/// A node failure that exhausted its retries and fallbacks.
#[derive(Debug, Error)]
#[error("node '{node_id}' in workflow '{blueprint_id}' failed (execution {execution_id})")]
pub struct NodeExecutionError {
    pub node_id: String,
    pub blueprint_id: String,
    pub execution_id: String,
    #[source]
    pub cause: anyhow::Error,
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("unknown node implementation '{uses}' for node '{node_id}'")]
    UnknownNodeKind { node_id: String, uses: String },

    #[error("{error}")]
    Failed {
        #[source]
        error: NodeExecutionError,
        report: Box<ExecutionReport>,
    },

    #[error("workflow '{blueprint_id}' aborted (execution {execution_id})")]
    Aborted {
        blueprint_id: String,
        execution_id: String,
        report: Box<ExecutionReport>,
    },

    #[error("workflow '{blueprint_id}' exceeded the node visit budget of {budget}")]
    VisitBudgetExceeded {
        blueprint_id: String,
        budget: usize,
        report: Box<ExecutionReport>,
    },
}

impl WorkflowError {
    /// The failure-side report, when one exists.
    pub fn report(&self) -> Option<&ExecutionReport> {
        match self {
            Self::UnknownNodeKind { .. } => None,
            Self::Failed { report, .. }
            | Self::Aborted { report, .. }
            | Self::VisitBudgetExceeded { report, .. } => Some(report),
        }
    }
}

/// Hydrated view of one blueprint node.
struct Hydrated<'b> {
    node: &'b NodeDefinition,
    handler: Arc<dyn super::node::NodeHandler>,
    join: JoinStrategy,
    predecessors: usize,
    max_retries: u32,
    retry_delay: Duration,
    timeout: Option<Duration>,
    fallback: Option<String>,
    /// For parallel containers: branch heads, for scheduler inspection.
    nodes_to_run: Vec<String>,
}

enum AttemptFailure {
    Aborted,
    Failed(anyhow::Error),
}

/// Executes blueprints against a node-implementation registry.
pub struct BlueprintExecutor {
    deps: Dependencies,
    builtins: UserRegistry,
}

impl Default for BlueprintExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl BlueprintExecutor {
    pub fn new() -> Self {
        Self {
            deps: Dependencies::default(),
            builtins: built_in_registry(),
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.deps.event_bus = event_bus;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.deps.logger = logger;
        self
    }

    pub fn with_signals(mut self, signals: SignalHub) -> Self {
        self.deps.signals = signals;
        self
    }

    /// Handle hosts use to deliver wait/webhook events.
    pub fn signals(&self) -> SignalHub {
        self.deps.signals.clone()
    }

    pub async fn execute(
        &self,
        blueprint: &WorkflowBlueprint,
        registry: &UserRegistry,
    ) -> Result<ExecutionReport, WorkflowError> {
        self.execute_with(
            blueprint,
            registry,
            ExecutionContext::new(),
            ExecutorOptions::default(),
        )
        .await
    }

    #[instrument(skip_all, fields(blueprint = %blueprint.id))]
    pub async fn execute_with(
        &self,
        blueprint: &WorkflowBlueprint,
        registry: &UserRegistry,
        context: ExecutionContext,
        options: ExecutorOptions,
    ) -> Result<ExecutionReport, WorkflowError> {
        let hydrated = self.hydrate(blueprint, registry)?;

        let started = Instant::now();
        let started_at = unix_millis();
        let execution_id = options.execution_id.clone().unwrap_or_else(|| {
            format!(
                "exec-{}-{}",
                started_at,
                EXECUTION_SEQ.fetch_add(1, Ordering::SeqCst)
            )
        });
        let mut metadata = ExecutionMetadata {
            execution_id: execution_id.clone(),
            blueprint_id: blueprint.id.clone(),
            current_node_id: blueprint.start_node_id.clone(),
            started_at,
            environment: options.environment.clone(),
        };

        self.emit(
            names::WORKFLOW_START,
            json!({"executionId": execution_id, "blueprintId": blueprint.id}),
        )
        .await;

        let mut context = context;
        let mut outputs: FxHashMap<String, Value> = FxHashMap::default();
        let mut arrivals: FxHashMap<String, usize> = FxHashMap::default();
        let mut queue: VecDeque<(String, Value)> = VecDeque::new();
        queue.push_back((blueprint.start_node_id.clone(), Value::Null));

        let mut visits = 0usize;
        let mut failure: Option<WorkflowFailure> = None;

        while let Some((node_id, carried)) = queue.pop_front() {
            if options.cancel.is_cancelled() {
                failure = Some(WorkflowFailure::Aborted);
                break;
            }

            let Some(hydrated_node) = hydrated.get(node_id.as_str()) else {
                continue; // dangling edge; the builder never produces one
            };

            // Join gating: `all` waits for every predecessor, then resets
            // so a later wave can run the node again; `any` runs per
            // arrival (conditional branches are exclusive at run time).
            if hydrated_node.join == JoinStrategy::All && hydrated_node.predecessors > 1 {
                let count = arrivals.entry(node_id.clone()).or_insert(0);
                *count += 1;
                if *count < hydrated_node.predecessors {
                    continue;
                }
                *count = 0;
            }

            visits += 1;
            if visits > options.max_node_visits {
                failure = Some(WorkflowFailure::VisitBudget);
                break;
            }

            let input = if hydrated_node.join == JoinStrategy::All
                && hydrated_node.predecessors > 1
            {
                aggregate_input(blueprint, &node_id, &outputs)
            } else {
                carried
            };

            metadata.current_node_id = node_id.clone();
            let mut start_payload = json!({
                "executionId": metadata.execution_id,
                "nodeId": node_id,
                "uses": hydrated_node.node.uses,
            });
            if !hydrated_node.nodes_to_run.is_empty() {
                start_payload["nodesToRun"] = json!(hydrated_node.nodes_to_run);
            }
            self.emit(names::NODE_START, start_payload).await;

            match self
                .run_with_resilience(&hydrated, &node_id, input, &mut context, &metadata, &options)
                .await
            {
                Ok(result) => {
                    self.emit(
                        names::NODE_FINISH,
                        json!({
                            "executionId": metadata.execution_id,
                            "nodeId": node_id,
                            "action": result.action,
                            "output": result.output,
                        }),
                    )
                    .await;
                    outputs.insert(node_id.clone(), result.output.clone());

                    for target in
                        select_successors(blueprint, hydrated_node, &node_id, &result, &context)
                    {
                        queue.push_back((target, result.output.clone()));
                    }
                }
                Err(AttemptFailure::Aborted) => {
                    failure = Some(WorkflowFailure::Aborted);
                    break;
                }
                Err(AttemptFailure::Failed(cause)) => {
                    failure = Some(WorkflowFailure::Node(NodeExecutionError {
                        node_id: node_id.clone(),
                        blueprint_id: blueprint.id.clone(),
                        execution_id: metadata.execution_id.clone(),
                        cause,
                    }));
                    break;
                }
            }
        }

        let completed_at = unix_millis();
        let duration_ms = started.elapsed().as_millis() as u64;
        let (status, error_text) = match &failure {
            None => (RunStatus::Completed, None),
            Some(WorkflowFailure::Aborted) => (RunStatus::Failed, Some("aborted".to_string())),
            Some(WorkflowFailure::VisitBudget) => (
                RunStatus::Failed,
                Some(format!(
                    "node visit budget of {} exceeded",
                    options.max_node_visits
                )),
            ),
            Some(WorkflowFailure::Node(error)) => (RunStatus::Failed, Some(error.to_string())),
        };

        self.emit(
            names::WORKFLOW_FINISH,
            json!({
                "executionId": metadata.execution_id,
                "blueprintId": blueprint.id,
                "status": match status {
                    RunStatus::Completed => "completed",
                    RunStatus::Failed => "failed",
                },
                "durationMs": duration_ms,
            }),
        )
        .await;

        let report = ExecutionReport {
            context,
            metadata: RunMetadata {
                status,
                execution_id: metadata.execution_id.clone(),
                blueprint_id: blueprint.id.clone(),
                started_at,
                completed_at,
                duration_ms,
                error: error_text,
            },
        };

        match failure {
            None => Ok(report),
            Some(WorkflowFailure::Node(error)) => Err(WorkflowError::Failed {
                error,
                report: Box::new(report),
            }),
            Some(WorkflowFailure::Aborted) => Err(WorkflowError::Aborted {
                blueprint_id: blueprint.id.clone(),
                execution_id: metadata.execution_id,
                report: Box::new(report),
            }),
            Some(WorkflowFailure::VisitBudget) => Err(WorkflowError::VisitBudgetExceeded {
                blueprint_id: blueprint.id.clone(),
                budget: options.max_node_visits,
                report: Box::new(report),
            }),
        }
    }

    fn hydrate<'b>(
        &self,
        blueprint: &'b WorkflowBlueprint,
        registry: &UserRegistry,
    ) -> Result<FxHashMap<&'b str, Hydrated<'b>>, WorkflowError> {
        let mut hydrated = FxHashMap::default();
        for node in &blueprint.nodes {
            let handler = registry
                .get(&node.uses)
                .or_else(|| self.builtins.get(&node.uses))
                .cloned()
                .ok_or_else(|| WorkflowError::UnknownNodeKind {
                    node_id: node.id.clone(),
                    uses: node.uses.clone(),
                })?;

            let config = node.config.as_ref();
            let nodes_to_run = if node.uses == kinds::PARALLEL_CONTAINER {
                blueprint
                    .outgoing(&node.id)
                    .map(|e| e.target.clone())
                    .collect()
            } else {
                Vec::new()
            };

            hydrated.insert(
                node.id.as_str(),
                Hydrated {
                    node,
                    handler,
                    join: node.join_strategy(),
                    predecessors: blueprint
                        .predecessor_count_map
                        .get(&node.id)
                        .copied()
                        .unwrap_or(0),
                    max_retries: config.and_then(|c| c.max_retries).unwrap_or(1).max(1),
                    retry_delay: Duration::from_millis(
                        config.and_then(|c| c.retry_delay).unwrap_or(0),
                    ),
                    timeout: config.and_then(|c| c.timeout).map(Duration::from_millis),
                    fallback: config.and_then(|c| c.fallback.clone()),
                    nodes_to_run,
                },
            );
        }
        Ok(hydrated)
    }

    /// Run a node under its envelope; if every retry fails and a fallback
    /// is configured, re-run using the fallback implementation and return
    /// its result in place.
    async fn run_with_resilience(
        &self,
        hydrated: &FxHashMap<&str, Hydrated<'_>>,
        node_id: &str,
        input: Value,
        context: &mut ExecutionContext,
        metadata: &ExecutionMetadata,
        options: &ExecutorOptions,
    ) -> Result<NodeResult, AttemptFailure> {
        let mut current = node_id.to_string();
        let mut visited: FxHashSet<String> = FxHashSet::default();
        visited.insert(current.clone());

        loop {
            let target = hydrated
                .get(current.as_str())
                .expect("resilience chain stays within the blueprint");
            match self
                .run_attempts(target, input.clone(), context, metadata, options)
                .await
            {
                Ok(result) => return Ok(result),
                Err(AttemptFailure::Aborted) => return Err(AttemptFailure::Aborted),
                Err(AttemptFailure::Failed(cause)) => {
                    let next = target.fallback.clone().filter(|fallback| {
                        hydrated.contains_key(fallback.as_str())
                            && !visited.contains(fallback.as_str())
                    });
                    match next {
                        Some(fallback) => {
                            self.emit(
                                names::NODE_FALLBACK,
                                json!({
                                    "executionId": metadata.execution_id,
                                    "nodeId": current,
                                    "fallbackId": fallback,
                                }),
                            )
                            .await;
                            visited.insert(fallback.clone());
                            current = fallback;
                        }
                        None => {
                            self.emit(
                                names::NODE_ERROR,
                                json!({
                                    "executionId": metadata.execution_id,
                                    "nodeId": current,
                                    "error": cause.to_string(),
                                }),
                            )
                            .await;
                            return Err(AttemptFailure::Failed(cause));
                        }
                    }
                }
            }
        }
    }

    async fn run_attempts(
        &self,
        hydrated: &Hydrated<'_>,
        input: Value,
        context: &mut ExecutionContext,
        metadata: &ExecutionMetadata,
        options: &ExecutorOptions,
    ) -> Result<NodeResult, AttemptFailure> {
        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 1..=hydrated.max_retries {
            if options.cancel.is_cancelled() {
                return Err(AttemptFailure::Aborted);
            }

            let outcome = {
                let run = hydrated.handler.run(NodeCtx {
                    context,
                    input: input.clone(),
                    node: hydrated.node,
                    deps: &self.deps,
                    metadata,
                });
                let bounded = async {
                    match hydrated.timeout {
                        Some(limit) => match tokio::time::timeout(limit, run).await {
                            Ok(result) => result,
                            Err(_) => Err(anyhow::anyhow!(
                                "attempt timed out after {}ms",
                                limit.as_millis()
                            )),
                        },
                        None => run.await,
                    }
                };
                tokio::select! {
                    biased;
                    _ = options.cancel.cancelled() => return Err(AttemptFailure::Aborted),
                    outcome = bounded => outcome,
                }
            };

            match outcome {
                Ok(result) => return Ok(result),
                Err(error) => {
                    debug!(node = %hydrated.node.id, attempt, %error, "node attempt failed");
                    last_error = Some(error);
                    if attempt < hydrated.max_retries {
                        self.emit(
                            names::NODE_RETRY,
                            json!({
                                "executionId": metadata.execution_id,
                                "nodeId": hydrated.node.id,
                                "attempt": attempt,
                            }),
                        )
                        .await;
                        if !hydrated.retry_delay.is_zero() {
                            tokio::time::sleep(hydrated.retry_delay).await;
                        }
                    }
                }
            }
        }

        Err(AttemptFailure::Failed(last_error.unwrap_or_else(|| {
            anyhow::anyhow!("node failed with no recorded error")
        })))
    }

    async fn emit(&self, event: &str, payload: Value) {
        self.deps.event_bus.emit(event, payload).await;
    }
}

enum WorkflowFailure {
    Node(NodeExecutionError),
    Aborted,
    VisitBudget,
}

/// For a multi-predecessor all-join, the input is an object keyed by
/// logical producer id.
fn aggregate_input(
    blueprint: &WorkflowBlueprint,
    node_id: &str,
    outputs: &FxHashMap<String, Value>,
) -> Value {
    let mut aggregated = Map::new();
    if let Some(producers) = blueprint.original_predecessor_id_map.get(node_id) {
        for producer in producers {
            aggregated.insert(
                producer.clone(),
                outputs.get(producer).cloned().unwrap_or(Value::Null),
            );
        }
    }
    Value::Object(aggregated)
}

/// Decide which successors receive the node's output.
fn select_successors(
    blueprint: &WorkflowBlueprint,
    hydrated: &Hydrated<'_>,
    node_id: &str,
    result: &NodeResult,
    context: &ExecutionContext,
) -> Vec<String> {
    // Parallel containers fan out to every branch unconditionally.
    if hydrated.node.uses == kinds::PARALLEL_CONTAINER {
        return blueprint.outgoing(node_id).map(|e| e.target.clone()).collect();
    }

    if let Some(action) = &result.action {
        return blueprint
            .outgoing(node_id)
            .filter(|e| e.action.as_deref() == Some(action.as_str()))
            .map(|e| e.target.clone())
            .collect();
    }

    let mut selected = Vec::new();
    for edge in blueprint.outgoing(node_id) {
        if edge.action.is_some() {
            continue;
        }
        match &edge.condition {
            None => selected.push(edge.target.clone()),
            Some(text) => match condition::evaluate(text, context, &result.output) {
                Ok(true) => selected.push(edge.target.clone()),
                Ok(false) => {}
                Err(error) => {
                    warn!(%error, source = %node_id, "condition evaluation failed; edge skipped");
                }
            },
        }
    }
    selected
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
