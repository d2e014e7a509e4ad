//! End-to-end runtime scenarios: compile flow source, hydrate the
//! blueprint, execute it against step implementations, and observe the
//! context, events, and error surfaces.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use flowcraft::compiler::compile_project;
use flowcraft::graph::WorkflowBlueprint;
use flowcraft::runtime::{
    step_fn, BlueprintExecutor, CancelToken, ExecutionContext, ExecutorOptions, NodeResult,
    RecordingEventBus, RunStatus, SignalHub, UserRegistry, WorkflowError,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;

fn compile_flow(source: &str, flow: &str) -> WorkflowBlueprint {
    let dir = TempDir::new().unwrap();
    let entry = dir.path().join("index.ts");
    fs::write(&entry, source).unwrap();
    let output = compile_project(&[entry], None, None).unwrap();
    assert!(
        output.is_success(),
        "compile failed: {:?}",
        output.diagnostics.records()
    );
    output.blueprints[flow].clone()
}

/// Step registry that records invocation order.
fn tracing_registry(names: &[&str], log: Arc<Mutex<Vec<String>>>) -> UserRegistry {
    let mut registry = UserRegistry::new();
    for name in names {
        let log = Arc::clone(&log);
        let name = name.to_string();
        registry.insert(
            name.clone(),
            step_fn(move |args| {
                let log = Arc::clone(&log);
                let name = name.clone();
                async move {
                    log.lock().push(name.clone());
                    Ok(NodeResult::ok(json!({ "from": args.node_id })))
                }
            }),
        );
    }
    registry
}

#[tokio::test]
async fn linear_flow_runs_in_order() {
    let blueprint = compile_flow(
        r#"
/** @step */
export async function first(): Promise<void> { return f(); }
/** @step */
export async function second(): Promise<void> { return s(); }
/** @step */
export async function third(): Promise<void> { return t(); }

/** @flow */
export async function main() {
  await first();
  await second();
  await third();
}
"#,
        "main",
    );

    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = tracing_registry(&["first", "second", "third"], Arc::clone(&log));
    let report = BlueprintExecutor::new()
        .execute(&blueprint, &registry)
        .await
        .unwrap();

    assert_eq!(report.metadata.status, RunStatus::Completed);
    assert!(report.metadata.duration_ms < 10_000);
    assert_eq!(log.lock().as_slice(), &["first", "second", "third"]);
}

#[tokio::test]
async fn conditional_branch_takes_exactly_one_path() {
    let source = r#"
/** @step */
export async function fetchIt(): Promise<Out> { return f(); }
/** @step */
export async function onOk(): Promise<void> { return k(); }
/** @step */
export async function onFail(): Promise<void> { return j(); }
/** @step */
export async function finalize(): Promise<void> { return z(); }

/** @flow */
export async function main() {
  const x = await fetchIt();
  if (x.ok) {
    await onOk();
  } else {
    await onFail();
  }
  await finalize();
}
"#;
    let blueprint = compile_flow(source, "main");

    for ok in [true, false] {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = tracing_registry(&["onOk", "onFail", "finalize"], Arc::clone(&log));
        registry.insert(
            "fetchIt".into(),
            step_fn(move |_| async move { Ok(NodeResult::ok(json!({ "ok": ok }))) }),
        );

        BlueprintExecutor::new()
            .execute(&blueprint, &registry)
            .await
            .unwrap();

        let taken = log.lock().clone();
        if ok {
            assert_eq!(taken, vec!["onOk", "finalize"]);
        } else {
            assert_eq!(taken, vec!["onFail", "finalize"]);
        }
    }
}

#[tokio::test]
async fn while_loop_iterates_until_condition_clears() {
    let source = r#"
/** @step */
export async function tick(): Promise<void> { return t(); }
/** @step */
export async function done(): Promise<void> { return d(); }

/** @flow */
export async function main() {
  while (remaining > 0) {
    await tick();
  }
  await done();
}
"#;
    let blueprint = compile_flow(source, "main");

    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = tracing_registry(&["done"], Arc::clone(&log));

    // `tick` decrements the counter the loop condition reads
    struct Tick(Arc<Mutex<Vec<String>>>);
    #[async_trait::async_trait]
    impl flowcraft::runtime::NodeHandler for Tick {
        async fn run(
            &self,
            ctx: flowcraft::runtime::NodeCtx<'_>,
        ) -> anyhow::Result<NodeResult> {
            let remaining = ctx.context.get("remaining").and_then(Value::as_i64).unwrap_or(0);
            ctx.context.set("remaining", json!(remaining - 1));
            self.0.lock().push("tick".into());
            Ok(NodeResult::ok(Value::Null))
        }
    }
    registry.insert("tick".into(), Arc::new(Tick(Arc::clone(&log))));

    let context =
        ExecutionContext::with_inputs(vec![("remaining".to_string(), json!(3))]);
    let report = BlueprintExecutor::new()
        .execute_with(&blueprint, &registry, context, ExecutorOptions::default())
        .await
        .unwrap();

    assert_eq!(
        log.lock().as_slice(),
        &["tick", "tick", "tick", "done"]
    );
    assert_eq!(report.context.get("remaining"), Some(&json!(0)));
}

#[tokio::test]
async fn for_of_binds_each_item() {
    let source = r#"
/** @step */
export async function visit(item: Item): Promise<void> { return v(item); }

/** @flow */
export async function main() {
  for (const item of batch.items) {
    await visit(item);
  }
}
"#;
    let blueprint = compile_flow(source, "main");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut registry = UserRegistry::new();
    struct Visit(Arc<Mutex<Vec<Value>>>);
    #[async_trait::async_trait]
    impl flowcraft::runtime::NodeHandler for Visit {
        async fn run(
            &self,
            ctx: flowcraft::runtime::NodeCtx<'_>,
        ) -> anyhow::Result<NodeResult> {
            self.0
                .lock()
                .push(ctx.context.get("item").cloned().unwrap_or(Value::Null));
            Ok(NodeResult::ok(Value::Null))
        }
    }
    registry.insert("visit".into(), Arc::new(Visit(Arc::clone(&seen))));

    let context = ExecutionContext::with_inputs(vec![(
        "batch".to_string(),
        json!({"items": ["x", "y", "z"]}),
    )]);
    BlueprintExecutor::new()
        .execute_with(&blueprint, &registry, context, ExecutorOptions::default())
        .await
        .unwrap();

    assert_eq!(
        seen.lock().as_slice(),
        &[json!("x"), json!("y"), json!("z")]
    );
}

#[tokio::test]
async fn scatter_gather_aggregates_producer_outputs() {
    let source = r#"
/** @step */
export async function north(): Promise<Out> { return n(); }
/** @step */
export async function south(): Promise<Out> { return s(); }
/** @step */
export async function combine(): Promise<void> { return c(); }

/** @flow */
export async function main() {
  const [a, b] = await Promise.all([north(), south()]);
  await combine();
}
"#;
    let blueprint = compile_flow(source, "main");

    let combined = Arc::new(Mutex::new(None));
    let mut registry = UserRegistry::new();
    registry.insert(
        "north".into(),
        step_fn(|_| async { Ok(NodeResult::ok(json!("north-result"))) }),
    );
    registry.insert(
        "south".into(),
        step_fn(|_| async { Ok(NodeResult::ok(json!("south-result"))) }),
    );
    let sink = Arc::clone(&combined);
    registry.insert(
        "combine".into(),
        step_fn(move |args| {
            let sink = Arc::clone(&sink);
            async move {
                *sink.lock() = Some(args.input.clone());
                Ok(NodeResult::ok(Value::Null))
            }
        }),
    );

    BlueprintExecutor::new()
        .execute(&blueprint, &registry)
        .await
        .unwrap();

    assert_eq!(
        combined.lock().clone(),
        Some(json!({
            "north_parallel_1": "north-result",
            "south_parallel_1": "south-result",
        }))
    );
}

#[tokio::test]
async fn try_catch_falls_back_and_continues() {
    let source = r#"
/** @step */
export async function risky(): Promise<void> { return r(); }
/** @step */
export async function recover(): Promise<void> { return rec(); }
/** @step */
export async function after(): Promise<void> { return a(); }

/** @flow */
export async function main() {
  try {
    await risky();
  } catch {
    await recover();
  }
  await after();
}
"#;
    let blueprint = compile_flow(source, "main");

    let log = Arc::new(Mutex::new(Vec::new()));
    let mut registry = tracing_registry(&["recover", "after"], Arc::clone(&log));
    registry.insert(
        "risky".into(),
        step_fn(|_| async { anyhow::bail!("boom") }),
    );

    let bus = RecordingEventBus::new();
    let executor = BlueprintExecutor::new().with_event_bus(Arc::new(bus.clone()));
    let report = executor.execute(&blueprint, &registry).await.unwrap();

    assert_eq!(report.metadata.status, RunStatus::Completed);
    // the recovery implementation ran in place of risky, then the flow
    // continued along risky's outgoing edge; `after` ran exactly once
    assert_eq!(log.lock().as_slice(), &["recover", "after"]);
    assert_eq!(bus.count("node:fallback"), 1);
}

#[tokio::test]
async fn sleep_and_wait_suspend_the_flow() {
    let source = r#"
import { sleep, waitForEvent } from "flowcraft/durable";

/** @step */
export async function conclude(): Promise<void> { return c(); }

/** @flow */
export async function main() {
  await sleep(5);
  const payment = await waitForEvent("order.paid");
  await conclude();
}
"#;
    let blueprint = compile_flow(source, "main");

    let concluded = Arc::new(Mutex::new(None));
    let mut registry = UserRegistry::new();
    let sink = Arc::clone(&concluded);
    registry.insert(
        "conclude".into(),
        step_fn(move |args| {
            let sink = Arc::clone(&sink);
            async move {
                *sink.lock() = Some(args.input.clone());
                Ok(NodeResult::ok(Value::Null))
            }
        }),
    );

    let signals = SignalHub::new();
    let executor = BlueprintExecutor::new().with_signals(signals.clone());

    let deliver = tokio::spawn({
        let signals = signals.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            signals.deliver("order.paid", json!({"amount": 12}));
        }
    });

    let report = executor.execute(&blueprint, &registry).await.unwrap();
    deliver.await.unwrap();

    assert_eq!(report.metadata.status, RunStatus::Completed);
    // the wait node's delivered payload became conclude's input
    assert_eq!(concluded.lock().clone(), Some(json!({"amount": 12})));
}

#[tokio::test]
async fn webhook_request_resumes_on_delivery() {
    let source = r#"
import { createWebhook } from "flowcraft/durable";

/** @step */
export async function apply(): Promise<void> { return a(); }

/** @flow */
export async function main() {
  const hook = await createWebhook("/approvals");
  const decision = await hook.request;
  await apply();
}
"#;
    let blueprint = compile_flow(source, "main");

    let applied = Arc::new(Mutex::new(None));
    let mut registry = UserRegistry::new();
    let sink = Arc::clone(&applied);
    registry.insert(
        "apply".into(),
        step_fn(move |args| {
            let sink = Arc::clone(&sink);
            async move {
                *sink.lock() = Some(args.input.clone());
                Ok(NodeResult::ok(Value::Null))
            }
        }),
    );

    let signals = SignalHub::new();
    signals.deliver("webhook:webhook_1", json!({"approved": true}));
    let executor = BlueprintExecutor::new().with_signals(signals);
    executor.execute(&blueprint, &registry).await.unwrap();

    assert_eq!(applied.lock().clone(), Some(json!({"approved": true})));
}

#[tokio::test]
async fn subflow_body_runs_inline() {
    let source = r#"
/** @step */
export async function outer(): Promise<void> { return o(); }
/** @step */
export async function innerWork(): Promise<void> { return i(); }

/** @flow */
export async function child() {
  await innerWork();
}

/** @flow */
export async function main() {
  await outer();
  await child();
  await outer();
}
"#;
    let blueprint = compile_flow(source, "main");

    let log = Arc::new(Mutex::new(Vec::new()));
    let registry = tracing_registry(&["outer", "innerWork"], Arc::clone(&log));
    let report = BlueprintExecutor::new()
        .execute(&blueprint, &registry)
        .await
        .unwrap();

    assert_eq!(report.metadata.status, RunStatus::Completed);
    assert_eq!(log.lock().as_slice(), &["outer", "innerWork", "outer"]);
}

#[tokio::test]
async fn failure_report_carries_ids_and_cause() {
    let source = r#"
/** @step */
export async function fragile(): Promise<void> { return f(); }

/** @flow */
export async function main() {
  await fragile();
}
"#;
    let blueprint = compile_flow(source, "main");

    let mut registry = UserRegistry::new();
    registry.insert(
        "fragile".into(),
        step_fn(|_| async { anyhow::bail!("database unreachable") }),
    );

    let error = BlueprintExecutor::new()
        .execute(&blueprint, &registry)
        .await
        .unwrap_err();
    match error {
        WorkflowError::Failed { error, report } => {
            assert_eq!(error.node_id, "fragile_1");
            assert_eq!(error.blueprint_id, "main");
            assert!(error.cause.to_string().contains("database unreachable"));
            assert_eq!(report.metadata.status, RunStatus::Failed);
        }
        other => panic!("expected Failed, got {:?}", other),
    }
}

#[tokio::test]
async fn cancellation_wins_over_waiting_nodes() {
    let source = r#"
import { waitForEvent } from "flowcraft/durable";

/** @flow */
export async function main() {
  await waitForEvent("never.fires");
}
"#;
    let blueprint = compile_flow(source, "main");

    let cancel = CancelToken::new();
    let options = ExecutorOptions {
        cancel: cancel.clone(),
        ..ExecutorOptions::default()
    };
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
    });

    let error = BlueprintExecutor::new()
        .execute_with(
            &blueprint,
            &UserRegistry::new(),
            ExecutionContext::new(),
            options,
        )
        .await
        .unwrap_err();
    assert!(matches!(error, WorkflowError::Aborted { .. }));
}

#[tokio::test]
async fn lifecycle_events_bracket_the_run() {
    let source = r#"
/** @step */
export async function only(): Promise<void> { return o(); }

/** @flow */
export async function main() {
  await only();
}
"#;
    let blueprint = compile_flow(source, "main");
    let registry = tracing_registry(&["only"], Arc::new(Mutex::new(Vec::new())));

    let bus = RecordingEventBus::new();
    let executor = BlueprintExecutor::new().with_event_bus(Arc::new(bus.clone()));
    let report = executor.execute(&blueprint, &registry).await.unwrap();

    let names = bus.names();
    assert_eq!(names.first().map(String::as_str), Some("workflow:start"));
    assert_eq!(names.last().map(String::as_str), Some("workflow:finish"));
    assert!(names.contains(&"node:start".to_string()));
    assert!(names.contains(&"node:finish".to_string()));

    // every payload is keyed on the execution id
    let execution_id = report.metadata.execution_id.clone();
    assert_eq!(bus.for_execution(&execution_id).len(), names.len());
}
