//! End-to-end compiler scenarios: source text in, blueprints out.
//!
//! These mirror the lowering shapes the compiler guarantees: linear
//! chains, conditional joins, loops with break, scatter-gather, fallback
//! scopes, and sub-workflow inlining.

use std::fs;
use std::path::PathBuf;

use flowcraft::compiler::{compile_project, CompileOutput};
use flowcraft::graph::{EdgeDefinition, JoinStrategy, WorkflowBlueprint};
use tempfile::TempDir;

fn project(files: &[(&str, &str)]) -> (TempDir, Vec<PathBuf>) {
    let dir = TempDir::new().unwrap();
    let mut entries = Vec::new();
    for (name, contents) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        if *name == "index.ts" {
            entries.push(path);
        }
    }
    (dir, entries)
}

fn compile(files: &[(&str, &str)]) -> CompileOutput {
    let (_dir, entries) = project(files);
    let output = compile_project(&entries, None, None).unwrap();
    // keep the TempDir alive long enough for analysis to have read it
    drop(_dir);
    output
}

fn edge<'a>(blueprint: &'a WorkflowBlueprint, source: &str, target: &str) -> &'a EdgeDefinition {
    blueprint
        .edges
        .iter()
        .find(|e| e.source == source && e.target == target)
        .unwrap_or_else(|| {
            panic!(
                "missing edge {} -> {}; have {:?}",
                source,
                target,
                blueprint
                    .edges
                    .iter()
                    .map(|e| format!("{}->{}", e.source, e.target))
                    .collect::<Vec<_>>()
            )
        })
}

fn in_degree(blueprint: &WorkflowBlueprint, id: &str) -> usize {
    blueprint.incoming(id).count()
}

const STEPS: &str = r#"
/** @step */
export async function stepA(): Promise<Out> { return a(); }
/** @step */
export async function stepB(): Promise<Out> { return b(); }
/** @step */
export async function stepC(): Promise<Out> { return c(); }
"#;

#[test]
fn scenario_linear_three_step_flow() {
    let source = format!(
        "{}\n/** @flow */\nexport async function main() {{ await stepA(); await stepB(); await stepC(); }}",
        STEPS
    );
    let output = compile(&[("index.ts", &source)]);
    assert!(output.is_success(), "{:?}", output.diagnostics.records());

    let blueprint = &output.blueprints["main"];
    let ids: Vec<&str> = blueprint.nodes.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, vec!["stepA_1", "stepB_1", "stepC_1"]);
    edge(blueprint, "stepA_1", "stepB_1");
    edge(blueprint, "stepB_1", "stepC_1");
    assert_eq!(blueprint.start_node_id, "stepA_1");
    assert_eq!(
        output.registry.keys().collect::<Vec<_>>(),
        vec!["stepA", "stepB", "stepC"]
    );
}

#[test]
fn scenario_if_else_over_a_boolean() {
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
    let output = compile(&[("index.ts", source)]);
    assert!(output.is_success());
    let blueprint = &output.blueprints["main"];

    assert_eq!(
        edge(blueprint, "fetchIt_1", "onOk_1").condition.as_deref(),
        Some("x.ok")
    );
    assert_eq!(
        edge(blueprint, "fetchIt_1", "onFail_1").condition.as_deref(),
        Some("!(x.ok)")
    );
    let finalize = blueprint.node("finalize_1").unwrap();
    assert_eq!(finalize.join_strategy(), JoinStrategy::Any);
    assert_eq!(in_degree(blueprint, "finalize_1"), 2);
}

#[test]
fn scenario_while_loop_with_break() {
    let source = r#"
/** @step */
export async function next(): Promise<Item> { return n(); }
/** @step */
export async function handle(y: Item): Promise<void> { return h(y); }
/** @step */
export async function done(): Promise<void> { return d(); }

/** @flow */
export async function main() {
  while (cond) {
    const y = await next();
    if (y.done) break;
    await handle(y);
  }
  await done();
}
"#;
    let output = compile(&[("index.ts", source)]);
    assert!(output.is_success());
    let blueprint = &output.blueprints["main"];

    let controller = blueprint.node("loop-controller_1").unwrap();
    assert_eq!(controller.param_str("condition"), Some("cond"));

    assert_eq!(
        edge(blueprint, "loop-controller_1", "next_1").action.as_deref(),
        Some("continue")
    );
    edge(blueprint, "next_1", "join_1");
    edge(blueprint, "join_1", "done_1");
    assert_eq!(
        edge(blueprint, "loop-controller_1", "done_1").action.as_deref(),
        Some("break")
    );
    assert_eq!(in_degree(blueprint, "done_1"), 2);
    assert_eq!(
        blueprint.node("done_1").unwrap().join_strategy(),
        JoinStrategy::Any
    );
}

#[test]
fn scenario_scatter_gather() {
    let source = r#"
/** @step */
export async function stepA(): Promise<A> { return a(); }
/** @step */
export async function stepB(): Promise<B> { return b(); }
/** @step */
export async function combine(a: A, b: B): Promise<void> { return c(a, b); }

/** @flow */
export async function main() {
  const [a, b] = await Promise.all([stepA(), stepB()]);
  await combine(a, b);
}
"#;
    let output = compile(&[("index.ts", source)]);
    assert!(output.is_success());
    let blueprint = &output.blueprints["main"];

    edge(blueprint, "stepA_parallel_1", "combine_1");
    edge(blueprint, "stepB_parallel_1", "combine_1");
    let combine = blueprint.node("combine_1").unwrap();
    assert_eq!(combine.join_strategy(), JoinStrategy::All);
    assert_eq!(in_degree(blueprint, "combine_1"), 2);

    // two roots: a synthetic parallel start fans out to both branches
    assert_eq!(blueprint.start_node_id, "__root_parallel_start");
    edge(blueprint, "__root_parallel_start", "stepA_parallel_1");
    edge(blueprint, "__root_parallel_start", "stepB_parallel_1");
}

#[test]
fn scenario_try_catch_with_fallback() {
    let source = r#"
/** @step */
export async function risky(): Promise<void> { return r(); }
/** @step */
export async function alsoRisky(): Promise<void> { return ar(); }
/** @step */
export async function recover(): Promise<void> { return rec(); }
/** @step */
export async function after(): Promise<void> { return af(); }

/** @flow */
export async function main() {
  try {
    await risky();
    await alsoRisky();
  } catch {
    await recover();
  }
  await after();
}
"#;
    let output = compile(&[("index.ts", source)]);
    assert!(output.is_success());
    let blueprint = &output.blueprints["main"];

    for id in ["risky_1", "alsoRisky_1"] {
        let node = blueprint.node(id).unwrap();
        assert_eq!(
            node.config.as_ref().unwrap().fallback.as_deref(),
            Some("recover_1"),
            "{} should fall back to recover_1",
            id
        );
    }
    edge(blueprint, "risky_1", "alsoRisky_1");
    assert!(blueprint.node("recover_1").is_some());
    edge(blueprint, "alsoRisky_1", "after_1");
    edge(blueprint, "recover_1", "after_1");
    assert_eq!(
        blueprint.node("after_1").unwrap().join_strategy(),
        JoinStrategy::Any
    );
    // the fallback entry is not a schedulable root
    assert_eq!(blueprint.start_node_id, "risky_1");
}

#[test]
fn scenario_subflow_inlining() {
    let source = r#"
/** @step */
export async function produce(): Promise<Out> { return p(); }
/** @step */
export async function inner(): Promise<Out> { return i(); }
/** @step */
export async function consume(): Promise<void> { return c(); }

/** @flow */
export async function child() {
  await inner();
}

/** @flow */
export async function main() {
  await produce();
  await child();
  await consume();
}
"#;
    let output = compile(&[("index.ts", source)]);
    assert!(output.is_success(), "{:?}", output.diagnostics.records());
    let blueprint = &output.blueprints["main"];

    let ids: Vec<&str> = blueprint.nodes.iter().map(|n| n.id.as_str()).collect();
    assert!(ids.contains(&"child_1"));
    assert!(ids.contains(&"child_1_input_mapper"));
    assert!(ids.contains(&"child_1_output_mapper"));
    assert!(ids.contains(&"child_1:inner_1"));

    // consumer's logical producer is the sub-workflow container
    assert_eq!(
        blueprint.original_predecessor_id_map["consume_1"],
        vec!["child_1"]
    );
    // the first child node's producer is the parent producer of the subflow
    assert_eq!(
        blueprint.original_predecessor_id_map["child_1:inner_1"],
        vec!["produce_1"]
    );
}

#[test]
fn empty_flow_produces_a_lone_start_node() {
    let output = compile(&[(
        "index.ts",
        "/** @flow */\nexport async function main() { }",
    )]);
    assert!(output.is_success());
    let blueprint = &output.blueprints["main"];
    assert_eq!(blueprint.nodes.len(), 1);
    assert_eq!(blueprint.nodes[0].uses, "start");
    assert!(blueprint.edges.is_empty());
}

#[test]
fn unique_ids_and_reachability_hold_for_every_blueprint() {
    let source = r#"
/** @step */
export async function one(): Promise<Out> { return o(); }
/** @step */
export async function two(): Promise<Out> { return t(); }

/** @flow */
export async function looped() {
  for (const item of batch.items) {
    await one();
  }
  await two();
}

/** @flow */
export async function branched() {
  const x = await one();
  if (x.ok) { await two(); }
  await one();
}
"#;
    let output = compile(&[("index.ts", source)]);
    assert!(output.is_success(), "{:?}", output.diagnostics.records());
    for blueprint in output.blueprints.values() {
        let violations = blueprint.verify();
        assert!(violations.is_empty(), "{}: {:?}", blueprint.id, violations);
    }
}

#[test]
fn blueprints_round_trip_through_json() {
    let source = format!(
        "{}\n/** @flow */\nexport async function main() {{ const x = await stepA(); if (x.ok) {{ await stepB(); }} await stepC(); }}",
        STEPS
    );
    let output = compile(&[("index.ts", &source)]);
    let blueprint = &output.blueprints["main"];
    let text = serde_json::to_string(blueprint).unwrap();
    let back: WorkflowBlueprint = serde_json::from_str(&text).unwrap();
    assert_eq!(&back, blueprint);
}

#[test]
fn recompiling_is_deterministic() {
    let files = [(
        "index.ts",
        r#"
/** @step */
export async function alpha(): Promise<Out> { return a(); }
/** @step */
export async function beta(): Promise<Out> { return b(); }

/** @flow */
export async function main() {
  const [x, y] = await Promise.all([alpha(), beta()]);
  while (x.more) {
    await alpha();
  }
}
"#,
    )];
    let (_dir, entries) = project(&files);
    let first = compile_project(&entries, None, None).unwrap();
    let second = compile_project(&entries, None, None).unwrap();
    assert_eq!(first.blueprints, second.blueprints);
    assert_eq!(first.manifest_source, second.manifest_source);
}

#[test]
fn finally_and_stray_break_are_error_diagnostics() {
    let source = r#"
/** @step */
export async function a(): Promise<void> { return x(); }

/** @flow */
export async function withFinally() {
  try { await a(); } catch { } finally { await a(); }
}

/** @flow */
export async function strayBreak() {
  break;
}
"#;
    let output = compile(&[("index.ts", source)]);
    assert!(!output.is_success());
    let messages: Vec<&str> = output
        .diagnostics
        .records()
        .iter()
        .map(|d| d.message.as_str())
        .collect();
    assert!(messages.iter().any(|m| m.contains("finally")));
    assert!(messages.iter().any(|m| m.contains("'break' outside")));
    // partial graphs are still produced for tooling
    assert_eq!(output.blueprints.len(), 2);
}

#[test]
fn durable_primitives_compile_into_durable_nodes() {
    let source = r#"
import { sleep, waitForEvent, createWebhook } from "flowcraft/durable";

/** @flow */
export async function main() {
  await sleep(250);
  await waitForEvent("order.paid");
  const hook = await createWebhook("/approve");
  const decision = await hook.request;
}
"#;
    let output = compile(&[("index.ts", source)]);
    assert!(output.is_success(), "{:?}", output.diagnostics.records());
    let blueprint = &output.blueprints["main"];
    let uses: Vec<&str> = blueprint.nodes.iter().map(|n| n.uses.as_str()).collect();
    assert_eq!(uses, vec!["sleep", "wait", "webhook", "wait"]);
    assert_eq!(
        blueprint.node("wait_2").unwrap().param_str("event"),
        Some("webhook:webhook_1")
    );
}

#[test]
fn manifest_source_lists_every_step_once() {
    let source = format!(
        "{}\n/** @flow */\nexport async function main() {{ await stepA(); await stepA(); await stepB(); }}",
        STEPS
    );
    let output = compile(&[("index.ts", &source)]);
    let manifest = &output.manifest_source;
    assert_eq!(manifest.matches("import { stepA }").count(), 1);
    assert_eq!(manifest.matches("import { stepB }").count(), 1);
    assert!(!manifest.contains("import { stepC }")); // unused step
    assert!(manifest.contains("export const registry"));
}
