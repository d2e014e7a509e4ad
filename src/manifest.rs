//! Manifest emitter.
//!
//! The manifest is a source-dialect module that, when loaded by the
//! runtime host, exposes `registry` (step name -> imported implementation)
//! and `blueprints` (flow id -> blueprint literal). Blueprint values are
//! serialized through JSON so the artifact round-trips into identical
//! structures.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use rustc_hash::FxHashSet;

use crate::analyzer::Registry;
use crate::graph::WorkflowBlueprint;

/// Render the manifest module.
///
/// `manifest_dir` is where the artifact will live; step import paths are
/// rewritten relative to it when possible so the emitted module resolves
/// from its own location.
pub fn emit_manifest(
    blueprints: &BTreeMap<String, WorkflowBlueprint>,
    registry: &Registry,
    manifest_dir: Option<&Path>,
) -> String {
    let mut out = String::new();
    out.push_str("// Generated by flowcraft. Do not edit.\n");

    // Imports, one line per step, aliased when export names collide.
    let mut used_names: FxHashSet<String> = FxHashSet::default();
    let mut bindings: Vec<(String, String)> = Vec::new(); // (registry key, local name)
    for (step_name, step_ref) in registry {
        let mut local = step_ref.export_name.clone();
        let mut suffix = 2;
        while !used_names.insert(local.clone()) {
            local = format!("{}_{}", step_ref.export_name, suffix);
            suffix += 1;
        }
        let specifier = module_specifier(&step_ref.import_path, manifest_dir);
        if local == step_ref.export_name {
            out.push_str(&format!(
                "import {{ {} }} from \"{}\";\n",
                local, specifier
            ));
        } else {
            out.push_str(&format!(
                "import {{ {} as {} }} from \"{}\";\n",
                step_ref.export_name, local, specifier
            ));
        }
        bindings.push((step_name.clone(), local));
    }

    out.push_str("\nexport const registry = {\n");
    for (key, local) in &bindings {
        out.push_str(&format!("  \"{}\": {},\n", key, local));
    }
    out.push_str("};\n");

    out.push_str("\nexport const blueprints = {\n");
    for (id, blueprint) in blueprints {
        let json = serde_json::to_string_pretty(blueprint)
            .expect("blueprints are JSON-serializable by construction");
        out.push_str(&format!("  \"{}\": {},\n", id, indent_continuation(&json)));
    }
    out.push_str("};\n");
    out
}

/// Import specifier for a step source file: relative to the manifest
/// directory when both sides allow it, extension dropped either way.
fn module_specifier(import_path: &str, manifest_dir: Option<&Path>) -> String {
    let stripped = import_path.strip_suffix(".ts").unwrap_or(import_path);
    let path = Path::new(stripped);
    let Some(base) = manifest_dir else {
        return stripped.to_string();
    };
    match relative_path(base, path) {
        Some(relative) => {
            let text = relative.to_string_lossy().replace('\\', "/");
            if text.starts_with("../") || text.starts_with("./") {
                text
            } else {
                format!("./{}", text)
            }
        }
        None => stripped.to_string(),
    }
}

/// `from` and `to` must both be absolute or both relative for a useful
/// answer; otherwise `None` keeps the original path.
fn relative_path(from: &Path, to: &Path) -> Option<PathBuf> {
    if from.is_absolute() != to.is_absolute() {
        return None;
    }
    let from: Vec<Component> = from.components().collect();
    let to: Vec<Component> = to.components().collect();
    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut result = PathBuf::new();
    for _ in common..from.len() {
        result.push("..");
    }
    for component in &to[common..] {
        result.push(component.as_os_str());
    }
    if result.as_os_str().is_empty() {
        return None;
    }
    Some(result)
}

/// Keep multi-line JSON aligned under its key in the object literal.
fn indent_continuation(json: &str) -> String {
    let mut lines = json.lines();
    let mut out = String::new();
    if let Some(first) = lines.next() {
        out.push_str(first);
    }
    for line in lines {
        out.push('\n');
        out.push_str("  ");
        out.push_str(line);
    }
    out
}
