//! Compiler entry point: entry files in, blueprints + registry +
//! diagnostics + manifest source out.
//!
//! User-code problems never abort the compile; they accumulate as
//! diagnostics and the partial output is still returned for tooling.
//! Builder problems (broken graph structure) are fatal.

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::analyzer::{
    analyze_flow, ExportKind, FileAnalyzer, Registry, Symbol, TypeView,
};
use crate::builder::{BlueprintBuilder, BuilderError};
use crate::diagnostics::Diagnostics;
use crate::graph::{WorkflowBlueprint, WorkflowGraph};
use crate::manifest::emit_manifest;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error(transparent)]
    Builder(#[from] BuilderError),
}

/// Everything one compile invocation produces.
#[derive(Debug)]
pub struct CompileOutput {
    pub blueprints: BTreeMap<String, WorkflowBlueprint>,
    pub registry: Registry,
    pub diagnostics: Diagnostics,
    pub manifest_source: String,
}

impl CompileOutput {
    /// A compile with any error diagnostic is failed, even though its
    /// partial output is available.
    pub fn is_success(&self) -> bool {
        !self.diagnostics.has_errors()
    }
}

/// Compile a set of entry files.
///
/// `ts_config_path` names the type-checker configuration; the built-in
/// type view reads signatures from source directly, so the file only
/// informs diagnostics when it is missing. `manifest_dir` is where the
/// manifest will be written (step imports are relativized against it).
#[instrument(skip_all, fields(entries = entry_files.len()))]
pub fn compile_project(
    entry_files: &[impl AsRef<Path>],
    ts_config_path: Option<&Path>,
    manifest_dir: Option<&Path>,
) -> Result<CompileOutput, CompileError> {
    let analyzer = FileAnalyzer::new();
    let mut diagnostics = Diagnostics::new();

    if let Some(ts_config) = ts_config_path {
        if !ts_config.is_file() {
            debug!(path = %ts_config.display(), "type-checker config not found; signatures come from source only");
        }
    }

    // Phase 1: analyze entries plus everything they import, breadth-first,
    // and collect flow exports in a stable order. Flows defined in imported
    // files compile too; a subflow reference must always resolve.
    let mut flows: Vec<(String, std::sync::Arc<crate::analyzer::FileAnalysis>)> = Vec::new();
    let mut worklist: std::collections::VecDeque<std::path::PathBuf> = entry_files
        .iter()
        .map(|e| e.as_ref().to_path_buf())
        .collect();
    let mut seen_files: std::collections::BTreeSet<std::path::PathBuf> = Default::default();
    while let Some(file) = worklist.pop_front() {
        let Some(analysis) = analyzer.analyze(&file, &mut diagnostics) else {
            continue;
        };
        if !seen_files.insert(analysis.path.clone()) {
            continue;
        }
        let mut names: Vec<&String> = analysis
            .exports
            .iter()
            .filter(|(_, e)| e.kind == ExportKind::Flow)
            .map(|(name, _)| name)
            .collect();
        names.sort();
        for name in names {
            flows.push((name.clone(), analysis.clone()));
        }
        for import in &analysis.imports {
            if let Some(resolved) = &import.resolved {
                if !seen_files.contains(resolved) {
                    worklist.push_back(resolved.clone());
                }
            }
        }
    }

    // Phase 2: lower each flow to a graph.
    let mut graphs: BTreeMap<String, WorkflowGraph> = BTreeMap::new();
    let mut registry = Registry::new();
    for (name, analysis) in &flows {
        if graphs.contains_key(name) {
            let export = &analysis.exports[name];
            if let Some(decl) = analysis.function(export.item_index) {
                diagnostics.error(
                    analysis.location_of(decl.span),
                    format!("duplicate flow name '{}'", name),
                );
            }
            continue;
        }

        let symbols = analyzer.symbols(analysis, &mut diagnostics);
        let mut types = TypeView::new();
        for symbol in symbols.values() {
            if let Symbol::Step { signature, .. } = symbol {
                types.insert(signature.clone());
            }
        }

        let export = &analysis.exports[name];
        let Some(decl) = analysis.function(export.item_index) else {
            continue;
        };
        let lowered = analyze_flow(analysis, &symbols, &types, decl);
        diagnostics.extend(lowered.diagnostics);
        registry.extend(lowered.registry);
        graphs.insert(name.clone(), lowered.graph);
    }

    // Phase 3: flatten every flow against its siblings.
    let builder = BlueprintBuilder::new(&graphs);
    let mut blueprints = BTreeMap::new();
    for (name, graph) in &graphs {
        let blueprint = builder.build(graph)?;
        blueprints.insert(name.clone(), blueprint);
    }

    let manifest_source = emit_manifest(&blueprints, &registry, manifest_dir);

    Ok(CompileOutput {
        blueprints,
        registry,
        diagnostics,
        manifest_source,
    })
}
