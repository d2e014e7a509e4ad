//! Per-file analysis: parsing, export-kind discovery, import resolution.
//!
//! A procedure qualifies as a `step` or `flow` iff its doc comment carries
//! the matching tag; untagged exports are ignored. Results are cached per
//! file so flows sharing imports do not re-parse them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::diagnostics::{Diagnostics, SourceLocation};
use crate::lang::ast::{FunctionDecl, Item, Module};
use crate::lang::{parse_source, SourceFile};

use super::types::Signature;

/// Module specifier the durable primitives are imported from.
pub const DURABLE_MODULE: &str = "flowcraft/durable";

static EXPORT_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"@(flow|step)\b").unwrap());

/// Declarative marker on a procedure export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Step,
    Flow,
}

/// Durable primitives recognized at await sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurableKind {
    Sleep,
    WaitForEvent,
    CreateWebhook,
}

impl DurableKind {
    fn from_export(name: &str) -> Option<Self> {
        match name {
            "sleep" => Some(Self::Sleep),
            "waitForEvent" => Some(Self::WaitForEvent),
            "createWebhook" => Some(Self::CreateWebhook),
            _ => None,
        }
    }
}

/// A tagged export discovered in a file.
#[derive(Debug, Clone)]
pub struct ExportedProcedure {
    pub kind: ExportKind,
    /// Index of the declaration in the module's item list.
    pub item_index: usize,
}

/// One import binding, resolved where possible.
#[derive(Debug, Clone)]
pub struct ImportRecord {
    pub local: String,
    pub imported: String,
    pub specifier: String,
    /// Present for relative imports that point at a readable file.
    pub resolved: Option<PathBuf>,
}

/// Cached analysis of one file.
#[derive(Debug)]
pub struct FileAnalysis {
    pub path: PathBuf,
    pub source: Arc<SourceFile>,
    pub module: Module,
    pub exports: FxHashMap<String, ExportedProcedure>,
    pub imports: Vec<ImportRecord>,
}

impl FileAnalysis {
    pub fn function(&self, item_index: usize) -> Option<&FunctionDecl> {
        match self.module.items.get(item_index) {
            Some(Item::Function(decl)) => Some(decl),
            _ => None,
        }
    }

    pub fn location_of(&self, span: crate::lang::Span) -> SourceLocation {
        self.source.location_of(span)
    }
}

/// What an identifier in a flow body can resolve to.
#[derive(Debug, Clone)]
pub enum Symbol {
    Step {
        export_name: String,
        import_path: String,
        signature: Signature,
    },
    Flow {
        export_name: String,
    },
    Durable(DurableKind),
}

/// Parses entry files and resolves cross-file symbols, with caching.
#[derive(Default)]
pub struct FileAnalyzer {
    cache: DashMap<PathBuf, Arc<FileAnalysis>>,
}

impl FileAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Analyze one file. A missing file records an `error` diagnostic and
    /// returns `None` so the compile continues with the other entries.
    pub fn analyze(&self, path: &Path, diagnostics: &mut Diagnostics) -> Option<Arc<FileAnalysis>> {
        let key = normalize_path(path);

        // DashMap entry-style get-or-insert; parse at most once per file.
        if let Some(existing) = self.cache.get(&key) {
            return Some(Arc::clone(&existing));
        }

        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                diagnostics.error(
                    SourceLocation::new(path.display().to_string(), 1, 1),
                    format!("cannot read entry file: {}", err),
                );
                return None;
            }
        };
        Some(self.insert_analysis(path, key, text, diagnostics))
    }

    /// Analyze source held in memory (used by tests and embedders). The
    /// result is cached under `path` exactly like a disk-backed file.
    pub fn analyze_source(
        &self,
        path: &Path,
        text: impl Into<String>,
        diagnostics: &mut Diagnostics,
    ) -> Arc<FileAnalysis> {
        let key = normalize_path(path);
        if let Some(existing) = self.cache.get(&key) {
            return Arc::clone(&existing);
        }
        self.insert_analysis(path, key, text.into(), diagnostics)
    }

    fn insert_analysis(
        &self,
        path: &Path,
        key: PathBuf,
        text: String,
        diagnostics: &mut Diagnostics,
    ) -> Arc<FileAnalysis> {
        debug!(path = %path.display(), "analyzing source file");
        let source = Arc::new(SourceFile::new(path.display().to_string(), text));
        let module = parse_source(&source, diagnostics);
        let exports = discover_exports(&source, &module, diagnostics);
        let imports = resolve_imports(path, &module);

        let analysis = Arc::new(FileAnalysis {
            path: key.clone(),
            source,
            module,
            exports,
            imports,
        });
        self.cache.insert(key, Arc::clone(&analysis));
        analysis
    }

    /// Build the symbol table visible inside `analysis`: its own tagged
    /// exports plus tagged exports of every resolved import, plus the
    /// durable primitives. Imports that cannot be resolved are skipped
    /// (the corresponding await sites will simply emit no node).
    pub fn symbols(
        &self,
        analysis: &FileAnalysis,
        diagnostics: &mut Diagnostics,
    ) -> FxHashMap<String, Symbol> {
        let mut symbols: FxHashMap<String, Symbol> = FxHashMap::default();

        for (name, export) in &analysis.exports {
            if let Some(symbol) = self.symbol_for(analysis, name, export) {
                symbols.insert(name.clone(), symbol);
            }
        }

        for import in &analysis.imports {
            if import.specifier == DURABLE_MODULE {
                if let Some(kind) = DurableKind::from_export(&import.imported) {
                    symbols.insert(import.local.clone(), Symbol::Durable(kind));
                }
                continue;
            }
            let Some(resolved) = &import.resolved else {
                continue;
            };
            let Some(dep) = self.analyze(resolved, diagnostics) else {
                continue;
            };
            if let Some(export) = dep.exports.get(&import.imported) {
                if let Some(symbol) = self.symbol_for(&dep, &import.imported, export) {
                    symbols.insert(import.local.clone(), symbol);
                }
            }
        }

        symbols
    }

    fn symbol_for(
        &self,
        analysis: &FileAnalysis,
        name: &str,
        export: &ExportedProcedure,
    ) -> Option<Symbol> {
        let decl = analysis.function(export.item_index)?;
        Some(match export.kind {
            ExportKind::Flow => Symbol::Flow {
                export_name: name.to_string(),
            },
            ExportKind::Step => Symbol::Step {
                export_name: name.to_string(),
                import_path: analysis.source.path.clone(),
                signature: Signature::of(decl, analysis.location_of(decl.span)),
            },
        })
    }
}

fn discover_exports(
    source: &SourceFile,
    module: &Module,
    diagnostics: &mut Diagnostics,
) -> FxHashMap<String, ExportedProcedure> {
    let mut exports = FxHashMap::default();
    for (index, item) in module.items.iter().enumerate() {
        let Item::Function(decl) = item else {
            continue;
        };
        if !decl.exported {
            continue;
        }
        let Some(doc) = &decl.doc else {
            continue;
        };
        let tags: Vec<&str> = EXPORT_TAG
            .captures_iter(doc)
            .filter_map(|c| c.get(1).map(|m| m.as_str()))
            .collect();
        let kind = match tags.as_slice() {
            [] => continue,
            ["flow"] => ExportKind::Flow,
            ["step"] => ExportKind::Step,
            _ => {
                diagnostics.error(
                    source.location_of(decl.span),
                    format!("'{}' is tagged as both @flow and @step", decl.name),
                );
                continue;
            }
        };
        exports.insert(
            decl.name.clone(),
            ExportedProcedure {
                kind,
                item_index: index,
            },
        );
    }
    exports
}

fn resolve_imports(path: &Path, module: &Module) -> Vec<ImportRecord> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut records = Vec::new();
    for item in &module.items {
        let Item::Import(import) = item else {
            continue;
        };
        let resolved = if import.specifier.starts_with('.') {
            resolve_relative(dir, &import.specifier)
        } else {
            None
        };
        for name in &import.names {
            records.push(ImportRecord {
                local: name.local.clone(),
                imported: name.imported.clone(),
                specifier: import.specifier.clone(),
                resolved: resolved.clone(),
            });
        }
    }
    records
}

/// `./steps` resolves to `steps.ts`, then `steps/index.ts`, then the
/// literal path.
fn resolve_relative(dir: &Path, specifier: &str) -> Option<PathBuf> {
    let base = dir.join(specifier);
    let with_ext = base.with_extension("ts");
    if with_ext.is_file() {
        return Some(normalize_path(&with_ext));
    }
    let index = base.join("index.ts");
    if index.is_file() {
        return Some(normalize_path(&index));
    }
    if base.is_file() {
        return Some(normalize_path(&base));
    }
    None
}

fn normalize_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn discovers_tagged_exports_only() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "index.ts",
            r#"
/** @step */
export async function charge(amount: number): Promise<Receipt> { return go(amount); }

/** @flow */
export async function main() { await charge(1); }

/** plain helper */
export async function helper() {}

export async function untagged() {}
"#,
        );
        let analyzer = FileAnalyzer::new();
        let mut diagnostics = Diagnostics::new();
        let analysis = analyzer.analyze(&path, &mut diagnostics).unwrap();
        assert!(!diagnostics.has_errors());
        assert_eq!(analysis.exports.len(), 2);
        assert_eq!(analysis.exports["charge"].kind, ExportKind::Step);
        assert_eq!(analysis.exports["main"].kind, ExportKind::Flow);
    }

    #[test]
    fn double_tag_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "index.ts",
            "/** @flow @step */\nexport async function weird() {}\n",
        );
        let analyzer = FileAnalyzer::new();
        let mut diagnostics = Diagnostics::new();
        let analysis = analyzer.analyze(&path, &mut diagnostics).unwrap();
        assert!(diagnostics.has_errors());
        assert!(analysis.exports.is_empty());
    }

    #[test]
    fn missing_file_records_error_and_skips() {
        let analyzer = FileAnalyzer::new();
        let mut diagnostics = Diagnostics::new();
        let result = analyzer.analyze(Path::new("/no/such/file.ts"), &mut diagnostics);
        assert!(result.is_none());
        assert!(diagnostics.has_errors());
    }

    #[test]
    fn caches_parse_results() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "index.ts", "/** @flow */\nexport async function m() {}\n");
        let analyzer = FileAnalyzer::new();
        let mut diagnostics = Diagnostics::new();
        let first = analyzer.analyze(&path, &mut diagnostics).unwrap();
        let second = analyzer.analyze(&path, &mut diagnostics).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn resolves_cross_file_steps_and_durables() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "steps.ts",
            r#"
/** @step */
export async function fetchUser(id: string): Promise<User> { return load(id); }
"#,
        );
        let entry = write(
            &dir,
            "index.ts",
            r#"
import { fetchUser } from "./steps";
import { sleep, createWebhook } from "flowcraft/durable";

/** @flow */
export async function main() {
  await fetchUser("u1");
  await sleep(1000);
}
"#,
        );
        let analyzer = FileAnalyzer::new();
        let mut diagnostics = Diagnostics::new();
        let analysis = analyzer.analyze(&entry, &mut diagnostics).unwrap();
        let symbols = analyzer.symbols(&analysis, &mut diagnostics);
        assert!(!diagnostics.has_errors());

        match symbols.get("fetchUser") {
            Some(Symbol::Step {
                export_name,
                import_path,
                signature,
            }) => {
                assert_eq!(export_name, "fetchUser");
                assert!(import_path.ends_with("steps.ts"));
                assert_eq!(signature.params.len(), 1);
            }
            other => panic!("expected step symbol, got {:?}", other),
        }
        assert!(matches!(
            symbols.get("sleep"),
            Some(Symbol::Durable(DurableKind::Sleep))
        ));
        assert!(matches!(
            symbols.get("createWebhook"),
            Some(Symbol::Durable(DurableKind::CreateWebhook))
        ));
    }

    #[test]
    fn unresolved_import_is_silently_skipped() {
        let dir = TempDir::new().unwrap();
        let entry = write(
            &dir,
            "index.ts",
            r#"
import { ghost } from "./missing";

/** @flow */
export async function main() { await ghost(); }
"#,
        );
        let analyzer = FileAnalyzer::new();
        let mut diagnostics = Diagnostics::new();
        let analysis = analyzer.analyze(&entry, &mut diagnostics).unwrap();
        let symbols = analyzer.symbols(&analysis, &mut diagnostics);
        assert!(!symbols.contains_key("ghost"));
        assert!(!diagnostics.has_errors());
    }
}
