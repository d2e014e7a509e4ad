//! Static analysis: file discovery, type view, and flow lowering.

pub mod files;
pub mod flow;
pub mod types;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use files::{DurableKind, ExportKind, FileAnalysis, FileAnalyzer, Symbol, DURABLE_MODULE};
pub use flow::{analyze_flow, FlowAnalysis};
pub use types::{Signature, StaticType, TypeView};

/// Where a step's implementation lives, for the manifest emitter and the
/// runtime host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRef {
    pub import_path: String,
    pub export_name: String,
}

/// Compile-time step registry: step name -> implementation reference.
/// Ordered so manifest output is stable across runs.
pub type Registry = BTreeMap<String, StepRef>;
