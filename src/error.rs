//! Unified top-level error for the flowcraft CLI and embedders.
//!
//! Analysis problems are not errors in this sense: they accumulate as
//! diagnostics and drive the exit code instead. This type covers the
//! fatal paths: configuration, builder failures, runtime failures, IO.

use thiserror::Error;

use crate::builder::BuilderError;
use crate::compiler::CompileError;
use crate::config::ConfigError;
use crate::runtime::WorkflowError;

#[derive(Debug, Error)]
pub enum FlowcraftError {
    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Compile(#[from] CompileError),

    #[error("{0}")]
    Builder(#[from] BuilderError),

    #[error("{0}")]
    Workflow(#[from] WorkflowError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl FlowcraftError {
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}
