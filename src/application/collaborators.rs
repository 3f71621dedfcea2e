//! Traits describing the external collaborators the engine orchestrates.

use std::{io, path::Path};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::view::{ViewRequest, ViewResponse};

/// Source-to-artifact compiler. Treated as a black box: only success or
/// failure and the produced artifact text matter.
#[async_trait]
pub trait ViewCompiler: Send + Sync {
    async fn compile(&self, entry: &Path, working_dir: &Path) -> Result<String, CompilerError>;
}

#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("compiler executable unavailable: {0}")]
    NotFound(io::Error),
    #[error("compiler i/o failure: {0}")]
    Io(io::Error),
    #[error("compiler exited with {exit_code:?}: {stderr}")]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("compiler rejected the sources: {0}")]
    Rejected(String),
}

/// One discovered view module as seen by the entry-point template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryModule {
    /// Fully-qualified module name, e.g. `UI.MultipartModule`.
    pub name: String,
    /// Shorter name the view also answers to, when it is unambiguous.
    pub alias: Option<String>,
}

/// Renders the compiler's synthetic entry module from the discovered modules.
pub trait EntryTemplate: Send + Sync {
    fn render(&self, modules: &[EntryModule]) -> Result<String, TemplateError>;
}

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("entry template failed to render: {0}")]
    Render(String),
}

/// Channel pair of a running worker.
///
/// Dropping `get_view` tells the worker no more requests will come; the
/// worker closes `receive_html` once it has shut down.
#[derive(Debug)]
pub struct WorkerPorts {
    pub get_view: mpsc::UnboundedSender<ViewRequest>,
    pub receive_html: mpsc::UnboundedReceiver<ViewResponse>,
}

/// Loads a compiled artifact and starts a worker answering render requests.
#[async_trait]
pub trait WorkerRuntime: Send + Sync {
    async fn start(&self, artifact: &Path) -> Result<WorkerPorts, WorkerLoadError>;
}

#[derive(Debug, Error)]
pub enum WorkerLoadError {
    #[error("compiled artifact unreadable: {0}")]
    Unreadable(io::Error),
    #[error("failed to start worker: {0}")]
    Spawn(io::Error),
    #[error("compiled artifact does not expose port `{0}`")]
    MissingPort(String),
    #[error("compiled artifact has an unexpected shape: {0}")]
    InvalidShape(String),
    #[error("worker exited before it was ready: {stderr}")]
    Exited { stderr: String },
}
