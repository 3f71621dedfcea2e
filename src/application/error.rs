use std::{io, path::PathBuf, sync::Arc};

use thiserror::Error;

use crate::{
    application::collaborators::{CompilerError, TemplateError, WorkerLoadError},
    infra::error::InfraError,
};

/// Prefix the worker uses when asked for a view it does not know.
pub const VIEW_NOT_FOUND_PREFIX: &str = "View was not found:";
/// Prefix the worker uses when a view's context decoder rejects the context.
pub const INVALID_CONTEXT_PREFIX: &str = "Invalid context for this view:";

/// Errors surfaced by the view engine.
///
/// Build and load errors put the engine into a faulty state; per-request
/// errors (`EmptyViewName`, `ViewNotFound`, `InvalidRenderContext`, `Render`)
/// leave it untouched.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("there is already a compilation in progress")]
    AlreadyCompiling,
    #[error("views do not compile; see the compiler diagnostics for details")]
    ViewsDoNotCompile {
        #[source]
        source: Arc<CompilerError>,
    },
    #[error("impossible to extract module name from {}", path.display())]
    ModuleNameExtraction { path: PathBuf },
    #[error("compilation was interrupted before it finished")]
    CompilationInterrupted,
    #[error("views need to be compiled before rendering them")]
    CompilationRequired,
    #[error("there is a problem with compiled views; you should try recompiling")]
    InvalidCompiledModule {
        #[source]
        source: Arc<WorkerLoadError>,
    },
    #[error("if you pass no name, you get no view")]
    EmptyViewName,
    #[error("{0}")]
    ViewNotFound(String),
    #[error("{0}")]
    InvalidRenderContext(String),
    #[error("worker failed to render the view: {0}")]
    Render(String),
    #[error("worker response {id} carried neither html nor error")]
    MalformedResponse { id: u32 },
    #[error("worker terminated before answering the request")]
    WorkerTerminated,
    #[error("manifest not found at {}", path.display())]
    ManifestNotFound {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("manifest at {} is invalid", path.display())]
    ManifestInvalid {
        path: PathBuf,
        #[source]
        source: Arc<serde_json::Error>,
    },
    #[error("failed to render the entry module")]
    Template {
        #[source]
        source: Arc<TemplateError>,
    },
    #[error("{op} failed for {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
}

impl EngineError {
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub fn views_do_not_compile(source: CompilerError) -> Self {
        Self::ViewsDoNotCompile {
            source: Arc::new(source),
        }
    }

    pub fn invalid_compiled_module(source: WorkerLoadError) -> Self {
        Self::InvalidCompiledModule {
            source: Arc::new(source),
        }
    }

    /// Classify an error string produced by the worker. The message is kept
    /// as the worker wrote it.
    pub fn from_worker_message(message: String) -> Self {
        if message.starts_with(VIEW_NOT_FOUND_PREFIX) {
            Self::ViewNotFound(message)
        } else if message.starts_with(INVALID_CONTEXT_PREFIX) {
            Self::InvalidRenderContext(message)
        } else {
            Self::Render(message)
        }
    }

    /// Whether this error leaves the engine in a faulty state.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            EngineError::AlreadyCompiling
                | EngineError::CompilationRequired
                | EngineError::EmptyViewName
                | EngineError::ViewNotFound(_)
                | EngineError::InvalidRenderContext(_)
                | EngineError::Render(_)
                | EngineError::MalformedResponse { .. }
                | EngineError::WorkerTerminated
        )
    }

    /// Stable label used for log fields and metric labels.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::AlreadyCompiling => "already_compiling",
            EngineError::ViewsDoNotCompile { .. } => "views_do_not_compile",
            EngineError::ModuleNameExtraction { .. } => "module_name_extraction",
            EngineError::CompilationInterrupted => "compilation_interrupted",
            EngineError::CompilationRequired => "compilation_required",
            EngineError::InvalidCompiledModule { .. } => "invalid_compiled_module",
            EngineError::EmptyViewName => "empty_view_name",
            EngineError::ViewNotFound(_) => "view_not_found",
            EngineError::InvalidRenderContext(_) => "invalid_render_context",
            EngineError::Render(_) => "render",
            EngineError::MalformedResponse { .. } => "malformed_response",
            EngineError::WorkerTerminated => "worker_terminated",
            EngineError::ManifestNotFound { .. } => "manifest_not_found",
            EngineError::ManifestInvalid { .. } => "manifest_invalid",
            EngineError::Template { .. } => "template",
            EngineError::Io { .. } => "io",
        }
    }
}

/// Top-level error of the `vista` binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

/// Flatten an error and its source chain into one line per cause.
pub fn error_chain(error: &dyn std::error::Error) -> Vec<String> {
    let mut messages = vec![error.to_string()];
    let mut current = error.source();
    while let Some(inner) = current {
        messages.push(inner.to_string());
        current = inner.source();
    }
    messages
}
