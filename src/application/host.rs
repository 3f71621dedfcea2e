//! Registering the engine with a host that renders templates by file path.

use std::{path::Path, sync::Arc};

use serde_json::Value;
use tracing::info;

use crate::application::{engine::ViewEngine, error::EngineError};

const TARGET: &str = "application::host";

/// A host that resolves templates from a directory and delegates rendering
/// of one file extension to a callback.
pub trait ViewHost {
    fn set_views_dir(&mut self, dir: &Path);
    fn set_view_engine(&mut self, extension: &str, callback: RenderCallback);
}

/// Rendering entry point handed to a [`ViewHost`].
///
/// The host passes the template's file path; its stem is the view name.
#[derive(Clone)]
pub struct RenderCallback {
    engine: Arc<ViewEngine>,
}

impl RenderCallback {
    pub fn new(engine: Arc<ViewEngine>) -> Self {
        Self { engine }
    }

    pub async fn render(&self, file_path: &Path, context: Value) -> Result<String, EngineError> {
        let name = file_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default();
        self.engine.get_view(name, context).await
    }
}

/// Register `engine` with `host` (when given) and make sure an artifact is
/// available: compile when needed, otherwise reuse the existing one.
pub async fn configure(
    engine: Arc<ViewEngine>,
    host: Option<&mut (dyn ViewHost + Send)>,
) -> Result<Arc<ViewEngine>, EngineError> {
    if let Some(host) = host {
        host.set_views_dir(engine.options().views_dir());
        host.set_view_engine(
            engine.options().source_extension(),
            RenderCallback::new(Arc::clone(&engine)),
        );
    }

    if engine.needs_compilation().await {
        engine.compile().await?;
    } else {
        info!(
            target = TARGET,
            op = "host::configure",
            result = "reused",
            artifact = %engine.options().artifact_path().display(),
            "Reusing compiled views"
        );
    }
    Ok(engine)
}
