//! Infrastructure adapters and runtime bootstrap.

use std::sync::Arc;

use crate::{
    application::engine::Collaborators, config::Settings, domain::manifest::Manifest,
};

pub mod compiler;
pub mod error;
pub mod process_worker;
pub mod telemetry;
pub mod template;
pub mod watcher;

use compiler::CommandCompiler;
use error::InfraError;
use process_worker::ProcessRuntime;
use template::AskamaEntryTemplate;

/// Collaborators backed by the configured compiler and worker programs.
pub fn production_collaborators(settings: &Settings) -> Result<Collaborators, InfraError> {
    let engine_manifest = match settings.compiler.engine_manifest.as_ref() {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            Manifest::from_json(&raw).map_err(|err| {
                InfraError::configuration(format!(
                    "engine manifest {} is invalid: {err}",
                    path.display()
                ))
            })?
        }
        None => Manifest::engine_default(),
    };

    Ok(Collaborators {
        compiler: Arc::new(CommandCompiler::new(
            &settings.compiler.program,
            settings.compiler.args.clone(),
        )),
        template: Arc::new(AskamaEntryTemplate),
        runtime: Arc::new(
            ProcessRuntime::new(&settings.worker.program, settings.worker.args.clone())
                .with_handshake_timeout(settings.worker.handshake_timeout),
        ),
        engine_manifest,
    })
}
