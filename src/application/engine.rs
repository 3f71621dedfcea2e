//! The view engine: compiles the views directory and renders views by name.

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Instant,
};

use metrics::{counter, histogram};
use serde_json::Value;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::{
    application::{
        collaborators::{EntryTemplate, ViewCompiler, WorkerRuntime},
        compile::{
            ArtifactBuilder, CompilationState, CompilationStateCell, CompiledArtifact,
            artifact_digest,
        },
        error::EngineError,
        lock::mutex_lock,
        render::WorkerHandle,
    },
    domain::{manifest::Manifest, options::EngineOptions},
    infra::watcher::InvalidationWatcher,
};

const TARGET: &str = "application::engine";

/// External collaborators the engine drives.
pub struct Collaborators {
    pub compiler: Arc<dyn ViewCompiler>,
    pub template: Arc<dyn EntryTemplate>,
    pub runtime: Arc<dyn WorkerRuntime>,
    pub engine_manifest: Manifest,
}

/// Observable lifecycle of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Uninitialized,
    Compiling,
    Ready,
    /// Ready, but the artifact changed since the worker was loaded.
    Stale,
    Faulty,
}

/// Compiles a directory of views into one artifact and renders views from
/// it through a lazily loaded worker.
///
/// Concurrent `get_view` calls share one worker; responses are correlated
/// per request so they may complete in any order. Rewriting the artifact on
/// disk makes the next render reload the worker.
pub struct ViewEngine {
    options: EngineOptions,
    builder: ArtifactBuilder,
    state: Arc<CompilationStateCell>,
    worker: WorkerHandle,
    watcher: Mutex<Option<InvalidationWatcher>>,
    /// Digest of the artifact contents the engine last wrote or observed.
    /// Watcher events that leave the contents unchanged are ignored.
    known_digest: Arc<Mutex<Option<String>>>,
}

impl std::fmt::Debug for ViewEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewEngine")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ViewEngine {
    pub fn new(options: EngineOptions, collaborators: Collaborators) -> Self {
        let Collaborators {
            compiler,
            template,
            runtime,
            engine_manifest,
        } = collaborators;

        Self {
            builder: ArtifactBuilder::new(options.clone(), compiler, template, engine_manifest),
            options,
            state: Arc::new(CompilationStateCell::new()),
            worker: WorkerHandle::new(runtime),
            watcher: Mutex::new(None),
            known_digest: Arc::new(Mutex::new(None)),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Build the artifact from the views directory.
    ///
    /// Fails with `AlreadyCompiling` while another compilation runs. On
    /// success the loaded worker, if any, is replaced on the next render.
    pub async fn compile(&self) -> Result<CompiledArtifact, EngineError> {
        let guard = self.state.begin()?;
        let started = Instant::now();
        info!(
            target = TARGET,
            op = "engine::compile",
            result = "started",
            views_dir = %self.options.views_dir().display(),
            "Compiling views"
        );

        let outcome = self.builder.build().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        histogram!("vista_compile_ms").record(elapsed_ms as f64);

        match outcome {
            Ok(artifact) => {
                guard.succeed(artifact.path.clone());
                *mutex_lock(&self.known_digest, TARGET, "engine::compile") =
                    Some(artifact.digest.clone());
                self.worker.mark_stale();
                self.arm_watcher(&artifact.path);
                counter!("vista_compile_total", "result" => "ok").increment(1);
                Ok(artifact)
            }
            Err(err) => {
                guard.fail(err.clone());
                counter!("vista_compile_total", "result" => "error").increment(1);
                Err(err)
            }
        }
    }

    /// True when no artifact exists, the engine is faulty, or compilation is forced.
    pub async fn needs_compilation(&self) -> bool {
        if self.options.force_compilation() || self.state.fault().is_some() {
            return true;
        }
        !matches!(fs::try_exists(self.options.artifact_path()).await, Ok(true))
    }

    /// Render the view `name` with `context`.
    ///
    /// A stored build or load fault is returned before anything else. An
    /// empty name is rejected without contacting the worker.
    pub async fn get_view(&self, name: &str, context: Value) -> Result<String, EngineError> {
        let started = Instant::now();
        let outcome = self.render(name, context).await;

        let result = match &outcome {
            Ok(_) => "ok",
            Err(err) => err.code(),
        };
        counter!("vista_render_total", "result" => result).increment(1);
        debug!(
            target = TARGET,
            op = "engine::get_view",
            result,
            view = name,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Render finished"
        );
        outcome
    }

    async fn render(&self, name: &str, context: Value) -> Result<String, EngineError> {
        let artifact = self.renderable_artifact().await?;
        if name.is_empty() {
            return Err(EngineError::EmptyViewName);
        }

        let session = match self.worker.acquire(&artifact).await {
            Ok(session) => session,
            Err(err) => {
                if err.is_fatal() {
                    self.state.mark_faulty(err.clone());
                }
                // A fixed artifact written by another process clears the fault.
                self.arm_watcher(&artifact);
                return Err(err);
            }
        };
        if self.state.adopt(artifact.clone()) {
            info!(
                target = TARGET,
                op = "engine::get_view",
                result = "adopted",
                artifact = %artifact.display(),
                "Serving existing compiled views"
            );
        }
        self.arm_watcher(&artifact);

        session.render(name, context).await
    }

    async fn renderable_artifact(&self) -> Result<PathBuf, EngineError> {
        match self.state.snapshot() {
            CompilationState::Faulty(err) => Err(err),
            CompilationState::Ready(path) => Ok(path),
            CompilationState::Uninitialized | CompilationState::Compiling => {
                let path = self.options.artifact_path();
                match fs::try_exists(&path).await {
                    Ok(true) => Ok(path),
                    _ => Err(EngineError::CompilationRequired),
                }
            }
        }
    }

    pub fn status(&self) -> EngineStatus {
        match self.state.snapshot() {
            CompilationState::Uninitialized => EngineStatus::Uninitialized,
            CompilationState::Compiling => EngineStatus::Compiling,
            CompilationState::Faulty(_) => EngineStatus::Faulty,
            CompilationState::Ready(_) if self.worker.is_stale() => EngineStatus::Stale,
            CompilationState::Ready(_) => EngineStatus::Ready,
        }
    }

    /// Mark the loaded worker stale without waiting for a filesystem event.
    pub fn invalidate(&self) {
        self.worker.mark_stale();
        debug!(
            target = TARGET,
            op = "engine::invalidate",
            "Worker marked stale"
        );
    }

    /// Stop watching, reject every pending render with `WorkerTerminated`
    /// and drop the worker. The next render loads it again.
    pub async fn shutdown(&self) -> usize {
        let watcher = mutex_lock(&self.watcher, TARGET, "engine::shutdown").take();
        drop(watcher);
        let rejected = self.worker.shutdown().await;
        info!(
            target = TARGET,
            op = "engine::shutdown",
            rejected,
            "Engine shut down"
        );
        rejected
    }

    fn arm_watcher(&self, artifact: &Path) {
        let mut slot = mutex_lock(&self.watcher, TARGET, "engine::arm_watcher");
        if slot
            .as_ref()
            .is_some_and(|watcher| watcher.artifact() == artifact)
        {
            return;
        }

        let stale: Arc<AtomicBool> = self.worker.stale_flag();
        let state = Arc::clone(&self.state);
        let known_digest = Arc::clone(&self.known_digest);
        let watched = artifact.to_path_buf();
        match InvalidationWatcher::watch(artifact, move || {
            if !record_change(&watched, &known_digest) {
                return;
            }
            stale.store(true, Ordering::Release);
            state.clear_load_fault();
        }) {
            Ok(watcher) => *slot = Some(watcher),
            Err(err) => warn!(
                target = TARGET,
                op = "engine::arm_watcher",
                result = "error",
                artifact = %artifact.display(),
                error = %err,
                "Artifact watcher unavailable; use invalidate() to reload"
            ),
        }
    }
}

/// Compare the artifact on disk with the last known digest and remember the
/// new one. Returns false when the contents did not change, as for the
/// engine's own writes. A missing or unreadable artifact always counts.
fn record_change(artifact: &Path, known_digest: &Mutex<Option<String>>) -> bool {
    let current = std::fs::read(artifact)
        .ok()
        .map(|contents| artifact_digest(&contents));
    let mut known = mutex_lock(known_digest, TARGET, "engine::watcher");
    if current.is_some() && *known == current {
        debug!(
            target = TARGET,
            op = "engine::watcher",
            result = "unchanged",
            artifact = %artifact.display(),
            "Ignoring event for unchanged artifact"
        );
        return false;
    }
    *known = current;
    true
}
