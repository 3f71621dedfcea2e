use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Instant,
};

use metrics::counter;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::application::{
    collaborators::{WorkerPorts, WorkerRuntime},
    error::EngineError,
};

use super::multiplexer::RequestMultiplexer;

const TARGET: &str = "application::render::worker";

/// One loaded worker and the multiplexer talking to it.
///
/// Callers hold an `Arc` for the duration of a render, so a replaced session
/// keeps serving its in-flight requests until they settle.
pub struct WorkerSession {
    generation: u64,
    multiplexer: RequestMultiplexer,
}

impl WorkerSession {
    async fn start(
        runtime: &dyn WorkerRuntime,
        artifact: &Path,
        generation: u64,
    ) -> Result<Arc<Self>, EngineError> {
        let WorkerPorts {
            get_view,
            mut receive_html,
        } = runtime
            .start(artifact)
            .await
            .map_err(EngineError::invalid_compiled_module)?;

        let multiplexer = RequestMultiplexer::new(get_view);
        let mailbox = multiplexer.mailbox();
        tokio::spawn(async move {
            while let Some(response) = receive_html.recv().await {
                mailbox.dispatch(response);
            }
            let rejected = mailbox.close(&EngineError::WorkerTerminated);
            debug!(
                target = TARGET,
                op = "worker::dispatcher",
                generation,
                rejected,
                "Worker response channel closed"
            );
        });

        Ok(Arc::new(Self {
            generation,
            multiplexer,
        }))
    }

    pub async fn render(
        &self,
        view_name: &str,
        context: serde_json::Value,
    ) -> Result<String, EngineError> {
        self.multiplexer.submit(view_name, context).await
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_alive(&self) -> bool {
        self.multiplexer.is_open()
    }

    fn terminate(&self) -> usize {
        self.multiplexer
            .mailbox()
            .cancel_all(&EngineError::WorkerTerminated)
    }
}

/// Lazily loaded, reloadable worker.
///
/// The stale flag is shared with the artifact watcher; the next `acquire`
/// after it is raised starts a fresh session. Loads are serialized so
/// concurrent renders never start two workers for the same change.
pub struct WorkerHandle {
    runtime: Arc<dyn WorkerRuntime>,
    current: Mutex<Option<Arc<WorkerSession>>>,
    stale: Arc<AtomicBool>,
    generations: AtomicU64,
}

impl WorkerHandle {
    pub fn new(runtime: Arc<dyn WorkerRuntime>) -> Self {
        Self {
            runtime,
            current: Mutex::new(None),
            stale: Arc::new(AtomicBool::new(false)),
            generations: AtomicU64::new(0),
        }
    }

    pub fn stale_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stale)
    }

    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    #[cfg(test)]
    async fn is_loaded(&self) -> bool {
        self.current.lock().await.is_some()
    }

    /// Current session, loading `artifact` first when none is loaded, the
    /// loaded one is stale, or its worker has exited. A failed reload drops
    /// the previous session.
    pub async fn acquire(&self, artifact: &Path) -> Result<Arc<WorkerSession>, EngineError> {
        let mut current = self.current.lock().await;
        let stale = self.stale.swap(false, Ordering::AcqRel);
        if !stale
            && let Some(session) = current.as_ref()
            && session.is_alive()
        {
            return Ok(Arc::clone(session));
        }

        let previous = current.take();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let started = Instant::now();

        match WorkerSession::start(self.runtime.as_ref(), artifact, generation).await {
            Ok(session) => {
                let reloaded = previous.is_some();
                if reloaded {
                    counter!("vista_worker_reload_total").increment(1);
                }
                info!(
                    target = TARGET,
                    op = "worker::acquire",
                    result = if reloaded { "reloaded" } else { "loaded" },
                    generation,
                    artifact = %artifact.display(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Worker ready"
                );
                *current = Some(Arc::clone(&session));
                Ok(session)
            }
            Err(err) => {
                warn!(
                    target = TARGET,
                    op = "worker::acquire",
                    result = "error",
                    generation,
                    artifact = %artifact.display(),
                    error = %err,
                    "Failed to load compiled views"
                );
                Err(err)
            }
        }
    }

    /// Drop the loaded session and reject everything still waiting on it.
    pub async fn shutdown(&self) -> usize {
        let Some(session) = self.current.lock().await.take() else {
            return 0;
        };
        let rejected = session.terminate();
        info!(
            target = TARGET,
            op = "worker::shutdown",
            generation = session.generation(),
            rejected,
            "Worker shut down"
        );
        rejected
    }
}
