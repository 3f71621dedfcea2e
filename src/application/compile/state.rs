use std::{path::PathBuf, sync::Mutex};

use tracing::warn;

use crate::application::{error::EngineError, lock::mutex_lock};

const TARGET: &str = "application::compile::state";

/// Compilation lifecycle of the engine.
///
/// `Ready` carries the artifact path. Whether the loaded worker is stale is
/// tracked separately by the worker handle.
#[derive(Debug, Clone)]
pub enum CompilationState {
    Uninitialized,
    Compiling,
    Ready(PathBuf),
    Faulty(EngineError),
}

#[derive(Debug)]
pub struct CompilationStateCell {
    state: Mutex<CompilationState>,
}

impl Default for CompilationStateCell {
    fn default() -> Self {
        Self {
            state: Mutex::new(CompilationState::Uninitialized),
        }
    }
}

impl CompilationStateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CompilationState {
        mutex_lock(&self.state, TARGET, "state::snapshot").clone()
    }

    pub fn fault(&self) -> Option<EngineError> {
        match &*mutex_lock(&self.state, TARGET, "state::fault") {
            CompilationState::Faulty(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// Enter `Compiling`, refusing while another compilation runs.
    ///
    /// The returned guard must be finished with `succeed` or `fail`; dropping
    /// it unfinished leaves the engine faulty.
    pub fn begin(&self) -> Result<CompileGuard<'_>, EngineError> {
        let mut state = mutex_lock(&self.state, TARGET, "state::begin");
        if matches!(*state, CompilationState::Compiling) {
            return Err(EngineError::AlreadyCompiling);
        }
        *state = CompilationState::Compiling;
        Ok(CompileGuard {
            cell: self,
            finished: false,
        })
    }

    /// Record an artifact found on disk without compiling. Only applies when
    /// nothing else has happened yet.
    pub fn adopt(&self, artifact: PathBuf) -> bool {
        let mut state = mutex_lock(&self.state, TARGET, "state::adopt");
        if matches!(*state, CompilationState::Uninitialized) {
            *state = CompilationState::Ready(artifact);
            true
        } else {
            false
        }
    }

    /// Record a fault raised outside compilation, such as a failed load.
    /// A running compilation owns the state and is left alone.
    pub fn mark_faulty(&self, error: EngineError) {
        let mut state = mutex_lock(&self.state, TARGET, "state::mark_faulty");
        if !matches!(*state, CompilationState::Compiling) {
            *state = CompilationState::Faulty(error);
        }
    }

    /// Clear a fault caused by loading the artifact. Build faults stay until
    /// the next successful compilation.
    pub fn clear_load_fault(&self) -> bool {
        let mut state = mutex_lock(&self.state, TARGET, "state::clear_load_fault");
        if matches!(
            *state,
            CompilationState::Faulty(EngineError::InvalidCompiledModule { .. })
        ) {
            *state = CompilationState::Uninitialized;
            true
        } else {
            false
        }
    }

    fn set(&self, next: CompilationState) {
        *mutex_lock(&self.state, TARGET, "state::set") = next;
    }
}

/// Ownership of one in-progress compilation.
pub struct CompileGuard<'a> {
    cell: &'a CompilationStateCell,
    finished: bool,
}

impl CompileGuard<'_> {
    pub fn succeed(mut self, artifact: PathBuf) {
        self.finished = true;
        self.cell.set(CompilationState::Ready(artifact));
    }

    pub fn fail(mut self, error: EngineError) {
        self.finished = true;
        self.cell.set(CompilationState::Faulty(error));
    }
}

impl Drop for CompileGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                target = TARGET,
                op = "compile_guard::drop",
                result = "interrupted",
                "Compilation dropped before finishing"
            );
            self.cell
                .set(CompilationState::Faulty(EngineError::CompilationInterrupted));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::collaborators::{CompilerError, WorkerLoadError};

    #[test]
    fn second_begin_is_rejected_while_compiling() {
        let cell = CompilationStateCell::new();
        let guard = cell.begin().expect("first compile");

        assert!(matches!(cell.begin(), Err(EngineError::AlreadyCompiling)));
        guard.succeed(PathBuf::from("views.compiled.js"));
        assert!(matches!(cell.snapshot(), CompilationState::Ready(_)));
        assert!(cell.begin().is_ok());
    }

    #[test]
    fn failure_is_retained_until_next_compile() {
        let cell = CompilationStateCell::new();
        cell.begin()
            .expect("compile")
            .fail(EngineError::views_do_not_compile(CompilerError::Rejected(
                "bad view".into(),
            )));

        assert!(matches!(
            cell.fault(),
            Some(EngineError::ViewsDoNotCompile { .. })
        ));
        assert!(!cell.clear_load_fault());

        let guard = cell.begin().expect("recompile after fault");
        assert!(cell.fault().is_none());
        guard.succeed(PathBuf::from("views.compiled.js"));
    }

    #[test]
    fn dropped_guard_leaves_engine_faulty() {
        let cell = CompilationStateCell::new();
        drop(cell.begin().expect("compile"));

        assert!(matches!(
            cell.fault(),
            Some(EngineError::CompilationInterrupted)
        ));
    }

    #[test]
    fn load_faults_can_be_cleared() {
        let cell = CompilationStateCell::new();
        cell.mark_faulty(EngineError::invalid_compiled_module(
            WorkerLoadError::MissingPort("receiveHtml".into()),
        ));

        assert!(cell.clear_load_fault());
        assert!(matches!(cell.snapshot(), CompilationState::Uninitialized));
    }

    #[test]
    fn adoption_only_from_uninitialized() {
        let cell = CompilationStateCell::new();
        assert!(cell.adopt(PathBuf::from("a.js")));
        assert!(!cell.adopt(PathBuf::from("b.js")));
        assert!(
            matches!(cell.snapshot(), CompilationState::Ready(path) if path == PathBuf::from("a.js"))
        );
    }
}
