use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Stdio,
    time::Instant,
};

use async_trait::async_trait;
use tokio::{fs, process::Command};
use tracing::{info, warn};

use crate::application::collaborators::{CompilerError, ViewCompiler};

pub const ENTRY_PLACEHOLDER: &str = "{entry}";
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

const TARGET: &str = "infra::compiler";
const COMPILER_OUTPUT_FILE: &str = "compiled.js";

/// Runs an external compiler program inside the build directory.
///
/// Every argument has `{entry}` and `{output}` substituted with the entry
/// module path and the path the compiler must write its artifact to.
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandCompiler {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn expand_args(&self, entry: &Path, output: &Path) -> Vec<String> {
        let entry = entry.to_string_lossy();
        let output = output.to_string_lossy();
        self.args
            .iter()
            .map(|arg| {
                arg.replace(ENTRY_PLACEHOLDER, &entry)
                    .replace(OUTPUT_PLACEHOLDER, &output)
            })
            .collect()
    }
}

#[async_trait]
impl ViewCompiler for CommandCompiler {
    async fn compile(&self, entry: &Path, working_dir: &Path) -> Result<String, CompilerError> {
        let started_at = Instant::now();
        let output_path = working_dir.join(COMPILER_OUTPUT_FILE);

        let output = Command::new(&self.program)
            .args(self.expand_args(entry, &output_path))
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                warn!(
                    target = TARGET,
                    op = "compiler::compile",
                    result = "error",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    error_code = "spawn_compiler",
                    program = %self.program.display(),
                    error = %err,
                    "Failed to spawn compiler"
                );
                if err.kind() == ErrorKind::NotFound {
                    CompilerError::NotFound(err)
                } else {
                    CompilerError::Io(err)
                }
            })?;

        if !output.status.success() {
            let exit_code = output.status.code();
            // Some compilers report type errors on stdout.
            let mut diagnostics = String::from_utf8_lossy(&output.stderr).into_owned();
            if diagnostics.trim().is_empty() {
                diagnostics = String::from_utf8_lossy(&output.stdout).into_owned();
            }
            warn!(
                target = TARGET,
                op = "compiler::compile",
                result = "error",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                error_code = "compiler_failed",
                stderr = %diagnostics,
                "Compiler rejected the views"
            );
            return Err(CompilerError::Failed {
                exit_code,
                stderr: diagnostics,
            });
        }

        let artifact = fs::read_to_string(&output_path)
            .await
            .map_err(CompilerError::Io)?;
        info!(
            target = TARGET,
            op = "compiler::compile",
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            artifact_bytes = artifact.len(),
            "Compiler produced artifact"
        );
        Ok(artifact)
    }
}
