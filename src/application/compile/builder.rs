use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio::{fs, task};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::{
    application::{
        collaborators::{EntryModule, EntryTemplate, ViewCompiler},
        error::EngineError,
    },
    domain::{manifest::Manifest, merge, options::EngineOptions},
};

use super::modules::{discover_view_files, entry_modules, extract_module_names};

const TARGET: &str = "application::compile::builder";
const BUILD_DIR_PREFIX: &str = "vista-build-";
const ARTIFACT_TEMP_PREFIX: &str = ".vista-artifact-";
const ENTRY_MODULE_STEM: &str = "Main";

/// Result of one successful build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    pub path: PathBuf,
    /// Hex-encoded SHA-256 of the artifact contents.
    pub digest: String,
    pub modules: Vec<String>,
}

/// Produces the compiled artifact from the views directory.
///
/// Every build runs in a fresh temporary directory under the build root:
/// the entry module and merged manifest are written there, the host's
/// dependency cache is copied in, and the compiler output is persisted
/// atomically into the output directory.
pub struct ArtifactBuilder {
    options: EngineOptions,
    compiler: Arc<dyn ViewCompiler>,
    template: Arc<dyn EntryTemplate>,
    engine_manifest: Manifest,
}

impl ArtifactBuilder {
    pub fn new(
        options: EngineOptions,
        compiler: Arc<dyn ViewCompiler>,
        template: Arc<dyn EntryTemplate>,
        engine_manifest: Manifest,
    ) -> Self {
        Self {
            options,
            compiler,
            template,
            engine_manifest,
        }
    }

    pub async fn build(&self) -> Result<CompiledArtifact, EngineError> {
        let started = Instant::now();
        let (entry, build_dir) = tokio::join!(self.render_entry_module(), self.prepare_build_dir());

        let outcome = match (entry, build_dir) {
            (Ok((source, modules)), Ok(build_dir)) => {
                let outcome = self.compile_in(build_dir.path(), &source, &modules).await;
                remove_build_dir(build_dir).await;
                outcome
            }
            (Err(err), Ok(build_dir)) => {
                remove_build_dir(build_dir).await;
                Err(err)
            }
            (_, Err(err)) => Err(err),
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(artifact) => info!(
                target = TARGET,
                op = "builder::build",
                result = "ok",
                artifact = %artifact.path.display(),
                digest = %artifact.digest,
                modules = artifact.modules.len(),
                elapsed_ms,
                "Views compiled"
            ),
            Err(err) => warn!(
                target = TARGET,
                op = "builder::build",
                result = "error",
                error_code = err.code(),
                error = %err,
                elapsed_ms,
                "Views failed to compile"
            ),
        }
        outcome
    }

    async fn render_entry_module(&self) -> Result<(String, Vec<EntryModule>), EngineError> {
        let files =
            discover_view_files(self.options.views_dir(), self.options.source_extension()).await?;
        let names = extract_module_names(&files).await?;
        let modules = entry_modules(&names);
        debug!(
            target = TARGET,
            op = "builder::render_entry_module",
            modules = modules.len(),
            "Discovered view modules"
        );

        let source = self
            .template
            .render(&modules)
            .map_err(|err| EngineError::Template {
                source: Arc::new(err),
            })?;
        Ok((source, modules))
    }

    async fn prepare_build_dir(&self) -> Result<TempDir, EngineError> {
        let build_root = self.options.build_root();
        fs::create_dir_all(build_root)
            .await
            .map_err(|err| EngineError::io("create build root", build_root, err))?;
        let build_dir = tempfile::Builder::new()
            .prefix(BUILD_DIR_PREFIX)
            .tempdir_in(build_root)
            .map_err(|err| EngineError::io("create build directory", build_root, err))?;

        let source = self.options.host_dependency_path();
        let destination = build_dir.path().join(self.options.dependency_dir());
        copy_dependency_cache(source, destination).await;
        Ok(build_dir)
    }

    async fn compile_in(
        &self,
        build_dir: &Path,
        entry_source: &str,
        modules: &[EntryModule],
    ) -> Result<CompiledArtifact, EngineError> {
        let host_manifest = self.load_host_manifest().await?;
        let host_root = std::path::absolute(self.options.project_root())
            .map_err(|err| EngineError::io("resolve project root", self.options.project_root(), err))?;
        let build_root = std::path::absolute(build_dir)
            .map_err(|err| EngineError::io("resolve build directory", build_dir, err))?;
        let merged = merge(&self.engine_manifest, &host_manifest, &host_root, &build_root);

        let manifest_path = build_dir.join(self.options.manifest_file());
        let manifest_json = merged.to_json().map_err(|err| EngineError::ManifestInvalid {
            path: manifest_path.clone(),
            source: Arc::new(err),
        })?;
        fs::write(&manifest_path, manifest_json)
            .await
            .map_err(|err| EngineError::io("write merged manifest", &manifest_path, err))?;

        let entry_path =
            build_dir.join(format!("{ENTRY_MODULE_STEM}.{}", self.options.source_extension()));
        fs::write(&entry_path, entry_source)
            .await
            .map_err(|err| EngineError::io("write entry module", &entry_path, err))?;

        let artifact_source = self
            .compiler
            .compile(&entry_path, build_dir)
            .await
            .map_err(EngineError::views_do_not_compile)?;

        let path = self.persist_artifact(artifact_source.clone()).await?;
        Ok(CompiledArtifact {
            path,
            digest: artifact_digest(artifact_source.as_bytes()),
            modules: modules.iter().map(|module| module.name.clone()).collect(),
        })
    }

    async fn load_host_manifest(&self) -> Result<Manifest, EngineError> {
        let path = self.options.host_manifest_path();
        let raw = fs::read_to_string(&path)
            .await
            .map_err(|err| EngineError::ManifestNotFound {
                path: path.clone(),
                source: Arc::new(err),
            })?;
        Manifest::from_json(&raw).map_err(|err| EngineError::ManifestInvalid {
            path,
            source: Arc::new(err),
        })
    }

    async fn persist_artifact(&self, source: String) -> Result<PathBuf, EngineError> {
        let output_dir = self.options.output_dir().to_path_buf();
        let artifact_path = self.options.artifact_path();
        fs::create_dir_all(&output_dir)
            .await
            .map_err(|err| EngineError::io("create output directory", &output_dir, err))?;

        let target = artifact_path.clone();
        task::spawn_blocking(move || -> std::io::Result<()> {
            let mut staged = tempfile::Builder::new()
                .prefix(ARTIFACT_TEMP_PREFIX)
                .tempfile_in(&output_dir)?;
            staged.write_all(source.as_bytes())?;
            staged.as_file().sync_all()?;
            staged.persist(&target).map_err(|err| err.error)?;
            Ok(())
        })
        .await
        .map_err(|err| EngineError::io("persist artifact", &artifact_path, std::io::Error::other(err)))?
        .map_err(|err| EngineError::io("persist artifact", &artifact_path, err))?;

        Ok(artifact_path)
    }
}

/// Hex-encoded SHA-256 of artifact contents.
pub fn artifact_digest(contents: &[u8]) -> String {
    hex::encode(Sha256::digest(contents))
}

/// Copy the host's dependency cache into the build directory so the
/// compiler does not resolve packages again. Failures only cost time.
async fn copy_dependency_cache(source: PathBuf, destination: PathBuf) {
    if !fs::try_exists(&source).await.unwrap_or(false) {
        debug!(
            target = TARGET,
            op = "builder::copy_dependency_cache",
            result = "skipped",
            source = %source.display(),
            "No dependency cache to copy"
        );
        return;
    }

    let started = Instant::now();
    let outcome = task::spawn_blocking(move || copy_tree(&source, &destination)).await;
    match outcome {
        Ok(Ok(files)) => debug!(
            target = TARGET,
            op = "builder::copy_dependency_cache",
            result = "ok",
            files,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Copied dependency cache"
        ),
        Ok(Err(err)) => warn!(
            target = TARGET,
            op = "builder::copy_dependency_cache",
            result = "error",
            error = %err,
            "Failed to copy dependency cache; compiler will fetch packages"
        ),
        Err(err) => warn!(
            target = TARGET,
            op = "builder::copy_dependency_cache",
            result = "error",
            error = %err,
            "Dependency cache copy task failed"
        ),
    }
}

fn copy_tree(source: &Path, destination: &Path) -> std::io::Result<usize> {
    let mut files = 0;
    for entry in WalkDir::new(source).follow_links(true) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(std::io::Error::other)?;
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
            files += 1;
        }
    }
    Ok(files)
}

async fn remove_build_dir(build_dir: TempDir) {
    let path = build_dir.path().to_path_buf();
    match task::spawn_blocking(move || build_dir.close()).await {
        Ok(Ok(())) => debug!(
            target = TARGET,
            op = "builder::remove_build_dir",
            result = "ok",
            path = %path.display(),
            "Removed build directory"
        ),
        Ok(Err(err)) => warn!(
            target = TARGET,
            op = "builder::remove_build_dir",
            result = "error",
            path = %path.display(),
            error = %err,
            "Failed to remove build directory"
        ),
        Err(err) => warn!(
            target = TARGET,
            op = "builder::remove_build_dir",
            result = "error",
            path = %path.display(),
            error = %err,
            "Build directory cleanup task failed"
        ),
    }
}
