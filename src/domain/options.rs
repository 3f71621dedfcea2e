use std::path::{Path, PathBuf};

pub const DEFAULT_SOURCE_EXTENSION: &str = "elm";
pub const DEFAULT_ARTIFACT_FILE: &str = "views.compiled.js";
pub const DEFAULT_MANIFEST_FILE: &str = "elm-package.json";
pub const DEFAULT_DEPENDENCY_DIR: &str = "elm-stuff";

/// Immutable engine configuration.
///
/// The output directory defaults to the views directory, so the compiled
/// artifact lands next to the sources it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    views_dir: PathBuf,
    project_root: PathBuf,
    output_dir: PathBuf,
    force_compilation: bool,
    build_root: PathBuf,
    source_extension: String,
    artifact_file: String,
    manifest_file: String,
    dependency_dir: String,
}

impl EngineOptions {
    pub fn new(views_dir: impl Into<PathBuf>, project_root: impl Into<PathBuf>) -> Self {
        let views_dir = views_dir.into();
        Self {
            output_dir: views_dir.clone(),
            views_dir,
            project_root: project_root.into(),
            force_compilation: false,
            build_root: std::env::temp_dir(),
            source_extension: DEFAULT_SOURCE_EXTENSION.to_string(),
            artifact_file: DEFAULT_ARTIFACT_FILE.to_string(),
            manifest_file: DEFAULT_MANIFEST_FILE.to_string(),
            dependency_dir: DEFAULT_DEPENDENCY_DIR.to_string(),
        }
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn with_force_compilation(mut self, force: bool) -> Self {
        self.force_compilation = force;
        self
    }

    /// Directory under which per-compile temporary build directories are created.
    pub fn with_build_root(mut self, build_root: impl Into<PathBuf>) -> Self {
        self.build_root = build_root.into();
        self
    }

    pub fn with_source_extension(mut self, extension: impl Into<String>) -> Self {
        self.source_extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    pub fn with_artifact_file(mut self, file_name: impl Into<String>) -> Self {
        self.artifact_file = file_name.into();
        self
    }

    pub fn with_manifest_file(mut self, file_name: impl Into<String>) -> Self {
        self.manifest_file = file_name.into();
        self
    }

    pub fn with_dependency_dir(mut self, dir_name: impl Into<String>) -> Self {
        self.dependency_dir = dir_name.into();
        self
    }

    pub fn views_dir(&self) -> &Path {
        &self.views_dir
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn force_compilation(&self) -> bool {
        self.force_compilation
    }

    pub fn build_root(&self) -> &Path {
        &self.build_root
    }

    pub fn source_extension(&self) -> &str {
        &self.source_extension
    }

    pub fn artifact_file(&self) -> &str {
        &self.artifact_file
    }

    pub fn manifest_file(&self) -> &str {
        &self.manifest_file
    }

    pub fn dependency_dir(&self) -> &str {
        &self.dependency_dir
    }

    /// Location of the persistent compiled artifact.
    pub fn artifact_path(&self) -> PathBuf {
        self.output_dir.join(&self.artifact_file)
    }

    pub fn host_manifest_path(&self) -> PathBuf {
        self.project_root.join(&self.manifest_file)
    }

    pub fn host_dependency_path(&self) -> PathBuf {
        self.project_root.join(&self.dependency_dir)
    }
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::new("views", ".")
    }
}
