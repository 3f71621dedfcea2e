//! Turning the views directory into a compiled artifact.

mod builder;
mod modules;
mod state;

pub use builder::{ArtifactBuilder, CompiledArtifact, artifact_digest};
pub use modules::{discover_view_files, entry_modules, extract_module_name};
pub use state::{CompilationState, CompilationStateCell, CompileGuard};
