//! Project manifests and the merge that produces the generated build's manifest.

use std::{
    collections::BTreeMap,
    path::{Component, Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Dependency and source-path declaration of a project.
///
/// Only the fields the engine rewrites are typed; every other field is kept
/// verbatim so the compiler sees the manifest it expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Manifest {
    #[serde(rename = "source-directories", default)]
    pub source_directories: Vec<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Manifest {
    pub fn from_json(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Manifest of the generated entry project: the build directory itself
    /// plus the packages the entry module and worker ports rely on.
    pub fn engine_default() -> Self {
        let mut extra = Map::new();
        extra.insert("version".into(), Value::from("1.0.0"));
        extra.insert(
            "summary".into(),
            Value::from("Views compiled for server-side rendering"),
        );
        extra.insert(
            "repository".into(),
            Value::from("https://github.com/user/project.git"),
        );
        extra.insert("license".into(), Value::from("BSD3"));
        extra.insert("exposed-modules".into(), Value::Array(Vec::new()));
        extra.insert(
            "elm-version".into(),
            Value::from("0.18.0 <= v < 0.19.0"),
        );

        let dependencies = [
            ("elm-lang/core", "5.1.1 <= v < 6.0.0"),
            ("elm-lang/html", "2.0.0 <= v < 3.0.0"),
            ("eeue56/elm-server-side-renderer", "1.0.0 <= v < 2.0.0"),
        ]
        .into_iter()
        .map(|(name, range)| (name.to_string(), range.to_string()))
        .collect();

        Self {
            source_directories: vec![".".to_string()],
            dependencies,
            extra,
        }
    }
}

/// Merge the host project's manifest into the engine's own.
///
/// Dependencies are unioned with the engine's pinned versions winning on
/// overlap. Host source directories are resolved against `host_root`, made
/// relative to `build_dir` and appended after the engine's directories.
/// Neither input is modified.
pub fn merge(engine: &Manifest, host: &Manifest, host_root: &Path, build_dir: &Path) -> Manifest {
    let mut dependencies = host.dependencies.clone();
    dependencies.extend(
        engine
            .dependencies
            .iter()
            .map(|(name, version)| (name.clone(), version.clone())),
    );

    let mut source_directories = engine.source_directories.clone();
    source_directories.extend(
        host.source_directories
            .iter()
            .map(|dir| rebase_source_dir(dir, host_root, build_dir)),
    );

    Manifest {
        source_directories,
        dependencies,
        extra: engine.extra.clone(),
    }
}

fn rebase_source_dir(dir: &str, host_root: &Path, build_dir: &Path) -> String {
    let declared = Path::new(dir);
    let absolute = if declared.is_absolute() {
        normalize(declared)
    } else {
        normalize(&host_root.join(declared))
    };

    let rebased = pathdiff::diff_paths(&absolute, normalize(build_dir)).unwrap_or(absolute);
    if rebased.as_os_str().is_empty() {
        return ".".to_string();
    }
    rebased.to_string_lossy().into_owned()
}

/// Lexically resolve `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let ends_with_normal =
                    matches!(normalized.components().next_back(), Some(Component::Normal(_)));
                if ends_with_normal {
                    normalized.pop();
                } else if !normalized.has_root() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}
