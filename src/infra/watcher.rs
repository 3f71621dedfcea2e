use std::{
    ffi::OsString,
    path::{Path, PathBuf},
};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use super::error::InfraError;

const TARGET: &str = "infra::watcher";

/// Watches the compiled artifact and calls back whenever it is written,
/// replaced or removed.
///
/// The artifact's parent directory is watched rather than the file itself so
/// atomic replacement (write to a sibling, then rename) is still observed.
/// Watching stops when the value is dropped.
pub struct InvalidationWatcher {
    _watcher: RecommendedWatcher,
    artifact: PathBuf,
}

impl InvalidationWatcher {
    pub fn watch<F>(artifact: &Path, on_change: F) -> Result<Self, InfraError>
    where
        F: Fn() + Send + 'static,
    {
        let file_name = artifact
            .file_name()
            .map(|name| name.to_os_string())
            .ok_or_else(|| {
                InfraError::configuration(format!(
                    "artifact path {} has no file name",
                    artifact.display()
                ))
            })?;
        let directory = match artifact.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) if names_artifact(&event, &file_name) => {
                    debug!(
                        target = TARGET,
                        op = "watcher::event",
                        kind = ?event.kind,
                        "Compiled artifact changed"
                    );
                    on_change();
                }
                Ok(_) => {}
                Err(err) => warn!(
                    target = TARGET,
                    op = "watcher::event",
                    result = "error",
                    error = %err,
                    "Artifact watcher reported an error"
                ),
            },
            Config::default(),
        )?;
        watcher.watch(&directory, RecursiveMode::NonRecursive)?;

        debug!(
            target = TARGET,
            op = "watcher::watch",
            artifact = %artifact.display(),
            directory = %directory.display(),
            "Watching compiled artifact"
        );

        Ok(Self {
            _watcher: watcher,
            artifact: artifact.to_path_buf(),
        })
    }

    pub fn artifact(&self) -> &Path {
        &self.artifact
    }
}

fn names_artifact(event: &Event, file_name: &OsString) -> bool {
    let relevant = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    relevant
        && event
            .paths
            .iter()
            .any(|path| path.file_name() == Some(file_name.as_os_str()))
}
