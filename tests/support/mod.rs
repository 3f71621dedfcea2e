//! In-process stand-ins for the external compiler and worker.
//!
//! `FixtureCompiler` resolves imports through the merged manifest the engine
//! writes, so missing source directories or modules fail the build the way a
//! real compiler would. View files carry their rendered output as comment
//! directives:
//!
//! ```text
//! module UsersView exposing (view, context)
//! -- html: <p>Hello {simpleName}</p>
//! -- requires: simpleName
//! -- delay-ms: 50
//! -- crash
//! ```
//!
//! The artifact is JSON that `FixtureRuntime` loads and serves.

#![allow(dead_code)]

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::sync::{Notify, mpsc};
use vista::{
    Collaborators, EngineOptions, ViewEngine,
    application::collaborators::{
        CompilerError, ViewCompiler, WorkerLoadError, WorkerPorts, WorkerRuntime,
    },
    domain::{Manifest, ViewRequest, ViewResponse},
    infra::template::AskamaEntryTemplate,
};

const PACKAGE_PREFIXES: [&str; 5] = ["Html", "Json", "Platform", "ServerSide", "Dict"];

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureView {
    pub module: String,
    pub html: String,
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub delay_ms: u64,
    #[serde(default)]
    pub crash: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureArtifact {
    pub ports: Vec<String>,
    pub views: BTreeMap<String, FixtureView>,
}

impl FixtureArtifact {
    pub fn read(path: &Path) -> Self {
        let raw = std::fs::read_to_string(path).expect("read artifact");
        serde_json::from_str(&raw).expect("parse artifact")
    }

    /// Replace the artifact in one rename so watchers never see a partial file.
    pub fn write(&self, path: &Path) {
        let raw = serde_json::to_string_pretty(self).expect("encode artifact");
        replace_file(path, &raw);
    }
}

pub fn replace_file(path: &Path, contents: &str) {
    let staging = path.with_extension("staging");
    std::fs::write(&staging, contents).expect("write staging file");
    std::fs::rename(&staging, path).expect("rename into place");
}

/// Compiler double. Optionally blocks until released so tests can observe
/// the engine mid-compilation.
#[derive(Default)]
pub struct FixtureCompiler {
    pub runs: AtomicUsize,
    gate: Option<Arc<Notify>>,
    started: Arc<Notify>,
}

impl FixtureCompiler {
    pub fn gated() -> (Self, Arc<Notify>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let started = Arc::new(Notify::new());
        (
            Self {
                runs: AtomicUsize::new(0),
                gate: Some(Arc::clone(&gate)),
                started: Arc::clone(&started),
            },
            gate,
            started,
        )
    }
}

#[async_trait]
impl ViewCompiler for FixtureCompiler {
    async fn compile(&self, entry: &Path, working_dir: &Path) -> Result<String, CompilerError> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let manifest_raw = std::fs::read_to_string(working_dir.join("elm-package.json"))
            .map_err(CompilerError::Io)?;
        let manifest = Manifest::from_json(&manifest_raw)
            .map_err(|err| CompilerError::Rejected(err.to_string()))?;
        let source_dirs: Vec<PathBuf> = manifest
            .source_directories
            .iter()
            .map(|dir| working_dir.join(dir))
            .collect();

        let entry_source = std::fs::read_to_string(entry).map_err(CompilerError::Io)?;
        let mut visited = BTreeSet::new();
        check_imports(&entry_source, &source_dirs, &mut visited)?;

        let mut views = BTreeMap::new();
        for (label, module) in dispatch_cases(&entry_source) {
            let source = resolve_module(&module, &source_dirs)
                .ok_or_else(|| CompilerError::Rejected(format!("I cannot find module '{module}'")))?;
            views.insert(label, parse_view(&module, &source));
        }

        let artifact = FixtureArtifact {
            ports: vec!["getView".into(), "receiveHtml".into()],
            views,
        };
        serde_json::to_string_pretty(&artifact).map_err(|err| CompilerError::Rejected(err.to_string()))
    }
}

fn imports(source: &str) -> Vec<String> {
    source
        .lines()
        .filter_map(|line| line.strip_prefix("import "))
        .filter_map(|rest| rest.split_whitespace().next())
        .map(String::from)
        .collect()
}

fn check_imports(
    source: &str,
    source_dirs: &[PathBuf],
    visited: &mut BTreeSet<String>,
) -> Result<(), CompilerError> {
    for module in imports(source) {
        let root = module.split('.').next().unwrap_or_default();
        if PACKAGE_PREFIXES.contains(&root) || !visited.insert(module.clone()) {
            continue;
        }
        let imported = resolve_module(&module, source_dirs)
            .ok_or_else(|| CompilerError::Rejected(format!("I cannot find module '{module}'")))?;
        check_imports(&imported, source_dirs, visited)?;
    }
    Ok(())
}

/// Find a module by its path-derived location, or by a header declaring it
/// directly inside a source directory.
fn resolve_module(module: &str, source_dirs: &[PathBuf]) -> Option<String> {
    let relative = format!("{}.elm", module.replace('.', "/"));
    for dir in source_dirs {
        if let Ok(source) = std::fs::read_to_string(dir.join(&relative)) {
            return Some(source);
        }
    }
    let header = format!("module {module} ");
    for dir in source_dirs {
        let Ok(entries) = std::fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.flatten() {
            if let Ok(source) = std::fs::read_to_string(entry.path()) {
                if source.starts_with(&header) {
                    return Some(source);
                }
            }
        }
    }
    None
}

/// Label → module pairs of the generated `renderView` dispatch.
fn dispatch_cases(entry_source: &str) -> Vec<(String, String)> {
    let lines: Vec<&str> = entry_source.lines().map(str::trim).collect();
    lines
        .windows(2)
        .filter_map(|pair| {
            let label = pair[0].strip_suffix(" ->")?.strip_prefix('"')?.strip_suffix('"')?;
            let module = pair[1]
                .strip_prefix("decodeAndRender ")?
                .split_whitespace()
                .next()?
                .strip_suffix(".context")?;
            Some((label.to_string(), module.to_string()))
        })
        .collect()
}

fn parse_view(module: &str, source: &str) -> FixtureView {
    let mut view = FixtureView {
        module: module.to_string(),
        ..FixtureView::default()
    };
    for line in source.lines() {
        let Some(directive) = line.strip_prefix("-- ") else {
            continue;
        };
        if let Some(html) = directive.strip_prefix("html: ") {
            view.html = html.to_string();
        } else if let Some(field) = directive.strip_prefix("requires: ") {
            view.requires.push(field.trim().to_string());
        } else if let Some(delay) = directive.strip_prefix("delay-ms: ") {
            view.delay_ms = delay.trim().parse().unwrap_or_default();
        } else if directive.trim() == "crash" {
            view.crash = true;
        }
    }
    view
}

/// Worker double serving a [`FixtureArtifact`]. Each request is answered
/// from its own task after the view's delay, so responses can overtake
/// each other.
#[derive(Default)]
pub struct FixtureRuntime {
    pub starts: AtomicUsize,
    pub requests: Arc<AtomicUsize>,
}

#[async_trait]
impl WorkerRuntime for FixtureRuntime {
    async fn start(&self, artifact: &Path) -> Result<WorkerPorts, WorkerLoadError> {
        let raw = tokio::fs::read_to_string(artifact)
            .await
            .map_err(WorkerLoadError::Unreadable)?;
        let compiled: FixtureArtifact = serde_json::from_str(&raw)
            .map_err(|err| WorkerLoadError::InvalidShape(err.to_string()))?;
        for port in ["getView", "receiveHtml"] {
            if !compiled.ports.iter().any(|declared| declared == port) {
                return Err(WorkerLoadError::MissingPort(port.to_string()));
            }
        }
        self.starts.fetch_add(1, Ordering::SeqCst);

        let (get_view, mut requests) = mpsc::unbounded_channel::<ViewRequest>();
        let (responses, receive_html) = mpsc::unbounded_channel();
        let views = Arc::new(compiled.views);
        let counter = Arc::clone(&self.requests);

        tokio::spawn(async move {
            while let Some(request) = requests.recv().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let view = views.get(&request.view_name).cloned();
                if view.as_ref().is_some_and(|view| view.crash) {
                    break;
                }
                let responses = responses.clone();
                tokio::spawn(async move {
                    let delay = view.as_ref().map_or(0, |view| view.delay_ms);
                    if delay > 0 {
                        tokio::time::sleep(Duration::from_millis(delay)).await;
                    }
                    let _ = responses.send(answer(&request, view.as_ref()));
                });
            }
        });

        Ok(WorkerPorts {
            get_view,
            receive_html,
        })
    }
}

fn answer(request: &ViewRequest, view: Option<&FixtureView>) -> ViewResponse {
    let Some(view) = view else {
        return ViewResponse::error(
            request.id,
            format!("View was not found: {}", request.view_name),
        );
    };

    let mut html = view.html.clone();
    for field in &view.requires {
        let Some(value) = request.context.get(field) else {
            return ViewResponse::error(
                request.id,
                format!("Invalid context for this view: Expecting an object with a field named `{field}`"),
            );
        };
        let text = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        html = html.replace(&format!("{{{field}}}"), &text);
    }
    ViewResponse::html(request.id, html)
}

/// A host project on disk with a views directory and an external source
/// directory the views import from.
pub struct Project {
    pub root: TempDir,
}

impl Project {
    pub fn new() -> Self {
        let root = TempDir::new().expect("project dir");
        let project = Self { root };

        project.write(
            "elm-package.json",
            &json!({
                "version": "1.0.0",
                "summary": "fixture",
                "source-directories": ["views", "external_views"],
                "dependencies": {
                    "elm-lang/core": "5.0.0 <= v < 6.0.0",
                    "NoRedInk/elm-decode-pipeline": "3.0.0 <= v < 4.0.0"
                },
                "elm-version": "0.18.0 <= v < 0.19.0"
            })
            .to_string(),
        );
        project.write(
            "external_views/Shared/Layout.elm",
            "module Shared.Layout exposing (wrap)\n\nimport Html exposing (Html)\n",
        );
        project.write(
            "views/UsersView.elm",
            "module UsersView exposing (view, context)\n-- html: <ul><li>Ada</li><li>Grace</li></ul>\n\nimport Html exposing (..)\nimport Shared.Layout\n",
        );
        project.write(
            "views/OtherView.elm",
            "module OtherView exposing (view, context)\n-- html: <p>Other</p>\n\nimport Html exposing (..)\n",
        );
        project.write(
            "views/HasContextView.elm",
            "module HasContextView exposing (view, context)\n-- html: <p>Hello {simpleName}</p>\n-- requires: simpleName\n\nimport Html exposing (..)\nimport Json.Decode exposing (..)\n",
        );
        project.write(
            "views/MultipartModule.elm",
            "module UI.MultipartModule exposing (view, context)\n-- html: <div>multipart</div>\n\nimport Html exposing (..)\n",
        );
        project.write(
            "views/SlowView.elm",
            "module SlowView exposing (view, context)\n-- html: <p>slow</p>\n-- delay-ms: 150\n\nimport Html exposing (..)\n",
        );
        project.write(
            "views/CrashView.elm",
            "module CrashView exposing (view, context)\n-- crash\n\nimport Html exposing (..)\n",
        );
        project.write("views/README.md", "not a view\n");
        project
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn views_dir(&self) -> PathBuf {
        self.path().join("views")
    }

    pub fn write(&self, relative: &str, contents: &str) {
        let path = self.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("create parent");
        }
        std::fs::write(path, contents).expect("write fixture file");
    }

    pub fn remove(&self, relative: &str) {
        std::fs::remove_file(self.path().join(relative)).expect("remove fixture file");
    }

    pub fn options(&self) -> EngineOptions {
        EngineOptions::new(self.views_dir(), self.path()).with_build_root(self.path().join("build"))
    }
}

pub struct Harness {
    pub project: Project,
    pub engine: Arc<ViewEngine>,
    pub compiler: Arc<FixtureCompiler>,
    pub runtime: Arc<FixtureRuntime>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_compiler(Project::new(), FixtureCompiler::default(), |options| options)
    }

    pub fn with_compiler(
        project: Project,
        compiler: FixtureCompiler,
        customize: impl FnOnce(EngineOptions) -> EngineOptions,
    ) -> Self {
        let compiler = Arc::new(compiler);
        let runtime = Arc::new(FixtureRuntime::default());
        let engine = Arc::new(ViewEngine::new(
            customize(project.options()),
            Collaborators {
                compiler: compiler.clone(),
                template: Arc::new(AskamaEntryTemplate),
                runtime: runtime.clone(),
                engine_manifest: Manifest::engine_default(),
            },
        ));
        Self {
            project,
            engine,
            compiler,
            runtime,
        }
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.engine.options().artifact_path()
    }
}

/// Poll `check` until it holds or the deadline passes.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
