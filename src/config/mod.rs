//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::{
    domain::options::{
        DEFAULT_ARTIFACT_FILE, DEFAULT_DEPENDENCY_DIR, DEFAULT_MANIFEST_FILE,
        DEFAULT_SOURCE_EXTENSION, EngineOptions,
    },
    infra::{
        compiler::{ENTRY_PLACEHOLDER, OUTPUT_PLACEHOLDER},
        process_worker::NODE_WORKER_HOST,
    },
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "vista";
const DEFAULT_VIEWS_DIR: &str = "views";
const DEFAULT_PROJECT_ROOT: &str = ".";
const DEFAULT_COMPILER_PROGRAM: &str = "elm-make";
const DEFAULT_WORKER_PROGRAM: &str = "node";
const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

fn default_compiler_args() -> Vec<String> {
    [ENTRY_PLACEHOLDER, "--yes", "--output", OUTPUT_PLACEHOLDER]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_worker_args() -> Vec<String> {
    vec!["-e".to_string(), NODE_WORKER_HOST.to_string()]
}

/// Command-line arguments for the `vista` binary.
#[derive(Debug, Parser)]
#[command(
    name = "vista",
    version,
    about = "Compile a directory of views and render them through a worker"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "VISTA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    /// Accepted before or after the subcommand.
    #[command(flatten)]
    pub overrides: EngineOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Compile the views directory into a loadable artifact. The default.
    Compile,
    /// Render one view and print the HTML to stdout.
    Render(RenderArgs),
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    /// Name of the view to render (module name or its unambiguous last segment).
    #[arg(value_name = "NAME")]
    pub name: String,

    /// Render context as a JSON document.
    #[arg(long, value_name = "JSON")]
    pub context: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct EngineOverrides {
    /// Directory holding the view modules. Also the output directory unless --out is given.
    #[arg(short = 'v', long = "views", global = true, value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub views: Option<PathBuf>,

    /// Root of the host project (where its manifest lives).
    #[arg(short = 'p', long = "project", global = true, value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub project: Option<PathBuf>,

    /// Directory the compiled artifact is written to.
    #[arg(short = 'o', long = "out", global = true, value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub out: Option<PathBuf>,

    /// Compile even when an artifact already exists.
    #[arg(long, global = true, action = clap::ArgAction::SetTrue)]
    pub force: bool,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        global = true,
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub engine: EngineSettings,
    pub compiler: CompilerSettings,
    pub worker: WorkerSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub views_dir: PathBuf,
    pub project_root: PathBuf,
    pub output_dir: PathBuf,
    pub force_compilation: bool,
    pub build_root: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CompilerSettings {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub source_extension: String,
    pub manifest_file: String,
    pub dependency_dir: String,
    pub artifact_file: String,
    /// Manifest used for the generated project instead of the built-in one.
    pub engine_manifest: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub handshake_timeout: Duration,
}

impl Settings {
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions::new(&self.engine.views_dir, &self.engine.project_root)
            .with_output_dir(&self.engine.output_dir)
            .with_force_compilation(self.engine.force_compilation)
            .with_build_root(&self.engine.build_root)
            .with_source_extension(&self.compiler.source_extension)
            .with_manifest_file(&self.compiler.manifest_file)
            .with_dependency_dir(&self.compiler.dependency_dir)
            .with_artifact_file(&self.compiler.artifact_file)
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("VISTA")
            .prefix_separator("_")
            .separator("__")
            .list_separator(" ")
            .with_list_parse_key("compiler.args")
            .with_list_parse_key("worker.args")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    raw.apply_engine_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    engine: RawEngineSettings,
    compiler: RawCompilerSettings,
    worker: RawWorkerSettings,
}

impl RawSettings {
    fn apply_engine_overrides(&mut self, overrides: &EngineOverrides) {
        if let Some(views) = overrides.views.as_ref() {
            self.engine.views_dir = Some(views.clone());
            if overrides.out.is_none() {
                self.engine.output_dir = Some(views.clone());
            }
        }
        if let Some(project) = overrides.project.as_ref() {
            self.engine.project_root = Some(project.clone());
        }
        if let Some(out) = overrides.out.as_ref() {
            self.engine.output_dir = Some(out.clone());
        }
        if overrides.force {
            self.engine.force_compilation = Some(true);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            engine,
            compiler,
            worker,
        } = raw;

        let logging = build_logging_settings(logging)?;
        let engine = build_engine_settings(engine)?;
        let compiler = build_compiler_settings(compiler)?;
        let worker = build_worker_settings(worker)?;

        Ok(Self {
            logging,
            engine,
            compiler,
            worker,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_engine_settings(engine: RawEngineSettings) -> Result<EngineSettings, LoadError> {
    let views_dir = non_empty_path(engine.views_dir, DEFAULT_VIEWS_DIR, "engine.views_dir")?;
    let project_root = non_empty_path(
        engine.project_root,
        DEFAULT_PROJECT_ROOT,
        "engine.project_root",
    )?;
    let output_dir = match engine.output_dir {
        Some(dir) if dir.as_os_str().is_empty() => {
            return Err(LoadError::invalid("engine.output_dir", "must not be empty"));
        }
        Some(dir) => dir,
        None => views_dir.clone(),
    };
    let build_root = engine
        .build_root
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(std::env::temp_dir);

    Ok(EngineSettings {
        views_dir,
        project_root,
        output_dir,
        force_compilation: engine.force_compilation.unwrap_or(false),
        build_root,
    })
}

fn build_compiler_settings(compiler: RawCompilerSettings) -> Result<CompilerSettings, LoadError> {
    let program = non_empty_path(compiler.program, DEFAULT_COMPILER_PROGRAM, "compiler.program")?;

    let args = compiler.args.unwrap_or_else(default_compiler_args);
    for placeholder in [ENTRY_PLACEHOLDER, OUTPUT_PLACEHOLDER] {
        if !args.iter().any(|arg| arg.contains(placeholder)) {
            return Err(LoadError::invalid(
                "compiler.args",
                format!("must reference {placeholder}"),
            ));
        }
    }

    let source_extension = compiler
        .source_extension
        .unwrap_or_else(|| DEFAULT_SOURCE_EXTENSION.to_string())
        .trim()
        .trim_start_matches('.')
        .to_string();
    if source_extension.is_empty() {
        return Err(LoadError::invalid(
            "compiler.source_extension",
            "must not be empty",
        ));
    }

    let manifest_file = file_name(
        compiler.manifest_file,
        DEFAULT_MANIFEST_FILE,
        "compiler.manifest_file",
    )?;
    let dependency_dir = file_name(
        compiler.dependency_dir,
        DEFAULT_DEPENDENCY_DIR,
        "compiler.dependency_dir",
    )?;
    let artifact_file = file_name(
        compiler.artifact_file,
        DEFAULT_ARTIFACT_FILE,
        "compiler.artifact_file",
    )?;

    Ok(CompilerSettings {
        program,
        args,
        source_extension,
        manifest_file,
        dependency_dir,
        artifact_file,
        engine_manifest: compiler
            .engine_manifest
            .filter(|path| !path.as_os_str().is_empty()),
    })
}

fn build_worker_settings(worker: RawWorkerSettings) -> Result<WorkerSettings, LoadError> {
    let program = non_empty_path(worker.program, DEFAULT_WORKER_PROGRAM, "worker.program")?;
    let handshake_secs = worker
        .handshake_timeout_seconds
        .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT_SECS);
    if handshake_secs == 0 {
        return Err(LoadError::invalid(
            "worker.handshake_timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(WorkerSettings {
        program,
        args: worker.args.unwrap_or_else(default_worker_args),
        handshake_timeout: Duration::from_secs(handshake_secs),
    })
}

fn non_empty_path(
    value: Option<PathBuf>,
    default: &str,
    key: &'static str,
) -> Result<PathBuf, LoadError> {
    let path = value.unwrap_or_else(|| PathBuf::from(default));
    if path.as_os_str().is_empty() {
        return Err(LoadError::invalid(key, "must not be empty"));
    }
    Ok(path)
}

fn file_name(value: Option<String>, default: &str, key: &'static str) -> Result<String, LoadError> {
    let name = value.unwrap_or_else(|| default.to_string());
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(LoadError::invalid(key, "must not be empty"));
    }
    if trimmed.contains(['/', '\\']) {
        return Err(LoadError::invalid(
            key,
            "must be a file name, not a path",
        ));
    }
    Ok(trimmed.to_string())
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEngineSettings {
    views_dir: Option<PathBuf>,
    project_root: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    force_compilation: Option<bool>,
    build_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCompilerSettings {
    program: Option<PathBuf>,
    args: Option<Vec<String>>,
    source_extension: Option<String>,
    manifest_file: Option<String>,
    dependency_dir: Option<String>,
    artifact_file: Option<String>,
    engine_manifest: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWorkerSettings {
    program: Option<PathBuf>,
    args: Option<Vec<String>>,
    handshake_timeout_seconds: Option<u64>,
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
