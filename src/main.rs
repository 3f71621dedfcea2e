use std::{
    io::{self, Write},
    process,
    sync::Arc,
};

use serde_json::Value;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;
use vista::{
    ViewEngine,
    application::error::{AppError, error_chain},
    config::{self, Command, RenderArgs, Settings},
    configure,
    infra::{self, telemetry},
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let causes = error_chain(error).join(": ");
    if dispatcher::has_been_set() {
        error!(error = %causes, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %causes, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(Command::Compile);

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        Command::Compile => run_compile(settings).await,
        Command::Render(args) => run_render(settings, args).await,
    }
}

fn build_engine(settings: &Settings) -> Result<Arc<ViewEngine>, AppError> {
    let collaborators = infra::production_collaborators(settings)?;
    Ok(Arc::new(ViewEngine::new(
        settings.engine_options(),
        collaborators,
    )))
}

async fn run_compile(settings: Settings) -> Result<(), AppError> {
    let engine = build_engine(&settings)?;
    let artifact = engine.compile().await?;
    info!(
        target = "vista::compile",
        op = "compile",
        result = "ok",
        artifact = %artifact.path.display(),
        digest = %artifact.digest,
        modules = artifact.modules.len(),
        "Views compiled successfully"
    );
    Ok(())
}

async fn run_render(settings: Settings, args: RenderArgs) -> Result<(), AppError> {
    let context = match args.context.as_deref() {
        Some(raw) => serde_json::from_str(raw)
            .map_err(|err| AppError::validation(format!("--context is not valid JSON: {err}")))?,
        None => Value::Null,
    };

    let engine = configure(build_engine(&settings)?, None).await?;
    let rendered = engine.get_view(&args.name, context).await;
    engine.shutdown().await;
    let html = rendered?;

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{html}")
        .map_err(|err| AppError::unexpected(format!("failed to write output: {err}")))?;
    Ok(())
}
