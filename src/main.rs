use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use launchpad::api::{self, ApiClient, ApiError, Backend, DatasetUpload, Table};
use launchpad::config::AppConfig;
use launchpad::form;
use launchpad::fragment::{DirFragmentSource, FragmentCache, FragmentSource, HttpFragmentSource};
use launchpad::record::Record;
use launchpad::route::{Route, RouteState};
use launchpad::view::{self, AppContext, ViewError};
use tracing::info;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    View(#[from] ViewError),
    #[error("unknown table `{0}`; expected job, prompt, prompt_chain or task")]
    UnknownTable(String),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("failed to read {path}: {source}")]
    ReadFile { path: String, source: io::Error },
}

#[derive(Parser, Debug)]
#[command(name = "launchpad", about = "Task launcher renderer and admin client")]
struct Cli {
    #[arg(long, env = "LAUNCHPAD_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "LAUNCHPAD_API_KEY")]
    api_key: Option<String>,

    #[arg(long, env = "LAUNCHPAD_COMPONENTS_DIR", help = "Read fragments from this directory")]
    components_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render a route to stdout, e.g. `?route=admin/prompt`.
    Render {
        query: String,
        #[arg(long, help = "Keep polling and re-print the page on every change")]
        watch: bool,
    },
    /// Create or update a record through its form.
    Submit {
        table: String,
        #[arg(long, help = "JSON object; an `id` selects update")]
        data: String,
    },
    /// Upload a dataset file from a task page.
    Upload {
        #[arg(long)]
        dataset_name: String,
        #[arg(long, default_value = "adwords")]
        route: String,
        file: PathBuf,
    },
    /// Print the logged-in profile.
    Profile,
}

struct CliContext {
    config: AppConfig,
    client: ApiClient,
    fragments: FragmentCache,
}

impl CliContext {
    fn app(&self, api_key: Option<&str>, poll: bool) -> AppContext {
        let client = api_key.map_or_else(|| self.client.clone(), |key| self.client.with_api_key(key));
        AppContext {
            fragments: self.fragments.clone(),
            backend: Arc::new(client),
            poll_interval: poll.then_some(self.config.poll_interval),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_writer(io::stderr).init();

    let cli = Cli::parse();
    let mut config = AppConfig::from_env();
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url.trim_end_matches('/').to_owned();
    }
    config.api_key = cli.api_key.or(config.api_key);
    config.components_dir = cli.components_dir.or(config.components_dir);

    let http = api::build_http(config.request_timeout, config.connect_timeout)?;
    let client = ApiClient::new(http.clone(), &config.base_url, config.api_key.clone())?;
    let source: Arc<dyn FragmentSource> = match &config.components_dir {
        Some(dir) => Arc::new(DirFragmentSource::new(dir)),
        None => Arc::new(HttpFragmentSource::new(http, &config.base_url)),
    };
    info!(base_url = %config.base_url, authenticated = client.has_api_key(), "launchpad starting");
    let ctx = CliContext { config, client, fragments: FragmentCache::new(source) };

    match cli.command {
        Command::Render { query, watch } => run_render(&ctx, &query, watch).await,
        Command::Submit { table, data } => run_submit(&ctx, &table, &data).await,
        Command::Upload { dataset_name, route, file } => run_upload(&ctx, dataset_name, &route, &file).await,
        Command::Profile => {
            let profile = ctx.client.profile().await?;
            print_record(&profile)
        }
    }
}

async fn run_render(ctx: &CliContext, query: &str, watch: bool) -> Result<(), CliError> {
    let state = RouteState::from_query(query);
    let app = ctx.app(state.api_key.as_deref(), watch);
    let mut view = view::dispatch(&app, &state).await?;
    println!("{}", view.html());
    if !watch || !view.is_polling() {
        return Ok(());
    }

    let mut changes = view.page().subscribe();
    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    break;
                }
                println!("{}", view.html());
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    view.stop();
    Ok(())
}

fn admin_route(table: Table) -> Option<Route> {
    match table {
        Table::Prompt => Some(Route::AdminPrompt),
        Table::PromptChain => Some(Route::AdminPromptChain),
        Table::Job | Table::Task => None,
    }
}

async fn run_submit(ctx: &CliContext, table: &str, data: &str) -> Result<(), CliError> {
    let table = Table::parse(table).ok_or_else(|| CliError::UnknownTable(table.to_owned()))?;
    let record: Record = serde_json::from_str(data)?;
    let app = ctx.app(None, false);

    let Some(route) = admin_route(table) else {
        let saved = form::submit_record(app.backend.as_ref(), table, record).await?;
        return print_record(&saved);
    };

    let state = RouteState { route, job_id: None, api_key: None };
    let mut view = view::dispatch(&app, &state).await?;
    match record.id() {
        Some(id) => view.open_edit(&id).await?,
        None => view.open_new()?,
    }
    for (field, value) in record.iter() {
        view.set_value(field, value.clone())?;
    }
    let saved = view.submit().await?;
    print_record(&saved)
}

async fn run_upload(ctx: &CliContext, dataset_name: String, route: &str, file: &Path) -> Result<(), CliError> {
    let bytes = tokio::fs::read(file)
        .await
        .map_err(|source| CliError::ReadFile { path: file.display().to_string(), source })?;
    let file_name = file
        .file_name()
        .map_or_else(|| "dataset".to_owned(), |name| name.to_string_lossy().into_owned());

    let state = RouteState { route: Route::parse(route), job_id: None, api_key: None };
    let view = view::dispatch(&ctx.app(None, false), &state).await?;
    let saved = view.upload(DatasetUpload { dataset_name, dataset_type: None, file_name, bytes }).await?;
    print_record(&saved)
}

fn print_record(record: &Record) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(record)?);
    Ok(())
}
