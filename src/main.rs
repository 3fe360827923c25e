use clap::{ArgAction, Parser, Subcommand};
use recipe_sync::config::{self, RuntimeEnv, SyncConfig};
use recipe_sync::output;
use recipe_sync::pages::StaticPageWriter;
use recipe_sync::render::MarkdownRenderer;
use recipe_sync::source::{GithubSource, RateLimitedTransport, ReqwestFetch};
use recipe_sync::store::LocalStore;
use recipe_sync::sync::{self, SyncEngine};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

fn version_string() -> &'static str {
    let on_tag = env!("ON_RELEASE_TAG");
    if on_tag == "true" {
        env!("CARGO_PKG_VERSION")
    } else {
        let hash = env!("GIT_HASH");
        if hash.is_empty() {
            "dev@unknown"
        } else {
            // Leaked once at startup, called exactly once
            Box::leak(format!("dev@{hash}").into_boxed_str())
        }
    }
}

#[derive(Parser)]
#[command(name = "recipe-sync")]
#[command(about = "Keep a local recipe dataset in sync with its GitHub repository")]
#[command(long_about = "\
Keep a local recipe dataset in sync with its GitHub repository

Each run compares the version of the recipes/ and images/ subtrees upstream
with the versions recorded in meta.json, then does the least work possible:

  up to date          re-render static pages only
  upstream moved      fetch only the changed recipes and image listings
  no usable state     fetch everything

Output:

  src/generated/
  ├── recipes.json     # Dataset, sorted by name
  ├── meta.json        # Schema version, source versions, timestamp, count
  └── static/          # One index.html per recipe plus the index

Environment:
  GITHUB_TOKEN, GH_TOKEN, RECIPES_GITHUB_TOKEN   bearer token (first set wins)
  GENERATE_MAX_WAIT_MS                           longest rate-limit wait to sleep through
  CI                                             strict mode: fail instead of degrading

Run 'recipe-sync gen-config' to generate a documented sync.toml.")]
#[command(version = version_string())]
struct Cli {
    /// Config file (optional; stock defaults when missing)
    #[arg(long, default_value = "sync.toml", global = true)]
    config: PathBuf,

    /// Output directory, overrides output.dir
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Bring the local dataset up to date (default)
    Sync,
    /// Re-render static pages from the local dataset without network access
    Render,
    /// Show what the local dataset was generated from
    Status,
    /// Print a stock sync.toml with all options documented
    GenConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command.unwrap_or(Command::Sync) {
        Command::Sync => {
            let env = RuntimeEnv::from_env();
            let config = load(&cli.config, cli.output.as_deref(), &env)?;
            let store = LocalStore::new(&config.output);
            let pages = page_writer(&config, &store);

            let fetch = ReqwestFetch::new(
                config.transport.user_agent.clone(),
                env.token.clone(),
                config.transport.request_timeout(),
            )?;
            let transport = RateLimitedTransport::new(fetch, &config.transport, env.strict);
            let source = GithubSource::new(transport, &config.source, config.layout());
            info!(
                target: "recipe_sync",
                repo = %format!("{}/{}", config.source.owner, config.source.repo),
                branch = %config.source.branch,
                authenticated = env.token.is_some(),
                strict = env.strict,
                "starting sync"
            );

            let outcome = SyncEngine::new(&config, &source, &store, &pages)
                .strict(env.strict)
                .run()
                .await?;
            output::print_sync_outcome(&outcome, store.dataset_path());
        }
        Command::Render => {
            let config = load(&cli.config, cli.output.as_deref(), &RuntimeEnv::from_env())?;
            let store = LocalStore::new(&config.output);
            let pages = page_writer(&config, &store);
            let (documents, report) = sync::render_local(&store, &MarkdownRenderer, &pages)?;
            output::print_render_output(documents, &report, store.static_dir());
        }
        Command::Status => {
            let config = load(&cli.config, cli.output.as_deref(), &RuntimeEnv::from_env())?;
            let store = LocalStore::new(&config.output);
            let meta = store.read_meta();
            let documents = store.read_documents().map(|docs| docs.len());
            output::print_status(meta.as_ref(), documents, store.dataset_path());
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

/// `-v` and up override `RUST_LOG`; without it, `RUST_LOG` or `info`.
fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load(
    path: &Path,
    output_dir: Option<&Path>,
    env: &RuntimeEnv,
) -> Result<SyncConfig, config::ConfigError> {
    let mut config = config::load_config(path)?;
    env.apply(&mut config);
    if let Some(dir) = output_dir {
        config.output.dir = dir.to_path_buf();
    }
    Ok(config)
}

fn page_writer(config: &SyncConfig, store: &LocalStore) -> StaticPageWriter {
    StaticPageWriter::new(
        store.static_dir(),
        &config.output.site_base,
        &config.image_base_url(),
    )
}
