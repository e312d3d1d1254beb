//! corral: inspect and drive a collection cache from the command line.
//!
//! Uses file-backed storage, so `fetch` followed by `show` works across
//! invocations the same way an application restart would.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use corral::{
    Clock, ConfigFile, Corral, FileStorage, HttpCollection, PersistentStore, ScopeKey, SystemClock,
};
use serde_json::Value;

/// Corral CLI
#[derive(Parser)]
#[command(name = "corral")]
#[command(version = corral::PKG_VERSION)]
#[command(about = "Shared stale-while-revalidate collection cache")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "CORRAL_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory (overrides the config file)
    #[arg(long, env = "CORRAL_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a scope's collection through the cache and print it
    Fetch {
        /// Scope key (e.g. a user id)
        scope: String,
        /// Collection URL; may contain `{scope}` (overrides the config file)
        #[arg(long, env = "CORRAL_URL")]
        url: Option<String>,
        /// Bearer token sent with every request
        #[arg(long, env = "CORRAL_TOKEN", hide_env_values = true)]
        token: Option<String>,
        /// Ignore cached data and always go to the network
        #[arg(short, long)]
        force: bool,
    },

    /// Print the persisted record for a scope without touching the network
    Show {
        /// Scope key
        scope: String,
    },

    /// Remove persisted data
    Clear {
        /// Only clear the record if it belongs to this scope
        scope: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: warn for CLI; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let file = ConfigFile::load(args.config.as_deref())?;
    let config = file.cache_config();
    let storage = Arc::new(match args.storage_dir.or_else(|| file.storage.dir.clone()) {
        Some(dir) => FileStorage::new(dir),
        None => FileStorage::default_location(),
    });
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match args.command {
        Command::Fetch {
            scope,
            url,
            token,
            force,
        } => {
            let (url, timeout) = match (url, &file.http) {
                (Some(url), http) => (url, http.as_ref().map_or(30, |h| h.timeout_secs)),
                (None, Some(http)) => (http.url.clone(), http.timeout_secs),
                (None, None) => {
                    return Err("no collection URL: pass --url or set [http] url".into());
                }
            };
            let mut http = HttpCollection::<Value>::with_timeout(url, Duration::from_secs(timeout))?;
            if let Some(token) = token {
                http = http.bearer_token(token);
            }

            let cache: Corral<Value> = Corral::builder()
                .http(http)
                .storage(storage)
                .clock(clock)
                .config(config)
                .build()?;

            let consumer = cache.mount(scope.as_str());
            consumer.refetch(force).await?;
            let snapshot = consumer.read();
            let items = snapshot.data.unwrap_or_default();
            println!("{}", serde_json::to_string_pretty(&*items)?);
            eprintln!("{} items for scope {scope}", items.len());
        }

        Command::Show { scope } => {
            let persistent: PersistentStore<Value> = PersistentStore::new(
                storage,
                Arc::clone(&clock),
                &config.namespace,
                config.persistent_ttl,
            );
            match persistent.get(&ScopeKey::from(scope.as_str())) {
                Some(record) => {
                    println!("{}", serde_json::to_string_pretty(&*record.data)?);
                    eprintln!(
                        "{} items for scope {}, {}s old",
                        record.data.len(),
                        record.scope,
                        clock.age(record.timestamp).as_secs()
                    );
                }
                None => eprintln!("nothing cached for scope {scope}"),
            }
        }

        Command::Clear { scope } => {
            let persistent: PersistentStore<Value> = PersistentStore::new(
                storage,
                clock,
                &config.namespace,
                config.persistent_ttl,
            );
            let cleared = match scope {
                Some(scope) => persistent.clear_scope(&ScopeKey::from(scope.as_str())),
                None => persistent.clear(),
            };
            if cleared {
                eprintln!("cleared {}", persistent.key());
            } else {
                eprintln!("nothing to clear");
            }
        }
    }

    Ok(())
}
