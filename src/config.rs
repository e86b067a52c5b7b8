use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use std::{env, fs, path::Path};

const DEFAULT_MAX_OBJECT_BYTES: u64 = 1024 * 1024 * 1024;

/// Centralized application configuration.
/// Combines CLI arguments, environment variables and an optional JSON file.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub max_object_bytes: u64,
    pub log_file: Option<String>,
}

/// What to do after loading configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Serve,
    /// Apply the index schema and exit.
    Migrate,
    /// Reconcile blob storage against the index and exit.
    Reconcile,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Flat-namespace file object store")]
pub struct Args {
    /// Host to bind to (overrides FILE_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where objects are stored (overrides FILE_STORE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides FILE_STORE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Largest accepted upload in bytes (overrides FILE_STORE_MAX_OBJECT_BYTES)
    #[arg(long)]
    pub max_object_bytes: Option<u64>,

    /// Append logs to this file instead of stderr (overrides FILE_STORE_LOG_FILE)
    #[arg(long)]
    pub log_file: Option<String>,

    /// JSON config file with `UploadDir` and `DbPath` keys
    #[arg(long)]
    pub config: Option<String>,

    /// Run migrations and exit
    #[arg(long, conflicts_with = "reconcile")]
    pub migrate: bool,

    /// Remove orphaned blobs, report dangling records, and exit
    #[arg(long)]
    pub reconcile: bool,
}

/// On-disk JSON configuration, keyed the way `config.json` always was.
#[derive(Deserialize, Debug, Default, PartialEq, Eq)]
pub struct FileConfig {
    #[serde(rename = "UploadDir")]
    pub upload_dir: Option<String>,
    #[serde(rename = "DbPath")]
    pub db_path: Option<String>,
}

impl FileConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing config file {}", path.display()))
    }
}

impl AppConfig {
    /// Parse CLI args + environment (+ config file) into AppConfig and run mode.
    pub fn from_env_and_args() -> Result<(Self, RunMode)> {
        Self::resolve(Args::parse(), |key| env::var(key))
    }

    /// Merge sources, highest precedence first: CLI, environment, config
    /// file, defaults. `lookup` reads one environment variable.
    pub fn resolve<F>(args: Args, lookup: F) -> Result<(Self, RunMode)>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };

        // --- Environment fallback ---
        let env_host = lookup("FILE_STORE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = parse_env(&lookup, "FILE_STORE_PORT")?.unwrap_or(8080);
        let env_max = parse_env(&lookup, "FILE_STORE_MAX_OBJECT_BYTES")?
            .unwrap_or(DEFAULT_MAX_OBJECT_BYTES);
        let env_storage = lookup("FILE_STORE_STORAGE_DIR").unwrap_or_else(|_| {
            file.upload_dir
                .clone()
                .unwrap_or_else(|| "./data/objects".into())
        });
        let env_db = lookup("FILE_STORE_DATABASE_URL").unwrap_or_else(|_| {
            file.db_path
                .as_ref()
                .map(|path| format!("sqlite://{}", path))
                .unwrap_or_else(|| "sqlite://./data/meta/file_store.db".into())
        });
        let env_log = lookup("FILE_STORE_LOG_FILE").ok();

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            max_object_bytes: args.max_object_bytes.unwrap_or(env_max),
            log_file: args.log_file.or(env_log),
        };

        let mode = if args.migrate {
            RunMode::Migrate
        } else if args.reconcile {
            RunMode::Reconcile
        } else {
            RunMode::Serve
        };

        Ok((cfg, mode))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_env<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Result<String, env::VarError>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}
