use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// URL prefix stored avatars are served under.
    pub public_prefix: String,
    pub max_upload_bytes: u64,
    pub request_timeout_secs: u64,
    pub username: String,
    pub password: String,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Avatar ingest server")]
pub struct Args {
    /// Host to bind to (overrides AVATAR_STUDIO_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides AVATAR_STUDIO_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where uploaded avatars are stored (overrides AVATAR_STUDIO_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides AVATAR_STUDIO_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// URL prefix for stored avatars (overrides AVATAR_STUDIO_PUBLIC_PREFIX)
    #[arg(long)]
    pub public_prefix: Option<String>,

    /// Upload ceiling in bytes (overrides AVATAR_STUDIO_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<u64>,

    /// Per-request timeout in seconds (overrides AVATAR_STUDIO_REQUEST_TIMEOUT_SECS)
    #[arg(long)]
    pub request_timeout_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 15 * 1024 * 1024;

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 4000,
            storage_dir: "./uploads".into(),
            database_url: "sqlite://./data/avatar_studio.db".into(),
            public_prefix: "/uploads".into(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            request_timeout_secs: 60,
            username: "admin".into(),
            password: "password".into(),
        }
    }
}

/// Read and parse an optional environment variable.
fn env_parsed<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let defaults = Self::default();

        // --- Environment fallback ---
        let env_host = env_parsed::<String>("AVATAR_STUDIO_HOST")?.unwrap_or(defaults.host);
        let env_port = env_parsed::<u16>("AVATAR_STUDIO_PORT")?.unwrap_or(defaults.port);
        let env_storage =
            env_parsed::<String>("AVATAR_STUDIO_STORAGE_DIR")?.unwrap_or(defaults.storage_dir);
        let env_db =
            env_parsed::<String>("AVATAR_STUDIO_DATABASE_URL")?.unwrap_or(defaults.database_url);
        let env_prefix = env_parsed::<String>("AVATAR_STUDIO_PUBLIC_PREFIX")?
            .unwrap_or(defaults.public_prefix);
        let env_max = env_parsed::<u64>("AVATAR_STUDIO_MAX_UPLOAD_BYTES")?
            .unwrap_or(defaults.max_upload_bytes);
        let env_timeout = env_parsed::<u64>("AVATAR_STUDIO_REQUEST_TIMEOUT_SECS")?
            .unwrap_or(defaults.request_timeout_secs);
        let username =
            env_parsed::<String>("AVATAR_STUDIO_USERNAME")?.unwrap_or(defaults.username);
        let password = match env_parsed::<String>("AVATAR_STUDIO_PASSWORD")? {
            Some(password) => password,
            None => {
                tracing::warn!("AVATAR_STUDIO_PASSWORD not set, using the built-in default");
                defaults.password
            }
        };

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            public_prefix: normalize_prefix(&args.public_prefix.unwrap_or(env_prefix)),
            max_upload_bytes: args.max_upload_bytes.unwrap_or(env_max),
            request_timeout_secs: args.request_timeout_secs.unwrap_or(env_timeout),
            username,
            password,
        };

        if cfg.max_upload_bytes == 0 {
            anyhow::bail!("max upload size must be greater than zero");
        }

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// `uploads/` or `/uploads/` both become `/uploads`.
pub fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() {
        "/uploads".into()
    } else {
        format!("/{}", trimmed)
    }
}
