//! Configuration manager for portrait.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::FromRef;
use serde::{Deserialize, Serialize};

use crate::AppState;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const DEFAULT_PORT: u16 = 3000;
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// TCP port to listen on.
    pub port: u16,
    #[serde(skip)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to PostgreSQL configuration.
    #[serde(skip_serializing)]
    pub postgres: Option<Postgres>,
    /// Related to photo storage.
    pub storage: Storage,
    /// Related to logs, traces and metrics.
    pub telemetry: Telemetry,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_owned(),
            port: DEFAULT_PORT,
            version: VERSION.to_owned(),
            path: PathBuf::default(),
            postgres: None,
            storage: Storage::default(),
            telemetry: Telemetry::default(),
        }
    }
}

/// PostgreSQL configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
pub struct Postgres {
    /// Hostname:(?port) for PostgreSQL instance.
    pub address: String,
    /// Database name.
    pub database: Option<String>,
    /// Username credential to connect.
    pub username: Option<String>,
    /// Password credential to connect.
    pub password: Option<String>,
    /// Maximum pool connections.
    pub pool_size: Option<u32>,
    /// PEM bundle used to verify the server. Enables TLS.
    pub ca_certificate: Option<PathBuf>,
}

/// Photo storage configuration.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Storage {
    /// Directory of stored photos.
    pub directory: PathBuf,
    /// Directory where uploads wait before being resized.
    pub staging: PathBuf,
    /// Width of stored photos.
    pub width: u32,
    /// Height of stored photos.
    pub height: u32,
    /// Seconds allowed to list the directory or to resize a photo.
    pub timeout: u64,
    /// Maximum request body size, in bytes.
    pub max_upload_size: usize,
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("photos"),
            staging: PathBuf::from("uploads"),
            width: 300,
            height: 300,
            timeout: 5,
            max_upload_size: 10 * 1024 * 1024, // 10 MiB.
        }
    }
}

impl Storage {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Telemetry configuration.
#[derive(Debug, Default, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Telemetry {
    /// Expose Prometheus metrics on `/metrics`.
    pub metrics: bool,
}

impl FromRef<AppState> for Arc<Configuration> {
    fn from_ref(state: &AppState) -> Arc<Configuration> {
        Arc::clone(&state.config)
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location, then applies environment overrides.
    pub fn read(self) -> Self {
        let file_path = if self.path.is_file() {
            &self.path
        } else {
            &Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        let config = match File::open(file_path) {
            Ok(file) => match serde_yaml::from_reader::<_, Configuration>(file) {
                Ok(config) => Self {
                    version: VERSION.to_owned(),
                    path: file_path.clone(),
                    ..config
                },
                Err(err) => self.error(err),
            },
            Err(err) => self.error(err),
        };

        config.with_env(|key| std::env::var(key).ok())
    }

    /// Override values with `PORT` and `DB_*` variables.
    ///
    /// `DB_HOST` alone is enough to create the `postgres` section.
    pub fn with_env<F>(mut self, var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = var("PORT").and_then(|port| port.parse().ok()) {
            self.port = port;
        }

        if let Some(host) = var("DB_HOST") {
            let postgres = self.postgres.get_or_insert_with(Postgres::default);
            postgres.address = match var("DB_PORT") {
                Some(port) => format!("{host}:{port}"),
                None => host,
            };
        }

        if let Some(postgres) = self.postgres.as_mut() {
            if let Some(username) = var("DB_USER") {
                postgres.username = Some(username);
            }
            if let Some(password) = var("DB_PASSWORD") {
                postgres.password = Some(password);
            }
            if let Some(database) = var("DB_DATABASE") {
                postgres.database = Some(database);
            }
            if let Some(ca) = var("DB_CA") {
                postgres.ca_certificate = Some(PathBuf::from(ca));
            }
        }

        self
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "`config.yaml` file not found or invalid");
        Self::default()
    }
}
