//! database (db) union structure.
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};

use crate::config::Postgres;

pub const DEFAULT_CREDENTIALS: &str = "postgres";
pub const DEFAULT_DATABASE_NAME: &str = "portrait";
pub const DEFAULT_POOL_SIZE: u32 = 10;
const DEFAULT_PORT: u16 = 5432;

/// Connection pool shared by every request.
#[derive(Clone)]
pub struct Database {
    pub postgres: PgPool,
}

impl Database {
    /// Init database connections.
    pub async fn new(config: &Postgres) -> Result<Self, sqlx::Error> {
        let options = connect_options(config)?;
        let database = options.get_database().unwrap_or_default().to_owned();

        let postgres = PgPoolOptions::new()
            .max_connections(config.pool_size.unwrap_or(DEFAULT_POOL_SIZE))
            .connect_with(options)
            .await?;

        tracing::info!(address = %config.address, db = %database, "postgres connected");

        Ok(Self { postgres })
    }
}

/// Build connection options from configuration.
///
/// A CA certificate switches the connection to verified TLS.
fn connect_options(config: &Postgres) -> Result<PgConnectOptions, sqlx::Error> {
    let (host, port) = match config.address.rsplit_once(':') {
        Some((host, port)) => {
            let port = port
                .parse::<u16>()
                .map_err(|err| sqlx::Error::Configuration(Box::new(err)))?;
            (host, port)
        },
        None => (config.address.as_str(), DEFAULT_PORT),
    };

    let options = PgConnectOptions::new()
        .host(host)
        .port(port)
        .username(config.username.as_deref().unwrap_or(DEFAULT_CREDENTIALS))
        .password(config.password.as_deref().unwrap_or(DEFAULT_CREDENTIALS))
        .database(
            config
                .database
                .as_deref()
                .unwrap_or(DEFAULT_DATABASE_NAME),
        );

    Ok(match &config.ca_certificate {
        Some(ca) => options.ssl_mode(PgSslMode::VerifyFull).ssl_root_cert(ca),
        None => options,
    })
}
