use std::{
    env, fs, io::ErrorKind, ops::Deref, str::FromStr, sync::Arc,
    time::Duration,
};

use tracing::info;

use crate::{
    client::Client,
    dao::{MemoryStore, SubscriptionStore},
    error::Error,
    handler::{LogMessageHandler, MessageHandler, RecordDocumentHandler},
    migration::run_migrations,
    provider::{DatabasePool, HTTP},
    rate_limit::RateLimiter,
};

#[derive(Debug)]
pub struct AppState<T>(Arc<T>);

impl<T> AppState<T> {
    pub fn new(state: T) -> AppState<T> {
        AppState(Arc::new(state))
    }
}

impl<T> Clone for AppState<T> {
    fn clone(&self) -> AppState<T> {
        AppState(Arc::clone(&self.0))
    }
}

impl<T> Deref for AppState<T> {
    type Target = Arc<T>;

    fn deref(&self) -> &Arc<T> {
        &self.0
    }
}

pub struct State {
    pub config: Config,
    pub database: Option<DatabasePool>,
    pub client: Client,
}

impl State {
    pub async fn new(
        config: Config,
        database: Option<DatabasePool>,
        http: HTTP,
    ) -> Result<State, Error> {
        if let Some(database) = &database {
            run_migrations(&database.pool).await?;
        }

        let store: Arc<dyn SubscriptionStore> = match &database {
            Some(database) => Arc::new(database.subscription.clone()),
            None => {
                info!("DATABASE_URL is not set, keeping subscriptions in memory");
                Arc::new(MemoryStore::new())
            },
        };

        let log: Arc<dyn MessageHandler> = Arc::new(LogMessageHandler);
        let on_message: Arc<dyn MessageHandler> =
            match (config.record_documents, &database) {
                (false, _) => log,
                (true, Some(database)) => Arc::new(RecordDocumentHandler::new(
                    database.document.clone(),
                    log,
                )),
                (true, None) => {
                    return Err(Error::ConfigurationError(String::from(
                        "RECORD_DOCUMENTS requires DATABASE_URL",
                    )));
                },
            };

        let limiter = Arc::new(RateLimiter::new(
            config.rate_limit_capacity,
            config.refresh_interval(),
        ));

        let client = Client::new(
            &config.callback_url(),
            store,
            http,
            limiter,
            config.max_workers,
            on_message,
        );

        Ok(State {
            config,
            database,
            client,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub server_host: String,
    pub port: u16,
    pub callback_base_url: String,
    pub callback_path: String,
    pub refresh_interval_in_minutes: u64,
    pub force_refresh_on_start: bool,
    pub timeout: u64,
    pub max_workers: usize,
    pub rate_limit_capacity: u64,
    pub max_body_size: usize,
    pub record_documents: bool,
}

impl Config {
    /// Externally reachable url the callback scope is mounted under; each
    /// subscription's callback url is this plus `/{id}`.
    pub fn callback_url(&self) -> String {
        format!("{}{}", self.callback_base_url, self.callback_path)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_in_minutes * 60)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: None,
            server_host: String::from("127.0.0.1"),
            port: 8080,
            callback_base_url: String::from("http://127.0.0.1:8080"),
            callback_path: String::from("/pubsub"),
            refresh_interval_in_minutes: 60,
            force_refresh_on_start: false,
            timeout: 30,
            max_workers: 20,
            rate_limit_capacity: 4,
            max_body_size: 4 * 1024 * 1024,
            record_documents: false,
        }
    }
}

fn optional_var(key: &str) -> Result<Option<String>, Error> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => {
            Ok(Some(value.trim().to_owned()))
        },
        Ok(_) | Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn var_or<T>(key: &str, default: T) -> Result<T, Error>
where
    T: FromStr,
    Error: From<T::Err>,
{
    match optional_var(key)? {
        Some(value) => Ok(value.parse()?),
        None => Ok(default),
    }
}

fn normalize_path(path: &str) -> String {
    let path = path.trim().trim_matches('/');

    if path.is_empty() {
        return String::new();
    }

    format!("/{}", path)
}

pub fn get_configuration() -> Result<Config, Error> {
    let defaults = Config::default();

    let database_url = optional_var("DATABASE_URL")?;
    let server_host =
        optional_var("SERVER_HOST")?.unwrap_or(defaults.server_host);
    let port: u16 = var_or("PORT", defaults.port)?;
    let callback_base_url: String = env::var("CALLBACK_BASE_URL")?;
    let callback_base_url =
        callback_base_url.trim().trim_end_matches('/').to_owned();
    let callback_path =
        optional_var("CALLBACK_PATH")?.unwrap_or(defaults.callback_path);
    let callback_path = normalize_path(&callback_path);
    let refresh_interval_in_minutes: u64 = var_or(
        "REFRESH_INTERVAL_IN_MINUTES",
        defaults.refresh_interval_in_minutes,
    )?;
    let force_refresh_on_start =
        var_or("FORCE_REFRESH_ON_START", defaults.force_refresh_on_start)?;
    let timeout: u64 = var_or("TIMEOUT", defaults.timeout)?;
    let max_workers: usize = var_or("MAX_WORKERS", defaults.max_workers)?;
    let rate_limit_capacity: u64 =
        var_or("RATE_LIMIT_CAPACITY", defaults.rate_limit_capacity)?;
    let max_body_size: usize =
        var_or("MAX_BODY_SIZE", defaults.max_body_size)?;
    let record_documents =
        var_or("RECORD_DOCUMENTS", defaults.record_documents)?;

    url::Url::parse(&callback_base_url)?;

    if refresh_interval_in_minutes == 0 {
        return Err(Error::ConfigurationError(String::from(
            "REFRESH_INTERVAL_IN_MINUTES must be greater than 0",
        )));
    }

    if max_workers == 0 {
        return Err(Error::ConfigurationError(String::from(
            "MAX_WORKERS must be greater than 0",
        )));
    }

    let config = Config {
        database_url,
        server_host,
        port,
        callback_base_url,
        callback_path,
        refresh_interval_in_minutes,
        force_refresh_on_start,
        timeout,
        max_workers,
        rate_limit_capacity,
        max_body_size,
        record_documents,
    };

    Ok(config)
}

/// Loads `.env` from the crate directory into the process environment.
/// Variables that are already set win over the file.
pub fn set_configuration() -> Result<(), Error> {
    let config_file: &str = ".env";

    let directory = env!("CARGO_MANIFEST_DIR");
    let path = format!("{}/{}", directory, config_file);

    let config_string = match fs::read_to_string(path) {
        Ok(config_string) => config_string,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    for (key, value) in parse_config_string(&config_string) {
        if env::var_os(key).is_none() {
            env::set_var(key, value);
        }
    }

    Ok(())
}

fn parse_config_string(config: &str) -> Vec<(&str, &str)> {
    config
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim().trim_matches('"')))
        .collect()
}
