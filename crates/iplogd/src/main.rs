// # iplogd - IPv4 log collector daemon
//
// This daemon is a thin integration layer. Scanning, classification,
// retries and scheduling live in iplog-core.
//
// The iplogd daemon is responsible for:
// 1. Reading configuration from environment variables
// 2. Initializing tracing and the runtime
// 3. Registering storage backends and creating the store, retrying while
//    it is unavailable
// 4. Starting the scan engine and stopping it on SIGINT/SIGTERM
//
// ## Configuration
//
// ### Storage
// - `IPLOG_STORE_TYPE`: Backend (mongodb, file, memory). Default: mongodb
// - `MONGODB_URI`: Connection string. Default: mongodb://mongodb:27017/
// - `DATABASE_NAME`: Database name. Default: ip_extraction
// - `IPLOG_STORE_PATH`: JSON file (for file store)
//
// ### Scanning
// - `IPLOG_FILE_PATH`: Log file to scan. Default: data/access.log
// - `IPLOG_INTERVAL_SECS`: Seconds between cycles. Default: 10
// - `IPLOG_CHUNK_SIZE`: Bytes per parse chunk. Default: 1048576
// - `IPLOG_WORKERS`: Parse threads (0 = one per core). Default: 0
// - `IPLOG_REJECT_LINK_LOCAL`: Drop 169.254.0.0/16. Default: false
// - `IPLOG_REJECT_LOOPBACK`: Drop 127.0.0.0/8. Default: false
//
// ### Retries
// - `IPLOG_RETRY_ATTEMPTS`: Attempts per storage operation. Default: 5
// - `IPLOG_RETRY_DELAY_MS`: First backoff delay. Default: 5000
// - `IPLOG_RETRY_MAX_DELAY_MS`: Backoff cap. Default: 60000
//
// ### Logging
// - `IPLOG_LOG_LEVEL`: trace, debug, info, warn, error. Default: info
//
// ## Example
//
// ```bash
// export MONGODB_URI=mongodb://localhost:27017/
// export IPLOG_FILE_PATH=/var/log/nginx/access.log
// export IPLOG_INTERVAL_SECS=30
//
// iplogd
// ```

use anyhow::{Context, Result};
use iplog_core::config::{
    CollectionNames, DEFAULT_DATABASE, DEFAULT_FILE_PATH, DEFAULT_MONGODB_URI, IplogConfig,
    RetryConfig, StorageConfig,
};
use iplog_core::{FilterPolicy, IpStore, RetryPolicy, ScanEngine, StoreRegistry};
use std::env;
use std::future::Future;
use std::pin::Pin;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum IplogExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<IplogExitCode> for ExitCode {
    fn from(code: IplogExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Daemon configuration as read from the environment
#[derive(Debug)]
struct Config {
    iplog: IplogConfig,
    log_level: Level,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through `lookup`, then validate it
    ///
    /// Unset variables take their defaults; set but unparsable ones are errors.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let mut iplog = IplogConfig::new();

        iplog.scan.file_path = var("IPLOG_FILE_PATH").unwrap_or_else(|| DEFAULT_FILE_PATH.to_string());
        if let Some(chunk_size) = parse_var(&var, "IPLOG_CHUNK_SIZE")? {
            iplog.scan.chunk_size = chunk_size;
        }
        if let Some(workers) = parse_var(&var, "IPLOG_WORKERS")? {
            iplog.scan.workers = workers;
        }
        if let Some(interval) = parse_var(&var, "IPLOG_INTERVAL_SECS")? {
            iplog.engine.interval_secs = interval;
        }

        iplog.filter = FilterPolicy {
            reject_link_local: parse_flag(&var, "IPLOG_REJECT_LINK_LOCAL")?,
            reject_loopback: parse_flag(&var, "IPLOG_REJECT_LOOPBACK")?,
        };

        let mut retry = RetryConfig::default();
        if let Some(attempts) = parse_var(&var, "IPLOG_RETRY_ATTEMPTS")? {
            retry.max_attempts = attempts;
        }
        if let Some(delay) = parse_var(&var, "IPLOG_RETRY_DELAY_MS")? {
            retry.initial_delay_ms = delay;
        }
        if let Some(max_delay) = parse_var(&var, "IPLOG_RETRY_MAX_DELAY_MS")? {
            retry.max_delay_ms = max_delay;
        }
        iplog.retry = retry;

        let store_type = var("IPLOG_STORE_TYPE").unwrap_or_else(|| "mongodb".to_string());
        iplog.storage = match store_type.to_lowercase().as_str() {
            "mongodb" => StorageConfig::Mongodb {
                uri: var("MONGODB_URI").unwrap_or_else(|| DEFAULT_MONGODB_URI.to_string()),
                database: var("DATABASE_NAME").unwrap_or_else(|| DEFAULT_DATABASE.to_string()),
                collections: CollectionNames::default(),
                timeout_secs: 5,
            },
            "file" => StorageConfig::File {
                path: var("IPLOG_STORE_PATH").with_context(|| {
                    "IPLOG_STORE_PATH is required when IPLOG_STORE_TYPE=file. \
                    Set it via: export IPLOG_STORE_PATH=/var/lib/iplog/ips.json"
                })?,
                collections: CollectionNames::default(),
            },
            "memory" => StorageConfig::Memory,
            other => anyhow::bail!(
                "IPLOG_STORE_TYPE '{}' is not supported. \
                Supported types: mongodb, file, memory",
                other
            ),
        };

        let log_level = match var("IPLOG_LOG_LEVEL").as_deref().map(str::to_lowercase) {
            None => Level::INFO,
            Some(level) => match level.as_str() {
                "trace" => Level::TRACE,
                "debug" => Level::DEBUG,
                "info" => Level::INFO,
                "warn" => Level::WARN,
                "error" => Level::ERROR,
                _ => anyhow::bail!(
                    "IPLOG_LOG_LEVEL '{}' is not valid. \
                    Valid levels: trace, debug, info, warn, error",
                    level
                ),
            },
        };

        iplog.validate()?;

        Ok(Self { iplog, log_level })
    }
}

/// Parse an optional numeric variable
fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} must be a number. Got '{}': {}", key, raw, e)),
    }
}

/// Parse an optional boolean variable (unset = false)
fn parse_flag(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<bool> {
    match var(key).as_deref().map(str::to_lowercase).as_deref() {
        None => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => anyhow::bail!("{} must be true or false. Got: {}", key, other),
    }
}

fn main() -> ExitCode {
    // Load and validate configuration from environment
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            return IplogExitCode::ConfigError.into();
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.log_level)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return IplogExitCode::ConfigError.into();
    }

    info!("Starting iplogd daemon");
    info!(
        "Configuration loaded: scanning {} every {}s into {} storage",
        config.iplog.scan.file_path,
        config.iplog.engine.interval_secs,
        config.iplog.storage.type_name()
    );

    // Enter tokio runtime
    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return IplogExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        match run_daemon(config).await {
            Ok(()) => IplogExitCode::CleanShutdown,
            Err(DaemonError::Startup(e)) => {
                error!("Startup error: {:#}", e);
                IplogExitCode::ConfigError
            }
            Err(DaemonError::Runtime(e)) => {
                error!("Daemon error: {:#}", e);
                IplogExitCode::RuntimeError
            }
        }
    });

    result.into()
}

/// Which phase a daemon failure happened in
enum DaemonError {
    Startup(anyhow::Error),
    Runtime(anyhow::Error),
}

/// Run the daemon
async fn run_daemon(config: Config) -> std::result::Result<(), DaemonError> {
    let registry = StoreRegistry::with_builtin();

    #[cfg(feature = "mongodb")]
    {
        info!("Registering MongoDB storage backend");
        iplog_store_mongodb::register(&registry);
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let policy = RetryPolicy::from(&config.iplog.retry);
    let store = create_store_with_retry(&registry, &config.iplog.storage, &policy, &mut shutdown)
        .await
        .context("Failed to create storage backend")
        .map_err(DaemonError::Startup)?;
    let Some(store) = store else {
        info!("Shutdown requested before the storage backend was ready");
        return Ok(());
    };

    // Nothing consumes engine events here; dropping the receiver disables them
    let (engine, _) = ScanEngine::new(store, config.iplog)
        .context("Failed to create scan engine")
        .map_err(DaemonError::Startup)?;

    engine
        .run_until(shutdown)
        .await
        .context("Scan engine failed")
        .map_err(DaemonError::Runtime)?;

    info!("iplogd stopped after {} cycle(s)", engine.cycles());
    Ok(())
}

/// Create the configured store, waiting out transient failures
///
/// Configuration errors are returned at once. Transient ones (a DNS lookup
/// or server that is not up yet) are retried with the policy's backoff
/// for as long as it takes. Returns `Ok(None)` if `shutdown` resolves first.
async fn create_store_with_retry<F>(
    registry: &StoreRegistry,
    storage: &StorageConfig,
    policy: &RetryPolicy,
    shutdown: &mut Pin<&mut F>,
) -> iplog_core::Result<Option<Arc<dyn IpStore>>>
where
    F: Future<Output = ()>,
{
    let mut attempt = 1;
    loop {
        let result = tokio::select! {
            biased;
            _ = shutdown.as_mut() => return Ok(None),
            result = registry.create_store(storage) => result,
        };

        match result {
            Ok(store) => return Ok(Some(store)),
            Err(e) if e.is_transient() => {
                let delay = policy.delay_after(attempt);
                warn!(
                    "Storage backend not ready (attempt {}): {}. Retrying in {:?}...",
                    attempt, e, delay
                );
                tokio::select! {
                    biased;
                    _ = shutdown.as_mut() => return Ok(None),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Resolve on SIGTERM or SIGINT
#[cfg(unix)]
async fn shutdown_signal() {
    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            error!("Failed to setup signal handlers: {}. Falling back to CTRL-C", e);
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to wait for CTRL-C: {}", e);
            }
            return;
        }
    };

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    info!("Received shutdown signal: {}", name);
}

/// Resolve on CTRL-C
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to wait for CTRL-C: {}", e);
    }
    info!("Received shutdown signal: SIGINT");
}
