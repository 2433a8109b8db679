use std::{env, io};

use tracing::debug;

const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_IMPORT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_AUTOCOMPLETE_DEBOUNCE_MS: u64 = 250;
const DEFAULT_OPTIONS_LIMIT: usize = 20;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub import_poll_interval_ms: u64,
    pub autocomplete_debounce_ms: u64,
    pub options_limit: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        Self {
            api_base_url: env::var("DASHBOARD_API_BASE")
                .ok()
                .map(|v| v.trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            request_timeout_secs: parse_u64("REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS),
            import_poll_interval_ms: parse_u64(
                "IMPORT_POLL_INTERVAL_MS",
                DEFAULT_IMPORT_POLL_INTERVAL_MS,
            )
            .max(50),
            autocomplete_debounce_ms: parse_u64(
                "AUTOCOMPLETE_DEBOUNCE_MS",
                DEFAULT_AUTOCOMPLETE_DEBOUNCE_MS,
            ),
            options_limit: parse_usize("OPTIONS_LIMIT", DEFAULT_OPTIONS_LIMIT).max(1),
        }
    }

    pub fn with_api_base(base: impl Into<String>) -> Self {
        let mut config = Self::from_env();
        config.api_base_url = base.into().trim_end_matches('/').to_string();
        config
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(default)
}
