use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";

/// Pacing and retry knobs for the dispatch engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Base pacing delay between consecutive sends.
    pub base_delay: Duration,
    /// Batches longer than this are processed in chunks of this size.
    pub chunk_size: usize,
    /// Constant wait before the first send of every chunk after the first.
    pub chunk_delay: Duration,
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Fixed wait between attempts for the same request.
    pub retry_backoff: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(5000),
            chunk_size: 10,
            chunk_delay: Duration::from_millis(30_000),
            max_retries: 3,
            retry_backoff: Duration::from_millis(2000),
        }
    }
}

/// Top-level relay configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Default API base URL. A local override in `settings.json` wins.
    pub api_url: String,
    /// Directory holding `ledger.json`, `settings.json` and `token`.
    pub data_dir: PathBuf,
    pub poll_interval: Duration,
    /// Timeout applied to every fetch and status push.
    pub request_timeout: Duration,
    pub probe_interval: Duration,
    /// Program invoked as `<cmd> <phone_number> <body>` to send a message.
    pub send_command: Option<String>,
    /// Static bearer token. When unset the token is read from `data_dir/token`.
    pub token: Option<String>,
    pub dispatch: DispatchConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            data_dir: PathBuf::from("./data"),
            poll_interval: Duration::from_secs(15),
            request_timeout: Duration::from_secs(10),
            probe_interval: Duration::from_secs(10),
            send_command: None,
            token: None,
            dispatch: DispatchConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Trim whitespace and trailing slashes so paths can be appended with `/`.
pub fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

impl RelayConfig {
    /// Load config from `SMSRELAY_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let dispatch_defaults = DispatchConfig::default();

        let dispatch = DispatchConfig {
            base_delay: env_parse("SMSRELAY_BASE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(dispatch_defaults.base_delay),
            chunk_size: env_parse::<usize>("SMSRELAY_CHUNK_SIZE")
                .filter(|n| *n > 0)
                .unwrap_or(dispatch_defaults.chunk_size),
            chunk_delay: env_parse("SMSRELAY_CHUNK_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(dispatch_defaults.chunk_delay),
            max_retries: env_parse("SMSRELAY_MAX_RETRIES").unwrap_or(dispatch_defaults.max_retries),
            retry_backoff: env_parse("SMSRELAY_RETRY_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(dispatch_defaults.retry_backoff),
        };

        Self {
            api_url: env_non_empty("SMSRELAY_API_URL")
                .map(|u| normalize_base_url(&u))
                .unwrap_or(defaults.api_url),
            data_dir: env_non_empty("SMSRELAY_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            poll_interval: env_parse::<u64>("SMSRELAY_POLL_INTERVAL_SECS")
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.poll_interval),
            request_timeout: env_parse::<u64>("SMSRELAY_REQUEST_TIMEOUT_SECS")
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            probe_interval: env_parse::<u64>("SMSRELAY_PROBE_INTERVAL_SECS")
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.probe_interval),
            send_command: env_non_empty("SMSRELAY_SEND_COMMAND"),
            token: env_non_empty("SMSRELAY_TOKEN"),
            dispatch,
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("ledger.json")
    }

    pub fn token_path(&self) -> PathBuf {
        self.data_dir.join("token")
    }
}
