//! Host configuration, read from the environment (and `.env`).

use std::env;
use std::path::PathBuf;

use folio_extension::bootstrap::DEFAULT_ERROR_ROUTE;

#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Base URL of the blog backend, e.g. `https://blog.example.com/api`.
    /// Unset means a static site described by `modules_file`.
    pub api_base: Option<String>,
    /// TOML module list used when no backend is configured.
    pub modules_file: Option<PathBuf>,
    /// JSON file holding visitor preferences between runs.
    pub state_file: Option<PathBuf>,
    pub error_route: String,
    pub http_timeout_secs: u64,
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl HostConfig {
    pub fn from_env() -> Self {
        Self {
            api_base: non_empty("FOLIO_API_BASE").map(|v| v.trim_end_matches('/').to_string()),
            modules_file: non_empty("FOLIO_MODULES_FILE").map(PathBuf::from),
            state_file: non_empty("FOLIO_STATE_FILE").map(PathBuf::from),
            error_route: non_empty("FOLIO_ERROR_ROUTE")
                .unwrap_or_else(|| DEFAULT_ERROR_ROUTE.to_string()),
            http_timeout_secs: env::var("FOLIO_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
        }
    }
}
