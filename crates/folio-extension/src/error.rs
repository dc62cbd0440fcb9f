//! Extension runtime error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtensionError {
    #[error("hook '{tag}' failed: {message}")]
    Hook { tag: String, message: String },

    #[error("invalid module descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("artifact fetch failed for {location}: {message}")]
    Fetch { location: String, message: String },

    #[error("WASM validation error: {0}")]
    WasmValidation(String),

    #[error("sandbox error: {0}")]
    Sandbox(String),

    #[error("execution timeout: module {0} exceeded fuel limit")]
    FuelExhausted(String),

    #[error("memory limit exceeded: module {0}")]
    MemoryExceeded(String),

    #[error("timed out after {seconds}s: {what}")]
    Timeout { what: String, seconds: u64 },

    #[error("module {module} requires capabilities {required}, host provides {provided}")]
    IncompatibleModule {
        module: String,
        required: String,
        provided: String,
    },

    #[error("module {module} failed: {message}")]
    Factory { module: String, message: String },

    #[error("module not found: {0}")]
    NotFound(String),

    #[error("route error: {0}")]
    Route(String),

    #[error("bootstrap step '{step}' failed: {message}")]
    Step { step: String, message: String },

    #[error("site API error: {0}")]
    SiteApi(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("semver error: {0}")]
    Semver(#[from] semver::Error),
}

impl ExtensionError {
    /// Shorthand for a callback failure on `tag`.
    pub fn hook(tag: &str, message: impl Into<String>) -> Self {
        Self::Hook {
            tag: tag.to_string(),
            message: message.into(),
        }
    }

    /// Shorthand for a module factory failure.
    pub fn factory(module: &str, message: impl Into<String>) -> Self {
        Self::Factory {
            module: module.to_string(),
            message: message.into(),
        }
    }

    /// Shorthand for a failed bootstrap step.
    pub fn step(step: &str, message: impl Into<String>) -> Self {
        Self::Step {
            step: step.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    // ── Display messages ──────────────────────────────────────────────

    #[test]
    fn test_display_hook() {
        let err = ExtensionError::hook("the_title", "boom");
        assert_eq!(err.to_string(), "hook 'the_title' failed: boom");
    }

    #[test]
    fn test_display_fetch() {
        let err = ExtensionError::Fetch {
            location: "https://cdn.example.com/theme.wasm".into(),
            message: "404 Not Found".into(),
        };
        assert_eq!(
            err.to_string(),
            "artifact fetch failed for https://cdn.example.com/theme.wasm: 404 Not Found"
        );
    }

    #[test]
    fn test_display_wasm_validation() {
        let err = ExtensionError::WasmValidation("missing factory export".into());
        assert_eq!(
            err.to_string(),
            "WASM validation error: missing factory export"
        );
    }

    #[test]
    fn test_display_fuel_exhausted() {
        let err = ExtensionError::FuelExhausted("comments".into());
        assert_eq!(
            err.to_string(),
            "execution timeout: module comments exceeded fuel limit"
        );
    }

    #[test]
    fn test_display_timeout() {
        let err = ExtensionError::Timeout {
            what: "fetch https://cdn.example.com/a.wasm".into(),
            seconds: 15,
        };
        assert_eq!(
            err.to_string(),
            "timed out after 15s: fetch https://cdn.example.com/a.wasm"
        );
    }

    #[test]
    fn test_display_incompatible_module() {
        let err = ExtensionError::IncompatibleModule {
            module: "gallery".into(),
            required: "^2".into(),
            provided: "1.0.0".into(),
        };
        assert_eq!(
            err.to_string(),
            "module gallery requires capabilities ^2, host provides 1.0.0"
        );
    }

    #[test]
    fn test_display_factory() {
        let err = ExtensionError::factory("seo", "panicked");
        assert_eq!(err.to_string(), "module seo failed: panicked");
    }

    #[test]
    fn test_display_step() {
        let err = ExtensionError::step("fetch-settings", "connection refused");
        assert_eq!(
            err.to_string(),
            "bootstrap step 'fetch-settings' failed: connection refused"
        );
    }

    // ── From conversions ──────────────────────────────────────────────

    #[test]
    fn test_from_io_error() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file missing");
        let err: ExtensionError = io_err.into();
        assert!(matches!(err, ExtensionError::Io(_)));
        assert!(err.to_string().contains("file missing"));
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<String>("bad json{{{").unwrap_err();
        let err: ExtensionError = json_err.into();
        assert!(matches!(err, ExtensionError::Serialization(_)));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= bad").unwrap_err();
        let err: ExtensionError = toml_err.into();
        assert!(matches!(err, ExtensionError::TomlParse(_)));
    }

    #[test]
    fn test_from_semver_error() {
        let sv_err = "not.a.version".parse::<semver::Version>().unwrap_err();
        let err: ExtensionError = sv_err.into();
        assert!(matches!(err, ExtensionError::Semver(_)));
    }

    // ── Error trait source chain ──────────────────────────────────────

    #[test]
    fn test_error_source_io() {
        use std::error::Error;
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "pipe broken");
        let err: ExtensionError = io_err.into();
        assert!(err.source().is_some());
    }

    #[test]
    fn test_error_source_string_variants() {
        use std::error::Error;
        let err = ExtensionError::Sandbox("trap".into());
        assert!(err.source().is_none());
    }
}
