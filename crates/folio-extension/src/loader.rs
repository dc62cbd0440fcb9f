//! Module loader: fetch, instantiate and account for every theme and plugin.
//!
//! Failures are contained per module. A module that cannot be fetched,
//! fails validation, times out or whose factory errors is reported through
//! the caller's error callback and recorded in the [`LoadReport`]; the
//! remaining modules still load.
//!
//! The factory timeout only fires at an await point. A native factory that
//! awaits is cut off; a WASM factory runs synchronously inside its sandbox,
//! so it is bounded by the sandbox fuel limit instead.

use std::any::Any;
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;

use crate::artifact::{
    ArtifactLoader, HostHandle, HttpArtifactSource, StyleRegistry, WasmArtifactLoader,
    DEFAULT_MAX_WASM_SIZE_MB,
};
use crate::capabilities::Capabilities;
use crate::error::ExtensionError;
use crate::manifest::ModuleDescriptor;
use crate::sandbox::SandboxConfig;

// ─── Configuration ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Upper bound for fetching a module's entry and styles (default: 30s).
    pub fetch_timeout: Duration,
    /// Upper bound for a module's factory, `None` to wait forever (default: 10s).
    pub factory_timeout: Option<Duration>,
    /// Maximum WASM binary size in bytes (default: 50 MB).
    pub max_wasm_size: u64,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(30),
            factory_timeout: Some(Duration::from_secs(10)),
            max_wasm_size: DEFAULT_MAX_WASM_SIZE_MB * 1024 * 1024,
        }
    }
}

impl LoaderConfig {
    /// Build config from environment variables.
    ///
    /// `MODULE_FACTORY_TIMEOUT_SECS=0` disables the factory timeout.
    pub fn from_env() -> Self {
        let fetch_secs = std::env::var("MODULE_FETCH_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30);
        let factory_secs = std::env::var("MODULE_FACTORY_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10);
        let max_size_mb = std::env::var("MODULE_MAX_SIZE_MB")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_MAX_WASM_SIZE_MB);

        Self {
            fetch_timeout: Duration::from_secs(fetch_secs),
            factory_timeout: (factory_secs > 0).then(|| Duration::from_secs(factory_secs)),
            max_wasm_size: max_size_mb * 1024 * 1024,
        }
    }
}

// ─── Options & report ───────────────────────────────────────────────────

/// Receives one human-readable message per failed module.
pub type ErrorFn = dyn Fn(&str) + Send + Sync;

#[derive(Clone, Default)]
pub struct LoadOptions {
    /// Instantiate strictly in order, each module settled before the next.
    pub sync: bool,
    on_error: Option<Arc<ErrorFn>>,
}

impl std::fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadOptions")
            .field("sync", &self.sync)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl LoadOptions {
    pub fn sequential() -> Self {
        Self {
            sync: true,
            on_error: None,
        }
    }

    pub fn concurrent() -> Self {
        Self {
            sync: false,
            on_error: None,
        }
    }

    pub fn with_sync(mut self, sync: bool) -> Self {
        self.sync = sync;
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Send `message` down the error path (also used for missing modules).
    pub fn report_error(&self, message: &str) {
        tracing::warn!("{message}");
        if let Some(on_error) = &self.on_error {
            on_error(message);
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadedModule {
    pub module_name: String,
    pub is_theme: bool,
    pub styles: usize,
    pub loaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadFailure {
    pub module_name: String,
    pub message: String,
}

/// Outcome of one `load` call, in descriptor order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub loaded: Vec<LoadedModule>,
    pub failures: Vec<LoadFailure>,
}

impl LoadReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn loaded_names(&self) -> Vec<&str> {
        self.loaded.iter().map(|m| m.module_name.as_str()).collect()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

// ─── Loader ─────────────────────────────────────────────────────────────

pub struct ModuleLoader {
    artifacts: Arc<dyn ArtifactLoader>,
    host: HostHandle,
    config: LoaderConfig,
    styles: Arc<StyleRegistry>,
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("host", &self.host)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ModuleLoader {
    pub fn new(artifacts: Arc<dyn ArtifactLoader>, host: HostHandle, config: LoaderConfig) -> Self {
        Self {
            artifacts,
            host,
            config,
            styles: Arc::new(StyleRegistry::default()),
        }
    }

    /// A loader for WASM modules fetched over HTTP or from disk.
    pub fn wasm(
        host: HostHandle,
        config: LoaderConfig,
        sandbox: SandboxConfig,
    ) -> Result<Self, ExtensionError> {
        let source = HttpArtifactSource::new(config.fetch_timeout)?;
        let artifacts = WasmArtifactLoader::new(source, sandbox, config.max_wasm_size);
        Ok(Self::new(Arc::new(artifacts), host, config))
    }

    /// Stylesheets of every module loaded so far.
    pub fn styles(&self) -> Arc<StyleRegistry> {
        Arc::clone(&self.styles)
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Load `descriptors` against the shared surface `caps`.
    ///
    /// Every descriptor is attempted once; a name seen earlier in the same
    /// batch is reported as a failure instead of instantiated twice.
    pub async fn load(
        &self,
        descriptors: &[ModuleDescriptor],
        caps: &Capabilities,
        options: LoadOptions,
    ) -> LoadReport {
        let mut report = LoadReport::default();
        let mut seen = HashSet::new();
        let mut attempts = Vec::with_capacity(descriptors.len());

        for descriptor in descriptors {
            if seen.insert(descriptor.module_name.as_str()) {
                attempts.push(descriptor);
            } else {
                let err = ExtensionError::InvalidDescriptor(format!(
                    "duplicate module name '{}' in one load",
                    descriptor.module_name
                ));
                self.record(&mut report, &options, descriptor, Err(err));
            }
        }

        tracing::info!(
            modules = attempts.len(),
            sync = options.sync,
            "loading modules"
        );

        if options.sync {
            for descriptor in attempts {
                let result = self.load_one(descriptor, caps).await;
                self.record(&mut report, &options, descriptor, result);
            }
        } else {
            let results = futures::future::join_all(
                attempts
                    .iter()
                    .map(|descriptor| self.load_one(descriptor, caps)),
            )
            .await;
            for (descriptor, result) in attempts.into_iter().zip(results) {
                self.record(&mut report, &options, descriptor, result);
            }
        }

        report
    }

    fn record(
        &self,
        report: &mut LoadReport,
        options: &LoadOptions,
        descriptor: &ModuleDescriptor,
        result: Result<LoadedModule, ExtensionError>,
    ) {
        match result {
            Ok(loaded) => {
                tracing::info!(
                    module = %loaded.module_name,
                    theme = loaded.is_theme,
                    "module loaded"
                );
                report.loaded.push(loaded);
            }
            Err(e) => {
                let message = format!("module '{}' failed to load: {e}", descriptor.module_name);
                options.report_error(&message);
                report.failures.push(LoadFailure {
                    module_name: descriptor.module_name.clone(),
                    message,
                });
            }
        }
    }

    async fn load_one(
        &self,
        descriptor: &ModuleDescriptor,
        caps: &Capabilities,
    ) -> Result<LoadedModule, ExtensionError> {
        let name = &descriptor.module_name;
        descriptor.validate()?;

        if let Some(required) = descriptor.version_requirement()? {
            let provided = caps.version();
            if !required.matches(&provided) {
                return Err(ExtensionError::IncompatibleModule {
                    module: name.clone(),
                    required: required.to_string(),
                    provided: provided.to_string(),
                });
            }
        }

        let artifact = tokio::time::timeout(
            self.config.fetch_timeout,
            self.artifacts.resolve(descriptor),
        )
        .await
        .map_err(|_| ExtensionError::Timeout {
            what: format!("fetching module {name}"),
            seconds: self.config.fetch_timeout.as_secs(),
        })??;

        // A panicking factory fails its own module only. Builds with
        // `panic = "abort"` never get here.
        let instantiate = AssertUnwindSafe(artifact.factory.instantiate(&self.host, caps))
            .catch_unwind()
            .map(|caught| {
                caught.unwrap_or_else(|payload| {
                    Err(ExtensionError::factory(
                        name,
                        format!("panicked: {}", panic_message(&*payload)),
                    ))
                })
            });
        let outcome = match self.config.factory_timeout {
            Some(limit) => tokio::time::timeout(limit, instantiate).await.map_err(|_| {
                ExtensionError::Timeout {
                    what: format!("factory of module {name}"),
                    seconds: limit.as_secs(),
                }
            })?,
            None => instantiate.await,
        };
        outcome.map_err(|e| match e {
            ExtensionError::Factory { .. } => e,
            other => ExtensionError::factory(name, other.to_string()),
        })?;

        let styles = artifact.styles.len();
        self.styles.add(artifact.styles);

        Ok(LoadedModule {
            module_name: name.clone(),
            is_theme: descriptor.is_theme,
            styles,
            loaded_at: Utc::now(),
        })
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────
