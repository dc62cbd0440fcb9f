//! Extism host for compiled theme and plugin modules.
//!
//! A module gets one sandbox for its whole lifetime: the `factory` call and
//! every hook callback it later registers run in the same instance. Memory
//! is capped for the instance, fuel is refilled before each call. Calls are
//! synchronous, so fuel is the only bound on how long one can run.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::ExtensionError;

const WASM_PAGE_SIZE: usize = 64 * 1024;

// ─── Configuration ──────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Linear memory cap in bytes (default: 32 MB).
    pub memory_limit: usize,
    /// Instructions per call (default: 1_000_000).
    pub fuel_limit: u64,
    /// Expose WASI to modules (default: false, no env, fs or stdio).
    pub wasi_enabled: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_limit: 32 * 1024 * 1024,
            fuel_limit: 1_000_000,
            wasi_enabled: false,
        }
    }
}

fn env_number<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl SandboxConfig {
    /// `MODULE_MEMORY_LIMIT_MB`, `MODULE_FUEL_LIMIT`, `MODULE_WASI_ENABLED`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            memory_limit: env_number::<usize>("MODULE_MEMORY_LIMIT_MB")
                .map(|mb| mb * 1024 * 1024)
                .unwrap_or(defaults.memory_limit),
            fuel_limit: env_number("MODULE_FUEL_LIMIT").unwrap_or(defaults.fuel_limit),
            wasi_enabled: std::env::var("MODULE_WASI_ENABLED")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.wasi_enabled),
        }
    }

    /// The memory cap in WASM pages, at least one.
    pub fn memory_pages(&self) -> u32 {
        let pages = (self.memory_limit / WASM_PAGE_SIZE).max(1);
        u32::try_from(pages).unwrap_or(u32::MAX)
    }
}

/// Map an Extism call failure onto the error a load report should show.
fn classify_call_error(module: &str, message: String) -> ExtensionError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("fuel") {
        ExtensionError::FuelExhausted(module.to_string())
    } else if lower.contains("memory") {
        ExtensionError::MemoryExceeded(module.to_string())
    } else {
        ExtensionError::Sandbox(format!("{module}: {message}"))
    }
}

// ─── Sandbox ────────────────────────────────────────────────────────────

pub struct ModuleSandbox {
    plugin: extism::Plugin,
    config: SandboxConfig,
    module_name: String,
}

impl std::fmt::Debug for ModuleSandbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleSandbox")
            .field("module_name", &self.module_name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ModuleSandbox {
    /// Compile a fetched, already validated module.
    pub fn load_bytes(
        wasm_bytes: Vec<u8>,
        config: SandboxConfig,
        name: &str,
    ) -> Result<Self, ExtensionError> {
        if config.wasi_enabled {
            tracing::warn!(module = %name, "module runs with WASI enabled");
        }

        let manifest = extism::Manifest::new([extism::Wasm::data(wasm_bytes)])
            .with_memory_max(config.memory_pages());
        let plugin = extism::PluginBuilder::new(manifest)
            .with_wasi(config.wasi_enabled)
            .with_fuel_limit(config.fuel_limit)
            .build()
            .map_err(|e| ExtensionError::Sandbox(format!("{name}: {e}")))?;

        tracing::debug!(module = %name, pages = config.memory_pages(), "sandbox ready");
        Ok(Self {
            plugin,
            config,
            module_name: name.to_string(),
        })
    }

    pub fn call(&mut self, export: &str, input: &[u8]) -> Result<Vec<u8>, ExtensionError> {
        self.plugin
            .call::<&[u8], Vec<u8>>(export, input)
            .map_err(|e| classify_call_error(&self.module_name, e.to_string()))
    }

    /// JSON in, JSON out. A module that has nothing to answer may return an
    /// empty buffer, which decodes as `O::default()`.
    pub fn call_json<I: Serialize, O: DeserializeOwned + Default>(
        &mut self,
        export: &str,
        input: &I,
    ) -> Result<O, ExtensionError> {
        let output = self.call(export, &serde_json::to_vec(input)?)?;
        if output.iter().all(u8::is_ascii_whitespace) {
            return Ok(O::default());
        }
        Ok(serde_json::from_slice(&output)?)
    }

    pub fn has_function(&self, export: &str) -> bool {
        self.plugin.function_exists(export)
    }

    pub fn name(&self) -> &str {
        &self.module_name
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }
}
