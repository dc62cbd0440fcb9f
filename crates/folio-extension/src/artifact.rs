//! Artifact resolution: turning a [`ModuleDescriptor`] into something the
//! loader can instantiate.
//!
//! An [`ArtifactLoader`] fetches a module's entry and stylesheets and hands
//! back a [`ModuleFactory`]. Two loaders ship with the crate: the WASM
//! loader, which sandboxes remote binaries with Extism, and a static loader
//! for modules compiled into the host.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::capabilities::{CapabilitySnapshot, Capabilities};
use crate::error::ExtensionError;
use crate::hooks::Callback;
use crate::host_requests::{process_host_requests, FactoryResponse};
use crate::manifest::{ArtifactLocation, ModuleDescriptor};
use crate::sandbox::{ModuleSandbox, SandboxConfig};
use crate::state::ComponentRef;

// ─── Constants ──────────────────────────────────────────────────────────

/// WASM magic bytes: `\0asm`
const WASM_MAGIC: &[u8; 4] = b"\0asm";

/// Default max WASM binary size: 50 MB.
pub const DEFAULT_MAX_WASM_SIZE_MB: u64 = 50;

/// Name of the export every WASM module must provide.
pub const FACTORY_EXPORT: &str = "factory";

/// Allowed WASM import namespaces. Imports outside these are rejected.
const ALLOWED_IMPORT_NAMESPACES: &[&str] = &[
    "env",                    // Extism host functions
    "extism:host/env",        // Extism host functions (component model)
    "wasi_snapshot_preview1", // WASI preview 1 (if enabled in the sandbox)
    "wasi_unstable",          // Legacy WASI
];

// ─── Host handle & factories ────────────────────────────────────────────

/// What the host tells a module about itself at instantiation time.
#[derive(Debug, Clone, Serialize)]
pub struct HostHandle {
    pub name: String,
    pub version: String,
    /// Host components a module may reference by bare name.
    pub components: Vec<ComponentRef>,
}

impl HostHandle {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            components: Vec::new(),
        }
    }

    pub fn with_components(mut self, components: Vec<ComponentRef>) -> Self {
        self.components = components;
        self
    }
}

/// A module's entry point.
#[async_trait]
pub trait ModuleFactory: Send + Sync {
    async fn instantiate(&self, host: &HostHandle, caps: &Capabilities)
        -> Result<(), ExtensionError>;
}

struct FnFactory<F>(F);

#[async_trait]
impl<F> ModuleFactory for FnFactory<F>
where
    F: Fn(&HostHandle, &Capabilities) -> Result<(), ExtensionError> + Send + Sync,
{
    async fn instantiate(
        &self,
        host: &HostHandle,
        caps: &Capabilities,
    ) -> Result<(), ExtensionError> {
        (self.0)(host, caps)
    }
}

/// Wrap a synchronous closure as a [`ModuleFactory`].
pub fn factory_fn<F>(f: F) -> Arc<dyn ModuleFactory>
where
    F: Fn(&HostHandle, &Capabilities) -> Result<(), ExtensionError> + Send + Sync + 'static,
{
    Arc::new(FnFactory(f))
}

// ─── Styles ─────────────────────────────────────────────────────────────

/// A stylesheet shipped with a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StyleSheet {
    pub module_name: String,
    pub location: String,
    pub content: String,
}

/// Stylesheets of every successfully loaded module, in load order.
#[derive(Debug, Default)]
pub struct StyleRegistry {
    sheets: RwLock<Vec<StyleSheet>>,
}

impl StyleRegistry {
    pub fn add(&self, sheets: Vec<StyleSheet>) {
        self.sheets
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .extend(sheets);
    }

    pub fn sheets(&self) -> Vec<StyleSheet> {
        self.sheets
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn for_module(&self, module_name: &str) -> Vec<StyleSheet> {
        self.sheets()
            .into_iter()
            .filter(|s| s.module_name == module_name)
            .collect()
    }
}

// ─── Loaders ────────────────────────────────────────────────────────────

/// A resolved module: its factory plus fetched stylesheets.
pub struct LoadedArtifact {
    pub factory: Arc<dyn ModuleFactory>,
    pub styles: Vec<StyleSheet>,
}

impl std::fmt::Debug for LoadedArtifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedArtifact")
            .field("styles", &self.styles.len())
            .finish_non_exhaustive()
    }
}

/// Resolves descriptors into factories.
#[async_trait]
pub trait ArtifactLoader: Send + Sync {
    async fn resolve(&self, descriptor: &ModuleDescriptor)
        -> Result<LoadedArtifact, ExtensionError>;
}

/// Modules compiled into the host, looked up by name.
#[derive(Default)]
pub struct StaticArtifactLoader {
    factories: HashMap<String, Arc<dyn ModuleFactory>>,
}

impl StaticArtifactLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module_name: &str, factory: Arc<dyn ModuleFactory>) -> &mut Self {
        self.factories.insert(module_name.to_string(), factory);
        self
    }

    pub fn with(mut self, module_name: &str, factory: Arc<dyn ModuleFactory>) -> Self {
        self.register(module_name, factory);
        self
    }
}

#[async_trait]
impl ArtifactLoader for StaticArtifactLoader {
    async fn resolve(
        &self,
        descriptor: &ModuleDescriptor,
    ) -> Result<LoadedArtifact, ExtensionError> {
        let factory = self
            .factories
            .get(&descriptor.module_name)
            .cloned()
            .ok_or_else(|| ExtensionError::NotFound(descriptor.module_name.clone()))?;
        Ok(LoadedArtifact {
            factory,
            styles: Vec::new(),
        })
    }
}

// ─── Sources ────────────────────────────────────────────────────────────

/// Fetches raw artifact bytes.
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    async fn fetch(&self, location: &ArtifactLocation) -> Result<Vec<u8>, ExtensionError>;
}

/// Fetches `http(s)` URLs with reqwest and local paths with tokio fs.
#[derive(Debug, Clone)]
pub struct HttpArtifactSource {
    client: reqwest::Client,
}

impl HttpArtifactSource {
    pub fn new(timeout: Duration) -> Result<Self, ExtensionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("folio/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ArtifactSource for HttpArtifactSource {
    async fn fetch(&self, location: &ArtifactLocation) -> Result<Vec<u8>, ExtensionError> {
        match location {
            ArtifactLocation::Remote(url) => {
                let fetch_err = |message: String| ExtensionError::Fetch {
                    location: url.to_string(),
                    message,
                };
                let resp = self
                    .client
                    .get(url.clone())
                    .send()
                    .await
                    .map_err(|e| fetch_err(e.to_string()))?;
                let status = resp.status();
                if !status.is_success() {
                    return Err(fetch_err(format!("HTTP {status}")));
                }
                let bytes = resp.bytes().await.map_err(|e| fetch_err(e.to_string()))?;
                Ok(bytes.to_vec())
            }
            ArtifactLocation::Local(path) => {
                tokio::fs::read(path)
                    .await
                    .map_err(|e| ExtensionError::Fetch {
                        location: path.display().to_string(),
                        message: e.to_string(),
                    })
            }
        }
    }
}

// ─── WASM validation ────────────────────────────────────────────────────

/// Validate a WASM binary and return the names of its exported functions.
///
/// Checks:
/// 1. Size within `max_size`
/// 2. Magic bytes (0x00 0x61 0x73 0x6D = "\0asm")
/// 3. Import analysis: only allowed namespaces
/// 4. A `factory` function export
pub fn validate_wasm(wasm_bytes: &[u8], max_size: u64) -> Result<BTreeSet<String>, ExtensionError> {
    let size = wasm_bytes.len() as u64;
    if size > max_size {
        return Err(ExtensionError::WasmValidation(format!(
            "WASM binary too large: {size} bytes (max: {max_size} bytes)"
        )));
    }

    if wasm_bytes.len() < 4 || &wasm_bytes[..4] != WASM_MAGIC {
        return Err(ExtensionError::WasmValidation(
            "invalid WASM binary: magic bytes mismatch".into(),
        ));
    }

    let exports = scan_wasm(wasm_bytes)?;
    if !exports.contains(FACTORY_EXPORT) {
        return Err(ExtensionError::WasmValidation(format!(
            "module does not export a '{FACTORY_EXPORT}' function"
        )));
    }

    Ok(exports)
}

/// Check imports against the allowed namespaces and collect function exports.
fn scan_wasm(wasm_bytes: &[u8]) -> Result<BTreeSet<String>, ExtensionError> {
    use wasmparser::{ExternalKind, Parser, Payload};

    let mut exports = BTreeSet::new();

    for payload in Parser::new(0).parse_all(wasm_bytes) {
        let payload = payload
            .map_err(|e| ExtensionError::WasmValidation(format!("failed to parse WASM: {e}")))?;

        match payload {
            Payload::ImportSection(reader) => {
                for import in reader {
                    let import = import.map_err(|e| {
                        ExtensionError::WasmValidation(format!("failed to read import: {e}"))
                    })?;

                    if !ALLOWED_IMPORT_NAMESPACES.contains(&import.module) {
                        return Err(ExtensionError::WasmValidation(format!(
                            "unauthorized import namespace: '{}' (function: '{}'); \
                             allowed namespaces: {:?}",
                            import.module, import.name, ALLOWED_IMPORT_NAMESPACES
                        )));
                    }
                }
            }
            Payload::ExportSection(reader) => {
                for export in reader {
                    let export = export.map_err(|e| {
                        ExtensionError::WasmValidation(format!("failed to read export: {e}"))
                    })?;
                    if export.kind == ExternalKind::Func {
                        exports.insert(export.name.to_string());
                    }
                }
            }
            _ => {}
        }
    }

    Ok(exports)
}

// ─── WASM modules ───────────────────────────────────────────────────────

#[derive(Serialize)]
struct FactoryInput<'a> {
    host: &'a HostHandle,
    capabilities: CapabilitySnapshot,
}

/// A sandboxed WASM module acting as a [`ModuleFactory`].
///
/// Its `factory` export receives `{ host, capabilities }` as JSON and answers
/// with host requests. Hook requests name other exports of the same module,
/// which become callbacks taking the hook arguments as a JSON array.
pub struct WasmModule {
    name: String,
    sandbox: Arc<Mutex<ModuleSandbox>>,
    exports: BTreeSet<String>,
}

impl std::fmt::Debug for WasmModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmModule")
            .field("name", &self.name)
            .field("exports", &self.exports)
            .finish_non_exhaustive()
    }
}

impl WasmModule {
    pub fn new(name: &str, sandbox: ModuleSandbox, exports: BTreeSet<String>) -> Self {
        Self {
            name: name.to_string(),
            sandbox: Arc::new(Mutex::new(sandbox)),
            exports,
        }
    }

    pub fn exports(&self) -> &BTreeSet<String> {
        &self.exports
    }

    fn export_callback(&self, export: &str) -> Option<Callback> {
        if export == FACTORY_EXPORT || !self.exports.contains(export) {
            return None;
        }
        let sandbox = Arc::clone(&self.sandbox);
        let function = export.to_string();
        Some(Callback::new(
            format!("{}::{export}", self.name),
            move |args| {
                let sandbox = Arc::clone(&sandbox);
                let function = function.clone();
                async move {
                    let mut sandbox = sandbox.lock().await;
                    sandbox.call_json::<_, serde_json::Value>(&function, &args)
                }
            },
        ))
    }
}

#[async_trait]
impl ModuleFactory for WasmModule {
    async fn instantiate(
        &self,
        host: &HostHandle,
        caps: &Capabilities,
    ) -> Result<(), ExtensionError> {
        let input = FactoryInput {
            host,
            capabilities: caps.snapshot(),
        };

        let response: FactoryResponse = {
            let mut sandbox = self.sandbox.lock().await;
            sandbox.call_json(FACTORY_EXPORT, &input)?
        };

        let requested = response.host_requests.len();
        let applied = process_host_requests(&self.name, response.host_requests, caps, &|export| {
            self.export_callback(export)
        });

        tracing::debug!(
            module = %self.name,
            requested,
            applied,
            "module factory finished"
        );
        Ok(())
    }
}

/// Loads WASM modules from an [`ArtifactSource`] into Extism sandboxes.
#[derive(Debug)]
pub struct WasmArtifactLoader<S = HttpArtifactSource> {
    source: S,
    sandbox_config: SandboxConfig,
    max_wasm_size: u64,
}

impl<S: ArtifactSource> WasmArtifactLoader<S> {
    pub fn new(source: S, sandbox_config: SandboxConfig, max_wasm_size: u64) -> Self {
        Self {
            source,
            sandbox_config,
            max_wasm_size,
        }
    }

    async fn fetch_styles(
        &self,
        descriptor: &ModuleDescriptor,
    ) -> Result<Vec<StyleSheet>, ExtensionError> {
        let mut sheets = Vec::with_capacity(descriptor.styles.len());
        for (raw, location) in descriptor.styles.iter().zip(descriptor.style_locations()?) {
            let bytes = self.source.fetch(&location).await?;
            sheets.push(StyleSheet {
                module_name: descriptor.module_name.clone(),
                location: raw.clone(),
                content: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        Ok(sheets)
    }
}

#[async_trait]
impl<S: ArtifactSource> ArtifactLoader for WasmArtifactLoader<S> {
    async fn resolve(
        &self,
        descriptor: &ModuleDescriptor,
    ) -> Result<LoadedArtifact, ExtensionError> {
        let name = &descriptor.module_name;
        let bytes = self.source.fetch(&descriptor.entry_location()?).await?;
        let exports = validate_wasm(&bytes, self.max_wasm_size)?;
        let sandbox = ModuleSandbox::load_bytes(bytes, self.sandbox_config.clone(), name)?;
        let styles = self.fetch_styles(descriptor).await?;

        tracing::debug!(
            module = %name,
            exports = exports.len(),
            styles = styles.len(),
            "WASM artifact resolved"
        );

        Ok(LoadedArtifact {
            factory: Arc::new(WasmModule::new(name, sandbox, exports)),
            styles,
        })
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::HostState;
    use crate::test_fixtures::{EMPTY_MODULE, FACTORY_RETURNS_NOTHING, FORBIDDEN_IMPORT};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MAX: u64 = DEFAULT_MAX_WASM_SIZE_MB * 1024 * 1024;

    fn source() -> HttpArtifactSource {
        HttpArtifactSource::new(Duration::from_secs(5)).unwrap()
    }

    // ── WASM validation ─────────────────────────────────────────────────

    #[test]
    fn test_validate_wasm_accepts_factory_module() {
        let exports = validate_wasm(FACTORY_RETURNS_NOTHING, MAX).unwrap();
        assert!(exports.contains("factory"));
    }

    #[test]
    fn test_validate_wasm_too_large() {
        let err = validate_wasm(FACTORY_RETURNS_NOTHING, 10).unwrap_err();
        assert!(matches!(err, ExtensionError::WasmValidation(_)));
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_validate_wasm_invalid_magic() {
        // ELF magic bytes
        let data = [0x7Fu8, 0x45, 0x4C, 0x46, 0x01, 0x00, 0x00, 0x00];
        let err = validate_wasm(&data, MAX).unwrap_err();
        assert!(err.to_string().contains("magic bytes"));

        let err = validate_wasm(&[0x00, 0x61], MAX).unwrap_err();
        assert!(err.to_string().contains("magic bytes"));
    }

    #[test]
    fn test_validate_wasm_forbidden_namespace() {
        let err = validate_wasm(FORBIDDEN_IMPORT, MAX).unwrap_err();
        assert!(matches!(err, ExtensionError::WasmValidation(_)));
        assert!(err.to_string().contains("unauthorized import namespace"));
        assert!(err.to_string().contains("evil"));
    }

    #[test]
    fn test_validate_wasm_missing_factory() {
        let err = validate_wasm(EMPTY_MODULE, MAX).unwrap_err();
        assert!(err.to_string().contains("'factory'"));
    }

    #[test]
    fn test_allowed_import_namespaces() {
        assert!(ALLOWED_IMPORT_NAMESPACES.contains(&"env"));
        assert!(ALLOWED_IMPORT_NAMESPACES.contains(&"wasi_snapshot_preview1"));
        assert!(!ALLOWED_IMPORT_NAMESPACES.contains(&"forbidden_module"));
    }

    // ── Sources ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_http_source_fetches_remote() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/modules/aurora.css"))
            .respond_with(ResponseTemplate::new(200).set_body_string("body { margin: 0 }"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let location =
            ArtifactLocation::parse(&format!("{}/modules/aurora.css", mock_server.uri())).unwrap();
        let bytes = source().fetch(&location).await.unwrap();
        assert_eq!(bytes, b"body { margin: 0 }");
    }

    #[tokio::test]
    async fn test_http_source_reports_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let location =
            ArtifactLocation::parse(&format!("{}/missing.wasm", mock_server.uri())).unwrap();
        let err = source().fetch(&location).await.unwrap_err();
        assert!(matches!(err, ExtensionError::Fetch { .. }));
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_http_source_reads_local_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("theme.css");
        tokio::fs::write(&file, "a { color: red }").await.unwrap();

        let bytes = source()
            .fetch(&ArtifactLocation::Local(file))
            .await
            .unwrap();
        assert_eq!(bytes, b"a { color: red }");

        let err = source()
            .fetch(&ArtifactLocation::Local(dir.path().join("missing.css")))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtensionError::Fetch { .. }));
    }

    // ── Loaders ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_static_loader() {
        let loader = StaticArtifactLoader::new().with(
            "seo",
            factory_fn(|_, caps| {
                caps.add_layout("seo", "seo::Panel".into());
                Ok(())
            }),
        );

        let host = HostState::new(vec![]).unwrap();
        let caps = host.capabilities();
        let artifact = loader
            .resolve(&ModuleDescriptor::new("seo", "builtin"))
            .await
            .unwrap();
        artifact
            .factory
            .instantiate(&HostHandle::new("folio", "0.1.0"), &caps)
            .await
            .unwrap();
        assert!(caps.has_layout("seo"));

        let err = loader
            .resolve(&ModuleDescriptor::new("nope", "builtin"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtensionError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_wasm_loader_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let wasm_path = dir.path().join("quiet.wasm");
        let css_path = dir.path().join("quiet.css");
        tokio::fs::write(&wasm_path, FACTORY_RETURNS_NOTHING)
            .await
            .unwrap();
        tokio::fs::write(&css_path, ".quiet {}").await.unwrap();

        let mut descriptor =
            ModuleDescriptor::new("quiet", wasm_path.to_string_lossy().into_owned());
        descriptor.styles = vec![css_path.to_string_lossy().into_owned()];

        let loader = WasmArtifactLoader::new(source(), SandboxConfig::default(), MAX);
        let artifact = loader.resolve(&descriptor).await.unwrap();
        assert_eq!(artifact.styles.len(), 1);
        assert_eq!(artifact.styles[0].content, ".quiet {}");

        let host = HostState::new(vec![]).unwrap();
        artifact
            .factory
            .instantiate(&HostHandle::new("folio", "0.1.0"), &host.capabilities())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_wasm_loader_rejects_invalid_binary() {
        let dir = tempfile::tempdir().unwrap();
        let wasm_path = dir.path().join("evil.wasm");
        tokio::fs::write(&wasm_path, FORBIDDEN_IMPORT).await.unwrap();

        let loader = WasmArtifactLoader::new(source(), SandboxConfig::default(), MAX);
        let err = loader
            .resolve(&ModuleDescriptor::new(
                "evil",
                wasm_path.to_string_lossy().into_owned(),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtensionError::WasmValidation(_)));
    }

    #[test]
    fn test_style_registry() {
        let registry = StyleRegistry::default();
        registry.add(vec![
            StyleSheet {
                module_name: "aurora".into(),
                location: "a.css".into(),
                content: "a{}".into(),
            },
            StyleSheet {
                module_name: "gallery".into(),
                location: "g.css".into(),
                content: "g{}".into(),
            },
        ]);
        assert_eq!(registry.sheets().len(), 2);
        assert_eq!(registry.for_module("gallery")[0].content, "g{}");
    }
}
