//! Folio extension runtime
//!
//! Loads independently built themes and plugins into the blog at start-up.
//! Modules run as sandboxed WASM (Extism) or as native factories compiled
//! into the host, see only the versioned capability surface, hook into the
//! shared filter/action registry, and contribute layouts and routes. A
//! failing module is reported and skipped; the bootstrap pipeline sequences
//! everything and fires `init` once all modules have loaded.

pub mod artifact;
pub mod bootstrap;
pub mod capabilities;
pub mod error;
pub mod hooks;
pub mod host_requests;
pub mod loader;
pub mod manifest;
pub mod routes;
pub mod sandbox;
pub mod state;

#[cfg(test)]
mod test_fixtures;

pub use artifact::{
    factory_fn, ArtifactLoader, ArtifactSource, HostHandle, HttpArtifactSource, ModuleFactory,
    StaticArtifactLoader, StyleRegistry, StyleSheet, WasmArtifactLoader,
};
pub use bootstrap::steps::{default_pipeline, SiteApi, StaticSiteApi};
pub use bootstrap::{
    BootstrapContext, BootstrapStep, Pipeline, PipelineOutcome, PipelineState, StepOutcome,
};
pub use capabilities::{Capabilities, HostState, CAPABILITY_VERSION};
pub use error::ExtensionError;
pub use hooks::{Callback, HookHandle, HookQuery, HookRegistry};
pub use loader::{LoadOptions, LoadReport, LoaderConfig, ModuleLoader};
pub use manifest::{ModuleDescriptor, ModuleSet};
pub use routes::{merge_routes, RouteMatch, RouteNode, RouteTable, Router};
pub use sandbox::{ModuleSandbox, SandboxConfig};
pub use state::{ComponentRef, SiteSettings, UserInfo};
