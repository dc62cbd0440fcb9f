use std::sync::Arc;
use std::time::Duration;

use folio_extension::bootstrap::steps::{Preferences, SiteApi, StaticSiteApi};
use folio_extension::{
    default_pipeline, BootstrapContext, ComponentRef, ExtensionError, HostHandle, HostState,
    LoadOptions, LoaderConfig, ModuleLoader, ModuleSet, PipelineOutcome, RouteNode, SandboxConfig,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod config;
mod site_api;

use config::HostConfig;
use site_api::HttpSiteApi;

/// Components the host renders itself; modules may reference them by name.
const HOST_COMPONENTS: &[&str] = &[
    "Layout", "Home", "Post", "Page", "Tag", "Install", "Error", "NotFound",
];

/// The route tree every site starts with, before modules add theirs.
fn host_routes() -> Vec<RouteNode> {
    vec![
        RouteNode::new("/", "Layout").named("root").with_children(vec![
            RouteNode::new("", "Home").named("home"),
            RouteNode::new("post/:slug", "Post").named("post"),
            RouteNode::new("page/:slug", "Page").named("page"),
            RouteNode::new("tag/:tag", "Tag").named("tag"),
        ]),
        RouteNode::new("/install", "Install").named("install"),
        RouteNode::new("/error", "Error").named("error"),
        RouteNode::new("/*", "NotFound").named("not-found"),
    ]
}

async fn site_api(config: &HostConfig) -> Result<Arc<dyn SiteApi>, ExtensionError> {
    if let Some(base) = &config.api_base {
        tracing::info!(api = %base, "using blog backend");
        let api = HttpSiteApi::new(base, Duration::from_secs(config.http_timeout_secs))?;
        return Ok(Arc::new(api));
    }

    let modules = match &config.modules_file {
        Some(path) => {
            tracing::info!(path = %path.display(), "using static module list");
            ModuleSet::from_toml(&tokio::fs::read_to_string(path).await?)?
        }
        None => {
            tracing::warn!("neither FOLIO_API_BASE nor FOLIO_MODULES_FILE set, starting bare");
            ModuleSet::default()
        }
    };
    Ok(Arc::new(StaticSiteApi::new(modules)))
}

async fn run() -> Result<(), ExtensionError> {
    let config = HostConfig::from_env();
    let api = site_api(&config).await?;

    let state = Arc::new(HostState::new(host_routes())?);
    let host = HostHandle::new("folio", env!("CARGO_PKG_VERSION")).with_components(
        HOST_COMPONENTS
            .iter()
            .map(|c| ComponentRef::new(*c))
            .collect(),
    );
    let loader = Arc::new(ModuleLoader::wasm(
        host,
        LoaderConfig::from_env(),
        SandboxConfig::from_env(),
    )?);
    // The loader already logs each failure; they are summarised below.
    let options = LoadOptions::sequential();

    let mut pipeline = default_pipeline(
        api,
        Arc::clone(&loader),
        options,
        config.state_file.clone(),
    );
    let mut ctx = BootstrapContext::new(Arc::clone(&state)).with_error_route(&config.error_route);

    match pipeline.run(&mut ctx).await {
        PipelineOutcome::Complete => {
            if let Some(report) = ctx.load_report() {
                tracing::info!(
                    loaded = ?report.loaded_names(),
                    failed = ?report
                        .failures
                        .iter()
                        .map(|f| f.module_name.as_str())
                        .collect::<Vec<_>>(),
                    styles = loader.styles().sheets().len(),
                    "site ready"
                );
            }
        }
        PipelineOutcome::Halted { step } => {
            tracing::info!(step = %step, "start-up halted");
        }
        PipelineOutcome::Aborted { step, error } => {
            tracing::error!(step = %step, "start-up aborted: {error}");
        }
    }

    let landing = ctx.redirect().unwrap_or("/");
    match state.routes.resolve(landing) {
        Some(route) => tracing::info!(
            path = %route.full_path,
            name = ?route.name,
            components = ?route.components,
            "initial route"
        ),
        None => tracing::warn!(path = %landing, "no route matches the landing path"),
    }

    if let Some(path) = &config.state_file {
        Preferences::capture(&state).save(path).await?;
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = run().await {
        tracing::error!("folio host failed: {e}");
        std::process::exit(1);
    }
}
