//! The standard start-up steps and the site API they talk to.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{BootstrapContext, BootstrapStep, Pipeline, StepOutcome};
use crate::capabilities::HostState;
use crate::error::ExtensionError;
use crate::loader::{LoadOptions, ModuleLoader};
use crate::manifest::{ModuleDescriptor, ModuleSet};
use crate::state::{SiteSettings, UserInfo};

/// Where an uninstalled site is sent.
pub const INSTALL_ROUTE: &str = "/install";

/// Action fired once every module has loaded.
pub const INIT_ACTION: &str = "init";

// ─── Site API ───────────────────────────────────────────────────────────

/// The blog backend, as far as start-up is concerned.
#[async_trait]
pub trait SiteApi: Send + Sync {
    async fn fetch_settings(&self) -> Result<SiteSettings, ExtensionError>;

    /// `None` for anonymous visitors.
    async fn fetch_user(&self) -> Result<Option<UserInfo>, ExtensionError>;

    /// `None` when no theme is configured.
    async fn fetch_theme(&self) -> Result<Option<ModuleDescriptor>, ExtensionError>;

    async fn fetch_plugins(&self) -> Result<Vec<ModuleDescriptor>, ExtensionError>;
}

/// A fixed site: given settings and a static module list, no user.
#[derive(Debug, Clone, Default)]
pub struct StaticSiteApi {
    pub settings: SiteSettings,
    pub user: Option<UserInfo>,
    pub modules: ModuleSet,
}

impl StaticSiteApi {
    /// An installed site serving `modules`.
    pub fn new(modules: ModuleSet) -> Self {
        Self {
            settings: SiteSettings {
                installed: true,
                ..SiteSettings::default()
            },
            user: None,
            modules,
        }
    }
}

#[async_trait]
impl SiteApi for StaticSiteApi {
    async fn fetch_settings(&self) -> Result<SiteSettings, ExtensionError> {
        Ok(self.settings.clone())
    }

    async fn fetch_user(&self) -> Result<Option<UserInfo>, ExtensionError> {
        Ok(self.user.clone())
    }

    async fn fetch_theme(&self) -> Result<Option<ModuleDescriptor>, ExtensionError> {
        Ok(self.modules.theme.clone())
    }

    async fn fetch_plugins(&self) -> Result<Vec<ModuleDescriptor>, ExtensionError> {
        Ok(self.modules.plugins.clone())
    }
}

// ─── Persisted preferences ──────────────────────────────────────────────

/// Visitor preferences that survive restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub theme: Option<String>,
    pub locale: Option<String>,
    pub default_locale: Option<String>,
}

impl Preferences {
    pub fn capture(state: &HostState) -> Self {
        Self {
            theme: Some(state.theme.current()),
            locale: Some(state.locale.current()),
            default_locale: Some(state.locale.default_locale()),
        }
    }

    pub fn apply(&self, state: &HostState) {
        if let Some(theme) = &self.theme {
            if !state.theme.set_current(theme) {
                tracing::warn!(theme = %theme, "persisted theme is unknown, keeping default");
            }
        }
        if let Some(default_locale) = &self.default_locale {
            state.locale.set_default(default_locale);
        }
        if let Some(locale) = &self.locale {
            state.locale.set_current(locale);
        }
    }

    pub async fn save(&self, path: &std::path::Path) -> Result<(), ExtensionError> {
        let json = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

// ─── Steps ──────────────────────────────────────────────────────────────

/// Restore persisted preferences. A missing file is a first visit.
#[derive(Debug)]
pub struct HydrateState {
    path: Option<PathBuf>,
}

impl HydrateState {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

#[async_trait]
impl BootstrapStep for HydrateState {
    fn name(&self) -> &str {
        "hydrate-state"
    }

    async fn run(&self, ctx: &mut BootstrapContext) -> Result<StepOutcome, ExtensionError> {
        let Some(path) = &self.path else {
            return Ok(StepOutcome::Continue);
        };

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no persisted state");
                return Ok(StepOutcome::Continue);
            }
            Err(e) => return Err(e.into()),
        };

        let prefs: Preferences = serde_json::from_slice(&bytes).map_err(|e| {
            ExtensionError::step(self.name(), format!("malformed {}: {e}", path.display()))
        })?;
        prefs.apply(&ctx.state);
        Ok(StepOutcome::Continue)
    }
}

/// Fetch site settings. Unreachable settings abort start-up; an uninstalled
/// site is sent to the install wizard.
pub struct FetchSettings {
    api: Arc<dyn SiteApi>,
}

impl FetchSettings {
    pub fn new(api: Arc<dyn SiteApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl BootstrapStep for FetchSettings {
    fn name(&self) -> &str {
        "fetch-settings"
    }

    async fn run(&self, ctx: &mut BootstrapContext) -> Result<StepOutcome, ExtensionError> {
        let settings = self
            .api
            .fetch_settings()
            .await
            .map_err(|e| ExtensionError::step(self.name(), e.to_string()))?;

        let installed = settings.installed;
        tracing::info!(site = %settings.site_name, installed, "site settings loaded");
        ctx.state.site.set_settings(settings);

        if !installed {
            ctx.redirect_to(INSTALL_ROUTE);
            return Ok(StepOutcome::Halt);
        }
        Ok(StepOutcome::Continue)
    }
}

/// Fetch the signed-in user; any failure means an anonymous visit.
pub struct FetchUser {
    api: Arc<dyn SiteApi>,
}

impl FetchUser {
    pub fn new(api: Arc<dyn SiteApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl BootstrapStep for FetchUser {
    fn name(&self) -> &str {
        "fetch-user"
    }

    async fn run(&self, ctx: &mut BootstrapContext) -> Result<StepOutcome, ExtensionError> {
        let user = match self.api.fetch_user().await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!("failed to fetch user, continuing anonymously: {e}");
                None
            }
        };
        ctx.state.site.set_user(user);
        Ok(StepOutcome::Continue)
    }
}

/// Load the theme, then every plugin, in one sequential batch.
///
/// A missing theme or an unreachable discovery endpoint goes down the
/// loader's error path; it never aborts start-up.
pub struct LoadModules {
    api: Arc<dyn SiteApi>,
    loader: Arc<ModuleLoader>,
    options: LoadOptions,
}

impl LoadModules {
    pub fn new(api: Arc<dyn SiteApi>, loader: Arc<ModuleLoader>, options: LoadOptions) -> Self {
        Self {
            api,
            loader,
            options: options.with_sync(true),
        }
    }
}

#[async_trait]
impl BootstrapStep for LoadModules {
    fn name(&self) -> &str {
        "load-modules"
    }

    async fn run(&self, ctx: &mut BootstrapContext) -> Result<StepOutcome, ExtensionError> {
        let theme = match self.api.fetch_theme().await {
            Ok(Some(theme)) => Some(theme),
            Ok(None) => {
                self.options.report_error("no theme configured");
                None
            }
            Err(e) => {
                self.options
                    .report_error(&format!("failed to fetch theme descriptor: {e}"));
                None
            }
        };

        let plugins = match self.api.fetch_plugins().await {
            Ok(plugins) => plugins,
            Err(e) => {
                self.options
                    .report_error(&format!("failed to fetch plugin descriptors: {e}"));
                Vec::new()
            }
        };

        let descriptors = ModuleSet { theme, plugins }.into_load_order();
        let report = self
            .loader
            .load(&descriptors, &ctx.caps, self.options.clone())
            .await;

        tracing::info!(
            loaded = report.loaded.len(),
            failed = report.failures.len(),
            "modules loaded"
        );
        ctx.set_load_report(report);
        Ok(StepOutcome::Continue)
    }
}

/// Fire the `init` action once everything else is in place.
#[derive(Debug, Default)]
pub struct FireInit;

#[async_trait]
impl BootstrapStep for FireInit {
    fn name(&self) -> &str {
        "fire-init"
    }

    async fn run(&self, ctx: &mut BootstrapContext) -> Result<StepOutcome, ExtensionError> {
        ctx.caps.hook(INIT_ACTION).exec(vec![]).await?;
        Ok(StepOutcome::Continue)
    }
}

/// Hydrate, settings, user, modules, `init`.
pub fn default_pipeline(
    api: Arc<dyn SiteApi>,
    loader: Arc<ModuleLoader>,
    options: LoadOptions,
    state_file: Option<PathBuf>,
) -> Pipeline {
    Pipeline::new()
        .step(HydrateState::new(state_file))
        .step(FetchSettings::new(Arc::clone(&api)))
        .step(FetchUser::new(Arc::clone(&api)))
        .step(LoadModules::new(api, loader, options))
        .step(FireInit)
}
