//! The capability surface handed to every loaded module.
//!
//! Modules never see host internals. They get a [`Capabilities`] handle
//! whose methods are the complete, versioned list of things a module may
//! read or change. All modules of one application run share the same
//! handle, so a layout added by the theme is visible to plugins loaded
//! after it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ExtensionError;
use crate::hooks::{HookHandle, HookRegistry};
use crate::routes::{MergeFn, RouteNode, RouteTable};
use crate::state::{
    ComponentRef, LanguageOption, LayoutState, LocaleState, SiteSettings, SiteState, ThemeOption,
    ThemeState, UserInfo,
};

/// Version of the capability contract. Bumped on any breaking change to
/// the method list or its semantics.
pub const CAPABILITY_VERSION: semver::Version = semver::Version::new(1, 0, 0);

// ─── Host state ─────────────────────────────────────────────────────────

/// Everything the host owns for one application run.
///
/// The host writes settings, user and theme directly; modules only get the
/// [`Capabilities`] built from it.
#[derive(Debug)]
pub struct HostState {
    pub hooks: Arc<HookRegistry>,
    pub theme: Arc<ThemeState>,
    pub locale: Arc<LocaleState>,
    pub layout: Arc<LayoutState>,
    pub site: Arc<SiteState>,
    pub routes: Arc<RouteTable>,
}

impl HostState {
    /// Fresh state with the host's own route tree.
    pub fn new(routes: Vec<RouteNode>) -> Result<Self, ExtensionError> {
        Ok(Self {
            hooks: Arc::new(HookRegistry::new()),
            theme: Arc::new(ThemeState::default()),
            locale: Arc::new(LocaleState::default()),
            layout: Arc::new(LayoutState::default()),
            site: Arc::new(SiteState::default()),
            routes: Arc::new(RouteTable::new(routes)?),
        })
    }

    /// Build the surface modules will see.
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            inner: Arc::new(Surface {
                hooks: Arc::clone(&self.hooks),
                theme: Arc::clone(&self.theme),
                locale: Arc::clone(&self.locale),
                layout: Arc::clone(&self.layout),
                site: Arc::clone(&self.site),
                routes: Arc::clone(&self.routes),
            }),
        }
    }
}

// ─── Capabilities ───────────────────────────────────────────────────────

#[derive(Debug)]
struct Surface {
    hooks: Arc<HookRegistry>,
    theme: Arc<ThemeState>,
    locale: Arc<LocaleState>,
    layout: Arc<LayoutState>,
    site: Arc<SiteState>,
    routes: Arc<RouteTable>,
}

/// The fixed set of operations available to modules.
///
/// Cloning is cheap and keeps identity: every clone is the same surface.
#[derive(Debug, Clone)]
pub struct Capabilities {
    inner: Arc<Surface>,
}

impl Capabilities {
    pub fn version(&self) -> semver::Version {
        CAPABILITY_VERSION
    }

    /// Whether `other` is the very same surface.
    pub fn same(&self, other: &Capabilities) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ── Hooks ────────────────────────────────────────────────────────

    pub fn hook(&self, tag: &str) -> HookHandle {
        HookHandle::new(Arc::clone(&self.inner.hooks), tag)
    }

    // ── Theme ────────────────────────────────────────────────────────

    pub fn get_current_theme(&self) -> String {
        self.inner.theme.current()
    }

    pub fn get_themes(&self) -> Vec<ThemeOption> {
        self.inner.theme.themes()
    }

    pub fn is_dark_theme(&self) -> bool {
        self.inner.theme.is_dark()
    }

    // ── Locale ───────────────────────────────────────────────────────

    pub fn get_default_locale(&self) -> String {
        self.inner.locale.default_locale()
    }

    pub fn get_support_languages(&self) -> Vec<LanguageOption> {
        self.inner.locale.languages()
    }

    pub fn add_support_languages(&self, languages: Vec<LanguageOption>) {
        self.inner.locale.add_languages(languages);
    }

    pub fn set_default_locale(&self, locale: &str) {
        self.inner.locale.set_default(locale);
    }

    pub fn set_locale(&self, locale: &str) {
        self.inner.locale.set_current(locale);
    }

    // ── Layouts, widgets, templates ─────────────────────────────────

    pub fn has_layout(&self, name: &str) -> bool {
        self.inner.layout.has_layout(name)
    }

    pub fn get_layouts(&self) -> BTreeMap<String, ComponentRef> {
        self.inner.layout.layouts()
    }

    pub fn add_layout(&self, name: &str, component: ComponentRef) {
        self.inner.layout.add_layout(name, component);
    }

    pub fn add_layouts(&self, layouts: BTreeMap<String, ComponentRef>) {
        self.inner.layout.add_layouts(layouts);
    }

    pub fn has_widget(&self, name: &str) -> bool {
        self.inner.layout.has_widget(name)
    }

    pub fn get_widgets(&self) -> BTreeMap<String, ComponentRef> {
        self.inner.layout.widgets()
    }

    pub fn add_widgets(&self, widgets: BTreeMap<String, ComponentRef>) {
        self.inner.layout.add_widgets(widgets);
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.inner.layout.has_template(name)
    }

    pub fn get_templates(&self) -> BTreeMap<String, ComponentRef> {
        self.inner.layout.templates()
    }

    pub fn add_template(&self, name: &str, component: ComponentRef) {
        self.inner.layout.add_template(name, component);
    }

    pub fn add_templates(&self, templates: BTreeMap<String, ComponentRef>) {
        self.inner.layout.add_templates(templates);
    }

    pub fn remove_templates(&self, names: &[String]) {
        self.inner.layout.remove_templates(names);
    }

    // ── Site settings ────────────────────────────────────────────────

    pub fn get_domain(&self) -> String {
        self.inner.site.settings().domain
    }

    pub fn get_logo(&self) -> String {
        self.inner.site.settings().logo
    }

    pub fn get_static_dir(&self) -> String {
        self.inner.site.settings().static_dir
    }

    pub fn get_api_path(&self) -> String {
        self.inner.site.settings().api_path
    }

    pub fn get_copyright(&self) -> String {
        self.inner.site.settings().copyright
    }

    pub fn get_icp(&self) -> String {
        self.inner.site.settings().icp
    }

    pub fn get_user_info(&self) -> Option<UserInfo> {
        self.inner.site.user()
    }

    // ── Routes ───────────────────────────────────────────────────────

    /// Merge `routes` into the application's route table and rebuild the
    /// router. Takes effect from the next navigation.
    pub fn add_routes(
        &self,
        routes: Vec<RouteNode>,
        merge: Option<&MergeFn>,
    ) -> Result<(), ExtensionError> {
        self.inner.routes.add_routes(routes, merge)
    }

    /// Read-only view of the surface, as serialised for WASM modules.
    pub fn snapshot(&self) -> CapabilitySnapshot {
        CapabilitySnapshot {
            version: CAPABILITY_VERSION.to_string(),
            theme: ThemeSnapshot {
                current: self.get_current_theme(),
                themes: self.get_themes(),
                dark: self.is_dark_theme(),
            },
            locale: LocaleSnapshot {
                default_locale: self.get_default_locale(),
                current: self.inner.locale.current(),
                languages: self.get_support_languages(),
            },
            layouts: self.get_layouts(),
            widgets: self.get_widgets(),
            templates: self.get_templates(),
            settings: self.inner.site.settings(),
            user: self.get_user_info(),
        }
    }
}

// ─── Snapshot ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThemeSnapshot {
    pub current: String,
    pub themes: Vec<ThemeOption>,
    pub dark: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocaleSnapshot {
    pub default_locale: String,
    pub current: String,
    pub languages: Vec<LanguageOption>,
}

/// Point-in-time copy of everything a module can read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    pub version: String,
    pub theme: ThemeSnapshot,
    pub locale: LocaleSnapshot,
    pub layouts: BTreeMap<String, ComponentRef>,
    pub widgets: BTreeMap<String, ComponentRef>,
    pub templates: BTreeMap<String, ComponentRef>,
    pub settings: SiteSettings,
    pub user: Option<UserInfo>,
}
