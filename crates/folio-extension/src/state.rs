//! Host-side state that modules can read and, through the capability
//! surface only, extend: theme, locale, layout registries and site settings.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

/// Opaque reference to a renderable component.
///
/// Module components are conventionally written `"<module>::<export>"`,
/// host components by bare name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentRef(pub String);

impl ComponentRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ComponentRef {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

// ─── Theme ──────────────────────────────────────────────────────────────

/// A selectable colour theme.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeOption {
    pub name: String,
    #[serde(default)]
    pub dark: bool,
}

#[derive(Debug)]
struct ThemeInner {
    current: String,
    themes: Vec<ThemeOption>,
}

#[derive(Debug)]
pub struct ThemeState {
    inner: RwLock<ThemeInner>,
}

impl Default for ThemeState {
    fn default() -> Self {
        Self::new(
            "light",
            vec![
                ThemeOption {
                    name: "light".into(),
                    dark: false,
                },
                ThemeOption {
                    name: "dark".into(),
                    dark: true,
                },
            ],
        )
    }
}

impl ThemeState {
    pub fn new(current: impl Into<String>, themes: Vec<ThemeOption>) -> Self {
        Self {
            inner: RwLock::new(ThemeInner {
                current: current.into(),
                themes,
            }),
        }
    }

    pub fn current(&self) -> String {
        read(&self.inner).current.clone()
    }

    pub fn themes(&self) -> Vec<ThemeOption> {
        read(&self.inner).themes.clone()
    }

    /// Whether the current theme is a dark one. Unknown names count as light.
    pub fn is_dark(&self) -> bool {
        let inner = read(&self.inner);
        inner
            .themes
            .iter()
            .any(|t| t.name == inner.current && t.dark)
    }

    /// Switch themes. Returns `false` (and changes nothing) for unknown names.
    pub fn set_current(&self, name: &str) -> bool {
        let mut inner = write(&self.inner);
        if inner.themes.iter().any(|t| t.name == name) {
            inner.current = name.to_string();
            true
        } else {
            false
        }
    }
}

// ─── Locale ─────────────────────────────────────────────────────────────

/// A language offered in the locale switcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageOption {
    pub label: String,
    pub value: String,
}

#[derive(Debug)]
struct LocaleInner {
    default_locale: String,
    current: String,
    languages: Vec<LanguageOption>,
}

#[derive(Debug)]
pub struct LocaleState {
    inner: RwLock<LocaleInner>,
}

impl Default for LocaleState {
    fn default() -> Self {
        Self::new(
            "en-US",
            vec![LanguageOption {
                label: "English".into(),
                value: "en-US".into(),
            }],
        )
    }
}

impl LocaleState {
    pub fn new(default_locale: impl Into<String>, languages: Vec<LanguageOption>) -> Self {
        let default_locale = default_locale.into();
        Self {
            inner: RwLock::new(LocaleInner {
                current: default_locale.clone(),
                default_locale,
                languages,
            }),
        }
    }

    pub fn default_locale(&self) -> String {
        read(&self.inner).default_locale.clone()
    }

    pub fn current(&self) -> String {
        read(&self.inner).current.clone()
    }

    pub fn languages(&self) -> Vec<LanguageOption> {
        read(&self.inner).languages.clone()
    }

    /// Append languages, skipping values that are already offered.
    pub fn add_languages(&self, languages: Vec<LanguageOption>) {
        let mut inner = write(&self.inner);
        for lang in languages {
            if !inner.languages.iter().any(|l| l.value == lang.value) {
                inner.languages.push(lang);
            }
        }
    }

    pub fn set_default(&self, locale: &str) {
        write(&self.inner).default_locale = locale.to_string();
    }

    pub fn set_current(&self, locale: &str) {
        write(&self.inner).current = locale.to_string();
    }
}

// ─── Layout ─────────────────────────────────────────────────────────────

/// Named component slots: page layouts, widgets and templates.
#[derive(Debug, Default)]
pub struct LayoutState {
    layouts: RwLock<BTreeMap<String, ComponentRef>>,
    widgets: RwLock<BTreeMap<String, ComponentRef>>,
    templates: RwLock<BTreeMap<String, ComponentRef>>,
}

impl LayoutState {
    pub fn has_layout(&self, name: &str) -> bool {
        read(&self.layouts).contains_key(name)
    }

    pub fn layouts(&self) -> BTreeMap<String, ComponentRef> {
        read(&self.layouts).clone()
    }

    /// Register a layout, replacing any previous one of the same name.
    pub fn add_layout(&self, name: &str, component: ComponentRef) {
        write(&self.layouts).insert(name.to_string(), component);
    }

    pub fn add_layouts(&self, layouts: BTreeMap<String, ComponentRef>) {
        write(&self.layouts).extend(layouts);
    }

    pub fn has_widget(&self, name: &str) -> bool {
        read(&self.widgets).contains_key(name)
    }

    pub fn widgets(&self) -> BTreeMap<String, ComponentRef> {
        read(&self.widgets).clone()
    }

    pub fn add_widgets(&self, widgets: BTreeMap<String, ComponentRef>) {
        write(&self.widgets).extend(widgets);
    }

    pub fn has_template(&self, name: &str) -> bool {
        read(&self.templates).contains_key(name)
    }

    pub fn templates(&self) -> BTreeMap<String, ComponentRef> {
        read(&self.templates).clone()
    }

    pub fn add_template(&self, name: &str, component: ComponentRef) {
        write(&self.templates).insert(name.to_string(), component);
    }

    pub fn add_templates(&self, templates: BTreeMap<String, ComponentRef>) {
        write(&self.templates).extend(templates);
    }

    /// Remove the named templates; names that are not registered are ignored.
    pub fn remove_templates(&self, names: &[String]) {
        let mut templates = write(&self.templates);
        for name in names {
            templates.remove(name);
        }
    }
}

// ─── Site settings & user ───────────────────────────────────────────────

/// Site-wide settings fetched from the backend at start-up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SiteSettings {
    pub site_name: String,
    pub domain: String,
    pub logo: String,
    pub static_dir: String,
    pub api_path: String,
    pub copyright: String,
    pub icp: String,
    /// `false` until the backend's install wizard has run.
    pub installed: bool,
}

/// The signed-in user, without any sensitive fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Default)]
pub struct SiteState {
    settings: RwLock<SiteSettings>,
    user: RwLock<Option<UserInfo>>,
}

impl SiteState {
    pub fn settings(&self) -> SiteSettings {
        read(&self.settings).clone()
    }

    pub fn set_settings(&self, settings: SiteSettings) {
        *write(&self.settings) = settings;
    }

    pub fn user(&self) -> Option<UserInfo> {
        read(&self.user).clone()
    }

    pub fn set_user(&self, user: Option<UserInfo>) {
        *write(&self.user) = user;
    }
}
