//! Module descriptors: what the discovery endpoints (or a static module
//! list) say about each theme and plugin, and where to fetch it from.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ExtensionError;

/// One loadable module as described by the discovery endpoints.
///
/// The capability surface is not part of the descriptor; the loader's
/// caller supplies it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDescriptor {
    pub module_name: String,
    pub entry: String,
    #[serde(default)]
    pub styles: Vec<String>,
    #[serde(default)]
    pub is_theme: bool,
    /// Capability versions the module was built against, e.g. `"^1.0"`.
    #[serde(default)]
    pub requires: Option<String>,
}

/// Where an artifact lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactLocation {
    Remote(url::Url),
    Local(PathBuf),
}

impl ArtifactLocation {
    /// Parse an `http(s)://` or `file://` URL, or a plain filesystem path.
    pub fn parse(raw: &str) -> Result<Self, ExtensionError> {
        if raw.trim().is_empty() {
            return Err(ExtensionError::InvalidDescriptor(
                "artifact location must not be empty".into(),
            ));
        }

        match url::Url::parse(raw) {
            Ok(url) => match url.scheme() {
                "http" | "https" => Ok(Self::Remote(url)),
                "file" => url.to_file_path().map(Self::Local).map_err(|_| {
                    ExtensionError::InvalidDescriptor(format!("invalid file URL: '{raw}'"))
                }),
                other => Err(ExtensionError::InvalidDescriptor(format!(
                    "unsupported scheme '{other}' in '{raw}'"
                ))),
            },
            Err(url::ParseError::RelativeUrlWithoutBase) => Ok(Self::Local(PathBuf::from(raw))),
            Err(e) => Err(ExtensionError::InvalidDescriptor(format!(
                "invalid artifact location '{raw}': {e}"
            ))),
        }
    }
}

// ─── Validation helpers ─────────────────────────────────────────────

/// Names are opaque identifiers; they only have to name something.
fn validate_module_name(name: &str) -> Result<(), ExtensionError> {
    if name.trim().is_empty() {
        return Err(ExtensionError::InvalidDescriptor(
            "module name must not be empty".into(),
        ));
    }
    Ok(())
}

impl ModuleDescriptor {
    pub fn new(module_name: impl Into<String>, entry: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            entry: entry.into(),
            styles: Vec::new(),
            is_theme: false,
            requires: None,
        }
    }

    /// The parsed capability requirement, if the module declared one.
    pub fn version_requirement(&self) -> Result<Option<semver::VersionReq>, ExtensionError> {
        self.requires
            .as_deref()
            .map(semver::VersionReq::parse)
            .transpose()
            .map_err(|e| {
                ExtensionError::InvalidDescriptor(format!(
                    "module {} has invalid 'requires': {e}",
                    self.module_name
                ))
            })
    }

    pub fn entry_location(&self) -> Result<ArtifactLocation, ExtensionError> {
        ArtifactLocation::parse(&self.entry)
    }

    pub fn style_locations(&self) -> Result<Vec<ArtifactLocation>, ExtensionError> {
        self.styles.iter().map(|s| ArtifactLocation::parse(s)).collect()
    }

    /// Check name, locations and version requirement.
    pub fn validate(&self) -> Result<(), ExtensionError> {
        validate_module_name(&self.module_name)?;
        self.entry_location()?;
        self.style_locations()?;
        self.version_requirement()?;
        Ok(())
    }
}

// ─── Module set ─────────────────────────────────────────────────────

/// The theme (at most one) and plugins configured for a site.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleSet {
    #[serde(default)]
    pub theme: Option<ModuleDescriptor>,
    #[serde(default)]
    pub plugins: Vec<ModuleDescriptor>,
}

impl ModuleSet {
    /// Parse a static module list from TOML.
    pub fn from_toml(toml_str: &str) -> Result<Self, ExtensionError> {
        let set: ModuleSet = toml::from_str(toml_str)?;
        Ok(set)
    }

    /// Theme first, then plugins in their configured order, with `is_theme`
    /// set from the slot each descriptor came from.
    pub fn into_load_order(self) -> Vec<ModuleDescriptor> {
        let mut order = Vec::with_capacity(self.plugins.len() + 1);
        if let Some(mut theme) = self.theme {
            theme.is_theme = true;
            order.push(theme);
        }
        order.extend(self.plugins.into_iter().map(|mut p| {
            p.is_theme = false;
            p
        }));
        order
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
