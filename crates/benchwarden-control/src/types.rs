//! Core domain types for sites and applications.

use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};

/// The platform's own base application.
///
/// Every site has it installed implicitly; it is never fetched, installed or
/// uninstalled by reconciliation.
pub const PROTECTED_APP: &str = "frappe";

/// Whether `app` is the protected base application.
///
/// This is the single check used by diffing and by the provisioner.
#[must_use]
pub fn is_protected(app: &str) -> bool {
    app == PROTECTED_APP
}

/// Reject site names that are not a single plain directory name or that the
/// platform CLI would read as an option.
pub fn validate_site_name(site: &str) -> ControlResult<()> {
    let valid = !site.is_empty()
        && site != "."
        && site != ".."
        && !site.starts_with('-')
        && !site.contains(['/', '\\'])
        && !site.chars().any(|c| c.is_whitespace() || c.is_control());
    if valid {
        Ok(())
    } else {
        Err(ControlError::InvalidSiteName(site.to_owned()))
    }
}

/// Reject application names that are not plain package names.
///
/// Accepted names are ASCII letters, digits and underscores, so they can
/// neither leave `apps/` nor be read as an option.
pub fn validate_app_name(app: &str) -> ControlResult<()> {
    let valid = !app.is_empty() && app.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ControlError::InvalidAppName(app.to_owned()))
    }
}

/// A desired site and the applications it must have installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteSpec {
    /// Site name, unique within the bench.
    #[serde(alias = "site_name")]
    pub name: String,
    /// Required applications; order is irrelevant.
    #[serde(default)]
    pub apps: Vec<String>,
}

impl SiteSpec {
    /// Create a site spec.
    #[must_use]
    pub fn new<I, S>(name: impl Into<String>, apps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            apps: apps.into_iter().map(Into::into).collect(),
        }
    }
}

/// Desired state of the whole bench.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DesiredState {
    /// Sites in declaration order.
    pub sites: Vec<SiteSpec>,
    /// Drop observed sites that are not desired.
    pub drop_abandoned: bool,
}

impl DesiredState {
    /// Create a desired state.
    #[must_use]
    pub const fn new(sites: Vec<SiteSpec>, drop_abandoned: bool) -> Self {
        Self {
            sites,
            drop_abandoned,
        }
    }

    /// Whether a site of that name is desired.
    #[must_use]
    pub fn contains(&self, site: &str) -> bool {
        self.sites.iter().any(|s| s.name == site)
    }
}

/// One line of the platform's installed-application listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AppRecord {
    /// The line parsed into its structured fields.
    Structured {
        /// Application name.
        name: String,
        /// Version string.
        version: Option<String>,
        /// Commit hash.
        commit: Option<String>,
        /// Branch name.
        branch: Option<String>,
        /// Original line.
        raw: String,
    },
    /// Only the name could be recovered.
    NameOnly {
        /// Application name.
        name: String,
        /// Original line.
        raw: String,
    },
}

impl AppRecord {
    /// Application name; always present.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Structured { name, .. } | Self::NameOnly { name, .. } => name,
        }
    }

    /// Line the record was parsed from.
    #[must_use]
    pub fn raw(&self) -> &str {
        match self {
            Self::Structured { raw, .. } | Self::NameOnly { raw, .. } => raw,
        }
    }
}

/// A site as currently found in the bench.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObservedSite {
    /// Site name.
    pub name: String,
    /// Installed applications in listing order.
    pub apps: Vec<AppRecord>,
}

impl ObservedSite {
    /// Names of the installed applications.
    #[must_use]
    pub fn app_names(&self) -> Vec<String> {
        self.apps.iter().map(|a| a.name().to_owned()).collect()
    }
}
