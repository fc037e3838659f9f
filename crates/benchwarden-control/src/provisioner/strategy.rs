//! Ordered fetch sources for applications.
//!
//! An application is first requested by bare name, which the platform CLI
//! resolves through its own app registry, then from a repository URL derived
//! from the name. [`FetchPlan`] lists the sources in the order they are
//! tried; the provisioner walks it and stops at the first success.

use std::fmt;

/// One place an application can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchSource {
    /// Let the platform CLI resolve the bare name.
    Registry,
    /// Clone from an explicit repository URL.
    Repository(String),
}

impl FetchSource {
    /// Argument passed to `bench get-app` for this source.
    #[must_use]
    pub fn locator<'a>(&'a self, app: &'a str) -> &'a str {
        match self {
            Self::Registry => app,
            Self::Repository(url) => url,
        }
    }
}

impl fmt::Display for FetchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registry => write!(f, "registry"),
            Self::Repository(url) => write!(f, "{url}"),
        }
    }
}

/// Result of trying one source.
#[derive(Debug)]
pub enum AttemptOutcome<E> {
    /// The application is now present.
    Fetched,
    /// The source failed; the next one may be tried.
    Failed(E),
}

/// Sources for one application, in the order they are tried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    sources: Vec<FetchSource>,
}

impl FetchPlan {
    /// Registry first, then `<fallback_base>/<app>`.
    #[must_use]
    pub fn standard(app: &str, fallback_base: &str) -> Self {
        Self {
            sources: vec![
                FetchSource::Registry,
                FetchSource::Repository(fallback_url(app, fallback_base)),
            ],
        }
    }

    /// A plan with explicit sources.
    #[must_use]
    pub const fn new(sources: Vec<FetchSource>) -> Self {
        Self { sources }
    }

    /// Sources in order.
    #[must_use]
    pub fn sources(&self) -> &[FetchSource] {
        &self.sources
    }
}

/// Canonical repository URL of an application.
#[must_use]
pub fn fallback_url(app: &str, fallback_base: &str) -> String {
    format!("{}/{app}", fallback_base.trim_end_matches('/'))
}
