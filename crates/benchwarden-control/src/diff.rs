//! Desired-versus-observed diffing.
//!
//! Both sides are normalised into sorted name sets with the protected
//! application removed, so results depend only on set contents and come out
//! in lexicographic order.

use std::collections::BTreeSet;

use crate::types::{DesiredState, is_protected};

/// Application changes needed to bring one site to its desired set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppDiff {
    /// Desired but not installed, sorted.
    pub to_install: Vec<String>,
    /// Installed but not desired, sorted.
    pub to_uninstall: Vec<String>,
}

impl AppDiff {
    /// Diff desired application names against installed ones.
    #[must_use]
    pub fn compute<D, O>(desired: &[D], observed: &[O]) -> Self
    where
        D: AsRef<str>,
        O: AsRef<str>,
    {
        let desired = name_set(desired);
        let observed = name_set(observed);

        Self {
            to_install: desired.difference(&observed).cloned().collect(),
            to_uninstall: observed.difference(&desired).cloned().collect(),
        }
    }

    /// Whether the site already matches.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_install.is_empty() && self.to_uninstall.is_empty()
    }
}

fn name_set<S: AsRef<str>>(names: &[S]) -> BTreeSet<String> {
    names
        .iter()
        .map(AsRef::as_ref)
        .filter(|n| !is_protected(n))
        .map(str::to_owned)
        .collect()
}

/// Observed sites that are not desired, in observed order.
#[must_use]
pub fn sites_to_drop(observed: &[String], desired: &DesiredState) -> Vec<String> {
    observed
        .iter()
        .filter(|site| !desired.contains(site))
        .cloned()
        .collect()
}
