//! First-run creation of the bench directory.

use std::io;
use std::path::Path;

use tracing::info;

use super::Workspace;
use crate::error::{ControlError, ControlResult};
use crate::exec::CommandRunner;

/// What [`ensure_workspace`] found or did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// The bench already existed.
    Existing,
    /// The bench was initialised by this call.
    Initialised,
}

/// Make sure the bench exists, running `bench init` when it does not.
///
/// After initialisation `common_config`, when given, is copied to
/// `sites/common_site_config.json`.
pub async fn ensure_workspace(
    runner: &dyn CommandRunner,
    workspace: &Workspace,
    branch: &str,
    common_config: Option<&Path>,
) -> ControlResult<BootstrapOutcome> {
    let root = workspace.root();
    let unreadable = |source| ControlError::WorkspaceUnreadable {
        path: root.to_path_buf(),
        source,
    };

    match tokio::fs::metadata(root).await {
        Ok(meta) if meta.is_dir() => {
            tokio::fs::read_dir(root).await.map_err(unreadable)?;
            info!(path = %root.display(), "using existing bench");
            return Ok(BootstrapOutcome::Existing);
        }
        Ok(_) => return Err(unreadable(io::Error::other("not a directory"))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(unreadable(e)),
    }

    let parent = root
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(parent)
        .await
        .map_err(|e| ControlError::io(parent, e))?;

    info!(path = %root.display(), branch = %branch, "initialising bench");
    let init = workspace
        .bench()
        .current_dir(parent)
        .args(["init", "--frappe-branch", branch])
        .arg(root.to_string_lossy())
        .inherit();
    runner.run(&init).await?;

    if let Some(source) = common_config {
        let target = workspace.common_site_config();
        tokio::fs::copy(source, &target)
            .await
            .map_err(|e| ControlError::io(source, e))?;
        info!(target = %target.display(), "copied common site config");
    }

    Ok(BootstrapOutcome::Initialised)
}
