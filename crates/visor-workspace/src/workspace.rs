use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct WorkspaceHandle {
    /// Where dispatch context's `workingDirectory` should point.
    pub working_directory: PathBuf,
    /// The directory the engine process was launched from, always preserved
    /// as a fallback.
    pub original_working_directory: PathBuf,
    run_dir: Option<PathBuf>,
    cleanup_on_exit: bool,
}

impl WorkspaceHandle {
    /// True if a dedicated per-run directory was actually created; false if
    /// init failed and the engine fell back to `original_working_directory`.
    pub fn is_isolated(&self) -> bool {
        self.run_dir.is_some()
    }

    pub async fn cleanup(&self) -> std::io::Result<()> {
        let Some(dir) = &self.run_dir else {
            return Ok(());
        };
        if !self.cleanup_on_exit {
            return Ok(());
        }
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// Creates and tears down the per-run isolated working directory (§4.8).
/// Init failures (non-dir target, permission errors) are non-fatal: the
/// engine falls back to the process's original working directory and keeps
/// running rather than aborting the run.
pub struct WorkspaceManager {
    base_dir: PathBuf,
}

impl WorkspaceManager {
    pub fn new() -> Self {
        Self {
            base_dir: std::env::temp_dir().join("visor-runs"),
        }
    }

    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// `project_root`, if given, is linked into the run directory under its
    /// own directory name so provider invocations can resolve relative paths
    /// the same way whether or not isolation is active.
    pub async fn prepare(
        &self,
        session_id: &str,
        project_root: Option<&Path>,
        cleanup_on_exit: bool,
    ) -> WorkspaceHandle {
        let original = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let run_dir = self.base_dir.join(session_id);

        if let Err(err) = tokio::fs::create_dir_all(&run_dir).await {
            tracing::warn!(
                session_id,
                error = %err,
                "workspace init failed, falling back to original working directory"
            );
            return WorkspaceHandle {
                working_directory: original.clone(),
                original_working_directory: original,
                run_dir: None,
                cleanup_on_exit,
            };
        }

        if let Some(root) = project_root {
            if let Err(err) = link_project(root, &run_dir).await {
                tracing::warn!(
                    session_id,
                    project_root = %root.display(),
                    error = %err,
                    "failed to link project into workspace, continuing with bare run directory"
                );
            }
        }

        WorkspaceHandle {
            working_directory: run_dir.clone(),
            original_working_directory: original,
            run_dir: Some(run_dir),
            cleanup_on_exit,
        }
    }
}

impl Default for WorkspaceManager {
    fn default() -> Self {
        Self::new()
    }
}

async fn link_project(root: &Path, run_dir: &Path) -> std::io::Result<()> {
    let name = root
        .file_name()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "project root has no file name"))?;
    let target = run_dir.join(name);
    let root = root.to_path_buf();

    #[cfg(unix)]
    {
        tokio::fs::symlink(&root, &target).await
    }
    #[cfg(not(unix))]
    {
        copy_dir_recursive(&root, &target).await
    }
}

#[cfg(not(unix))]
async fn copy_dir_recursive(from: &Path, to: &Path) -> std::io::Result<()> {
    let from = from.to_path_buf();
    let to = to.to_path_buf();
    tokio::task::spawn_blocking(move || {
        for entry in ignore::WalkBuilder::new(&from).build().flatten() {
            let rel = match entry.path().strip_prefix(&from) {
                Ok(rel) => rel,
                Err(_) => continue,
            };
            let dest = to.join(rel);
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                std::fs::create_dir_all(&dest)?;
            } else if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(entry.path(), &dest)?;
            }
        }
        Ok(())
    })
    .await
    .unwrap_or_else(|join_err| Err(std::io::Error::new(std::io::ErrorKind::Other, join_err)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prepare_creates_isolated_directory_and_cleanup_removes_it() {
        let base = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::with_base_dir(base.path());
        let handle = manager.prepare("run-1", None, true).await;
        assert!(handle.is_isolated());
        assert!(handle.working_directory.exists());
        handle.cleanup().await.unwrap();
        assert!(!handle.working_directory.exists());
    }

    #[tokio::test]
    async fn cleanup_on_exit_false_preserves_directory() {
        let base = tempfile::tempdir().unwrap();
        let manager = WorkspaceManager::with_base_dir(base.path());
        let handle = manager.prepare("run-2", None, false).await;
        handle.cleanup().await.unwrap();
        assert!(handle.working_directory.exists());
    }

    #[tokio::test]
    async fn init_failure_falls_back_to_original_working_directory() {
        // A base dir that is actually a file (not a directory) makes
        // `create_dir_all` fail, exercising the non-fatal fallback path.
        let base_parent = tempfile::tempdir().unwrap();
        let blocked_base = base_parent.path().join("not-a-dir");
        tokio::fs::write(&blocked_base, b"occupied").await.unwrap();

        let manager = WorkspaceManager::with_base_dir(&blocked_base);
        let handle = manager.prepare("run-3", None, true).await;
        assert!(!handle.is_isolated());
        assert_eq!(handle.working_directory, handle.original_working_directory);
    }
}
