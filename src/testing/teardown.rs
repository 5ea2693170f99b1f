//! Deferred cleanup for scenario resources
//!
//! A teardown is registered before the call that creates its resource and
//! drained in reverse registration order once the scenario body is over,
//! whether it passed, failed an assertion or panicked.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::common::{Error, Result};
use crate::tools::helm::{self, HelmOptions};
use crate::tools::kubectl::{self, KubectlOptions};
use crate::tools::terraform::{self, TerraformOptions};
use crate::tools::workspace::ModuleCopy;
use crate::tools::Toolchain;

/// One registered cleanup
#[derive(Debug)]
pub enum TeardownAction {
    /// `terraform destroy` with the options of the matching apply. Holds the
    /// module copy so it outlives the destroy; kept on disk if destroy fails.
    Destroy {
        options: TerraformOptions,
        module: String,
        workspace: Option<ModuleCopy>,
    },
    /// `kubectl delete namespace`
    DeleteNamespace {
        options: KubectlOptions,
        name: String,
    },
    /// `helm delete`
    DeleteRelease {
        options: HelmOptions,
        release: String,
        purge: bool,
    },
}

impl TeardownAction {
    async fn run(&self, tools: &Toolchain) -> Result<()> {
        match self {
            TeardownAction::Destroy { options, .. } => {
                terraform::destroy(tools, options).await.map(|_| ())
            }
            TeardownAction::DeleteNamespace { options, name } => {
                kubectl::delete_namespace(tools, options, name).await
            }
            TeardownAction::DeleteRelease {
                options,
                release,
                purge,
            } => helm::delete(tools, options, release, *purge).await,
        }
    }

    /// Leave the module copy (and its state) on disk, returning where
    fn keep_workspace(self) -> Option<PathBuf> {
        match self {
            TeardownAction::Destroy {
                workspace: Some(copy),
                ..
            } => Some(copy.keep()),
            _ => None,
        }
    }
}

impl fmt::Display for TeardownAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeardownAction::Destroy { module, .. } => write!(f, "terraform destroy ({})", module),
            TeardownAction::DeleteNamespace { name, .. } => write!(f, "delete namespace {}", name),
            TeardownAction::DeleteRelease { release, .. } => write!(f, "helm delete {}", release),
        }
    }
}

/// Outcome of one teardown
#[derive(Debug, Clone, Serialize)]
pub struct TeardownReport {
    pub action: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Module copy left behind by a failed destroy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kept_workspace: Option<PathBuf>,
}

/// Shared LIFO stack of pending teardowns
///
/// Clones share the same stack, so the scenario body can register while
/// the runner keeps a handle to drain it.
#[derive(Debug, Clone, Default)]
pub struct TeardownStack {
    pending: Arc<Mutex<Vec<TeardownAction>>>,
}

impl TeardownStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `action` to run at scenario exit
    pub fn register(&self, action: TeardownAction) {
        tracing::debug!(action = %action, "Registered teardown");
        match self.pending.lock() {
            Ok(mut pending) => pending.push(action),
            Err(poisoned) => poisoned.into_inner().push(action),
        }
    }

    pub fn len(&self) -> usize {
        match self.pending.lock() {
            Ok(pending) => pending.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pop(&self) -> Option<TeardownAction> {
        match self.pending.lock() {
            Ok(mut pending) => pending.pop(),
            Err(poisoned) => poisoned.into_inner().pop(),
        }
    }

    /// Run every pending teardown, most recent first
    ///
    /// A failing teardown is reported and the rest still run.
    pub async fn run_all(&self, tools: &Toolchain) -> Vec<TeardownReport> {
        let mut reports = Vec::new();
        while let Some(action) = self.pop() {
            let label = action.to_string();
            tracing::info!(action = %label, "Tearing down");
            let outcome = action.run(tools).await;
            let report = match outcome {
                Ok(()) => TeardownReport {
                    action: label,
                    ok: true,
                    error: None,
                    kept_workspace: None,
                },
                Err(e) => {
                    let err = Error::teardown(&label, e);
                    tracing::error!(error = %err, "Teardown failed");
                    let kept_workspace = action.keep_workspace();
                    if let Some(path) = &kept_workspace {
                        tracing::warn!(path = %path.display(), "Kept module copy with its state for manual cleanup");
                    }
                    TeardownReport {
                        action: label,
                        ok: false,
                        error: Some(err.to_string()),
                        kept_workspace,
                    }
                }
            };
            reports.push(report);
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::workspace::copy_module_to_temp;
    use crate::tools::{RecordingRunner, ToolOutput};

    fn namespace(name: &str) -> TeardownAction {
        TeardownAction::DeleteNamespace {
            options: KubectlOptions::default(),
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_runs_in_reverse_order() {
        let runner = Arc::new(RecordingRunner::new());
        let tools = Toolchain::with_runner(runner.clone());
        let stack = TeardownStack::new();

        stack.register(namespace("first"));
        stack.register(TeardownAction::DeleteRelease {
            options: HelmOptions::default(),
            release: "second".to_string(),
            purge: true,
        });
        stack.register(TeardownAction::Destroy {
            options: TerraformOptions::new("/tmp/module"),
            module: ".".to_string(),
            workspace: None,
        });
        assert_eq!(stack.len(), 3);

        let reports = stack.run_all(&tools).await;
        assert!(reports.iter().all(|r| r.ok));
        assert!(stack.is_empty());
        assert_eq!(
            runner.command_lines(),
            vec![
                "terraform destroy -auto-approve -input=false -lock=false",
                "helm delete second",
                "kubectl delete namespace first",
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_remaining() {
        let runner = Arc::new(RecordingRunner::new());
        runner.respond("namespace b", ToolOutput::failed(1, "namespaces \"b\" not found"));
        let tools = Toolchain::with_runner(runner.clone());
        let stack = TeardownStack::new();
        stack.register(namespace("a"));
        stack.register(namespace("b"));

        let reports = stack.run_all(&tools).await;
        assert_eq!(reports.len(), 2);
        assert!(!reports[0].ok);
        let error = reports[0].error.as_deref().unwrap();
        assert!(error.starts_with("Teardown 'delete namespace b' failed"));
        assert!(error.contains("not found"));
        assert!(reports[0].kept_workspace.is_none());
        assert!(reports[1].ok);
    }

    #[tokio::test]
    async fn test_failed_destroy_keeps_module_copy() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("main.tf"), "").unwrap();
        let copy = copy_module_to_temp(src.path(), ".").unwrap();
        let dir = copy.module_dir().to_path_buf();

        let runner = Arc::new(RecordingRunner::new());
        runner.respond("terraform destroy", ToolOutput::failed(1, "Error: context deadline exceeded"));
        let tools = Toolchain::with_runner(runner.clone());
        let stack = TeardownStack::new();
        let mut options = TerraformOptions::new(&dir);
        options.max_retries = 0;
        stack.register(TeardownAction::Destroy {
            options,
            module: ".".to_string(),
            workspace: Some(copy),
        });

        let reports = stack.run_all(&tools).await;
        assert!(!reports[0].ok);
        assert_eq!(reports[0].kept_workspace.as_deref(), Some(dir.as_path()));
        assert!(dir.join("main.tf").exists());
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_successful_destroy_removes_module_copy() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("main.tf"), "").unwrap();
        let copy = copy_module_to_temp(src.path(), ".").unwrap();
        let dir = copy.module_dir().to_path_buf();

        let tools = Toolchain::with_runner(Arc::new(RecordingRunner::new()));
        let stack = TeardownStack::new();
        stack.register(TeardownAction::Destroy {
            options: TerraformOptions::new(&dir),
            module: ".".to_string(),
            workspace: Some(copy),
        });

        let reports = stack.run_all(&tools).await;
        assert!(reports[0].ok);
        assert!(!dir.exists());
    }

    #[test]
    fn test_clones_share_stack() {
        let stack = TeardownStack::new();
        let handle = stack.clone();
        handle.register(namespace("shared"));
        assert_eq!(stack.len(), 1);
    }
}
