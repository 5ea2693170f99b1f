//! Isolated copies of a terraform module
//!
//! Each apply runs against its own copy of the module tree so concurrent
//! scenarios never share `.terraform` directories or state files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use walkdir::WalkDir;

use super::random::unique_id;
use crate::common::paths::work_dir;
use crate::common::{Error, Result};

/// Files that belong to a previous run, never to the module itself
const STATE_FILES: &[&str] = &[
    "terraform.tfstate",
    "terraform.tfstate.backup",
    "terraform.tfvars",
    "terraform.tfvars.json",
];

/// Hidden files that pin the module's provider and terraform versions
const KEPT_HIDDEN: &[&str] = &[".terraform.lock.hcl", ".terraform-version"];

/// A temp copy of a module root; removed on drop
#[derive(Debug)]
pub struct ModuleCopy {
    root: TempDir,
    module_dir: PathBuf,
}

impl ModuleCopy {
    /// Directory terraform should run in
    pub fn module_dir(&self) -> &Path {
        &self.module_dir
    }

    /// Root of the copied tree
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Stop the copy from being removed on drop and return its root
    ///
    /// Used when a destroy fails: the state file in the copy is the only
    /// record of what is still running.
    pub fn keep(self) -> PathBuf {
        self.root.keep()
    }
}

/// Copy `module_root` to a fresh temp dir and point at `sub` inside it
///
/// `sub` is relative to the module root; `.` selects the root itself.
/// Hidden entries (except the lock and version files) and terraform
/// state/var files are skipped. Symlinks are followed.
pub fn copy_module_to_temp(module_root: &Path, sub: &str) -> Result<ModuleCopy> {
    if !module_root.is_dir() {
        return Err(Error::Config(format!(
            "Module root '{}' is not a directory",
            module_root.display()
        )));
    }

    let name = module_root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "module".to_string());
    let root = tempfile::Builder::new()
        .prefix(&format!("{}-{}-", name, unique_id()))
        .tempdir_in(work_dir())?;

    copy_tree(module_root, root.path())?;

    let module_dir = if sub.is_empty() || sub == "." {
        root.path().to_path_buf()
    } else {
        root.path().join(sub)
    };
    if !module_dir.is_dir() {
        return Err(Error::Config(format!(
            "Module '{}' not found under '{}'",
            sub,
            module_root.display()
        )));
    }

    tracing::debug!(
        from = %module_root.display(),
        to = %module_dir.display(),
        "Copied module"
    );

    Ok(ModuleCopy { root, module_dir })
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    let walker = WalkDir::new(from)
        .min_depth(1)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| !is_skipped(&e.file_name().to_string_lossy()));

    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| Error::Internal(format!("Walked outside module root: {}", e)))?;
        let target = to.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn is_skipped(name: &str) -> bool {
    if KEPT_HIDDEN.contains(&name) {
        return false;
    }
    name.starts_with('.') || STATE_FILES.contains(&name)
}
