use std::fs;
use std::path::Component;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

fn default_root_dir() -> String {
    ".".into()
}

fn default_output_dir() -> String {
    "output".into()
}

fn default_overlay_dir() -> String {
    "overlay".into()
}

fn default_dockerfile_dir() -> String {
    "docker".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    #[serde(default = "default_root_dir")]
    pub root_dir: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_overlay_dir")]
    pub overlay_dir: String,
    #[serde(default = "default_dockerfile_dir")]
    pub dockerfile_dir: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            output_dir: default_output_dir(),
            overlay_dir: default_overlay_dir(),
            dockerfile_dir: default_dockerfile_dir(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub output_dir: PathBuf,
    pub overlay_dir: PathBuf,
    pub dockerfile_dir: PathBuf,
}

impl WorkspacePaths {
    /// Relative paths are rooted at the workspace root; absolute paths are kept.
    pub fn resolve(&self, raw: &str) -> Result<PathBuf> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::msg("empty path"));
        }
        let pb = PathBuf::from(raw);
        Ok(if pb.is_absolute() {
            pb
        } else {
            self.root.join(pb)
        })
    }

    pub fn has_overlay(&self) -> bool {
        self.overlay_dir.is_dir()
    }
}

/// Resolve the layout without touching the filesystem. `root_override` (the
/// CLI `--workdir`) replaces `root_dir`.
pub fn load_paths(cfg: &WorkspaceConfig, root_override: Option<&Path>) -> Result<WorkspacePaths> {
    let cwd = std::env::current_dir().map_err(|e| Error::msg(format!("cwd error: {e}")))?;
    let root = match root_override {
        Some(p) if p.is_absolute() => p.to_path_buf(),
        Some(p) => cwd.join(p),
        None => resolve_user_path(&cwd, &cfg.root_dir)?,
    };
    Ok(WorkspacePaths {
        output_dir: resolve_user_dir(&root, &cfg.output_dir)?,
        overlay_dir: resolve_user_dir(&root, &cfg.overlay_dir)?,
        dockerfile_dir: resolve_user_dir(&root, &cfg.dockerfile_dir)?,
        root,
    })
}

/// Create the directories every container run expects. The overlay is
/// optional and never created.
pub fn init_dirs(paths: &WorkspacePaths) -> Result<()> {
    if !paths.output_dir.is_dir() {
        tracing::info!(path = %paths.output_dir.display(), "creating output directory");
    }
    fs::create_dir_all(&paths.output_dir).map_err(|e| {
        Error::msg(format!(
            "failed to create output dir {}: {e}",
            paths.output_dir.display()
        ))
    })
}

fn resolve_user_dir(root: &Path, p: &str) -> Result<PathBuf> {
    let p = p.trim();
    if p.is_empty() {
        return Err(Error::config("empty workspace dir"));
    }
    let rel_pb = Path::new(p);
    if rel_pb
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(Error::config(format!(
            "invalid workspace dir '{}' (contains '..')",
            p
        )));
    }
    let pb = PathBuf::from(p);
    Ok(if pb.is_absolute() { pb } else { root.join(pb) })
}

fn resolve_user_path(base: &Path, p: &str) -> Result<PathBuf> {
    let p = p.trim();
    if p.is_empty() {
        return Err(Error::config("empty workspace path"));
    }
    let pb = PathBuf::from(p);
    Ok(if pb.is_absolute() { pb } else { base.join(pb) })
}
