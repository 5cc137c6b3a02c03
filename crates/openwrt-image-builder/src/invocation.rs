use std::path::{Path, PathBuf};

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::target::TargetConfig;
use crate::workspace::{self, WorkspacePaths};

/// Options shared by the base and imagebuilder image builds.
#[derive(Debug, Clone, Default)]
pub struct ImageOpts {
    /// Dockerfile name inside the dockerfile dir; settings default when unset.
    pub dockerfile: Option<String>,
    pub max_age_days: Option<u32>,
    pub force: bool,
    /// Extra arguments for the engine `build` call, one argument each.
    pub params: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ShellOpts {
    /// Start in the base image instead of the target's imagebuilder image.
    pub base: bool,
    /// Shell command line, run with `bash -c`. Interactive `bash` when unset.
    pub cmd: Option<String>,
    /// Extra arguments for the engine `run` call, one argument each.
    pub params: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum Goal {
    BaseImage(ImageOpts),
    Imagebuilder(ImageOpts),
    Shell(ShellOpts),
    Build { force: bool },
    Info,
    Clean,
}

impl Goal {
    pub fn name(&self) -> &'static str {
        match self {
            Goal::BaseImage(_) => "base-image",
            Goal::Imagebuilder(_) => "imagebuilder",
            Goal::Shell(_) => "shell",
            Goal::Build { .. } => "build",
            Goal::Info => "info",
            Goal::Clean => "clean",
        }
    }

    pub fn needs_target(&self) -> bool {
        match self {
            Goal::BaseImage(_) => false,
            Goal::Shell(opts) => !opts.base,
            _ => true,
        }
    }
}

/// Everything a task needs besides the execution context. Built once per
/// process; the target file is read and validated here, so a bad target
/// config stops the run before any engine or `make` command.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub settings: Settings,
    pub goal: Goal,
    pub paths: WorkspacePaths,
    pub target_path: PathBuf,
    target: Option<TargetConfig>,
}

impl Invocation {
    pub fn prepare(
        settings: Settings,
        goal: Goal,
        workdir: Option<&Path>,
        target_file: Option<&Path>,
    ) -> Result<Self> {
        let paths = workspace::load_paths(&settings.workspace, workdir)?;
        let target_path = match target_file {
            Some(p) => paths.resolve(&p.to_string_lossy())?,
            None => paths.resolve(&settings.target.config)?,
        };
        let target = if goal.needs_target() {
            Some(TargetConfig::load(&target_path)?)
        } else {
            None
        };
        Ok(Self {
            settings,
            goal,
            paths,
            target_path,
            target,
        })
    }

    pub fn target(&self) -> Result<&TargetConfig> {
        self.target.as_ref().ok_or_else(|| {
            Error::msg(format!(
                "goal '{}' does not load a target config",
                self.goal.name()
            ))
        })
    }

    pub fn imagebuilder_image(&self) -> Result<String> {
        let ib = &self.settings.imagebuilder;
        Ok(self
            .target()?
            .namespaced_image_name(ib.namespace.as_deref(), &ib.image))
    }

    pub fn imagebuilder_url(&self) -> Result<String> {
        Ok(self
            .target()?
            .imagebuilder_url_from(&self.settings.imagebuilder.mirror))
    }
}
