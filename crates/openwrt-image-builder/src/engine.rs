//! Docker/Podman command construction. The two engines accept the same CLI
//! apart from user mapping, bind-mount syntax and the image format flag.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Duration, FixedOffset};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    /// Query `<program> --version`.
    #[default]
    Auto,
    Docker,
    Podman,
}

impl EngineKind {
    pub fn platform(self) -> Option<Platform> {
        match self {
            EngineKind::Auto => None,
            EngineKind::Docker => Some(Platform::Docker),
            EngineKind::Podman => Some(Platform::Podman),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Docker,
    Podman,
}

impl Platform {
    /// `docker --version` on a Podman host (via the compat shim) still prints
    /// `podman version ...`.
    pub fn from_version_output(out: &str) -> Self {
        if out.trim_start().to_ascii_lowercase().starts_with("podman") {
            Platform::Podman
        } else {
            Platform::Docker
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Docker => "docker",
            Platform::Podman => "podman",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Mount {
    pub source: PathBuf,
    pub target: String,
}

#[derive(Debug, Clone, Default)]
pub struct BuildSpec {
    pub image: String,
    pub dockerfile: String,
    pub context_dir: PathBuf,
    pub build_args: Vec<(String, String)>,
    pub no_cache: bool,
    pub params: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    pub image: String,
    pub hostname: String,
    pub interactive: bool,
    pub env: Vec<(String, String)>,
    pub mounts: Vec<Mount>,
    pub params: Vec<String>,
    pub command: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Engine {
    pub platform: Platform,
    pub program: String,
}

impl Engine {
    pub fn new(platform: Platform, program: impl Into<String>) -> Self {
        Self {
            platform,
            program: program.into(),
        }
    }

    fn command(&self) -> Command {
        Command::new(&self.program)
    }

    pub fn version_query(program: &str) -> Command {
        let mut cmd = Command::new(program);
        cmd.arg("--version");
        cmd
    }

    pub fn image_id_query(&self, image: &str) -> Command {
        let mut cmd = self.command();
        cmd.args(["images", "-q", image]);
        cmd
    }

    pub fn image_created_query(&self, image: &str) -> Command {
        let mut cmd = self.command();
        cmd.args(["history", "--format", "{{ .CreatedAt }}", image]);
        cmd
    }

    pub fn build(&self, spec: &BuildSpec) -> Command {
        let mut cmd = self.command();
        cmd.current_dir(&spec.context_dir);
        cmd.arg("build");
        if spec.no_cache {
            cmd.arg("--no-cache");
        }
        if self.platform == Platform::Podman {
            cmd.arg("--format=docker");
        }
        for (k, v) in &spec.build_args {
            cmd.arg("--build-arg").arg(format!("{k}={v}"));
        }
        cmd.arg("--tag").arg(latest(&spec.image));
        cmd.arg("--file").arg(&spec.dockerfile);
        cmd.args(&spec.params);
        cmd.arg(".");
        cmd
    }

    pub fn run(&self, spec: &RunSpec) -> Command {
        let (uid, gid) = current_ids();
        let mut cmd = self.command();
        cmd.args(["run", "--rm"]);
        if spec.interactive {
            cmd.args(["--interactive", "--tty"]);
        }
        cmd.arg("--hostname").arg(&spec.hostname);
        match self.platform {
            Platform::Podman => {
                cmd.arg("--userns=keep-id");
            }
            Platform::Docker => {
                cmd.arg("-u").arg(format!("{uid}:{gid}"));
            }
        }
        for (k, v) in &spec.env {
            cmd.arg("--env").arg(format!("{k}={v}"));
        }
        for m in &spec.mounts {
            cmd.arg("--mount").arg(self.mount_arg(m));
        }
        cmd.args(&spec.params);
        cmd.arg(latest(&spec.image));
        cmd.args(&spec.command);
        cmd
    }

    pub fn mount_arg(&self, m: &Mount) -> String {
        match self.platform {
            Platform::Podman => format!(
                "type=bind,src={},dst={},relabel=shared",
                m.source.display(),
                m.target
            ),
            Platform::Docker => format!(
                "type=bind,source={},destination={}",
                m.source.display(),
                m.target
            ),
        }
    }
}

/// Bind mounts for the sources that exist; missing ones are skipped.
pub fn existing_mounts(pairs: &[(&Path, String)]) -> Vec<Mount> {
    pairs
        .iter()
        .filter(|(src, _)| src.exists())
        .map(|(src, dst)| Mount {
            source: src.to_path_buf(),
            target: dst.clone(),
        })
        .collect()
}

fn latest(image: &str) -> String {
    format!("{image}:latest")
}

pub fn current_ids() -> (u32, u32) {
    #[cfg(unix)]
    {
        // SAFETY: getuid/getgid cannot fail and touch no memory.
        unsafe { (libc::getuid(), libc::getgid()) }
    }
    #[cfg(not(unix))]
    {
        (0, 0)
    }
}

/// Parse the first line of `history --format '{{ .CreatedAt }}'`.
pub fn parse_created_at(out: &str) -> Option<DateTime<FixedOffset>> {
    let line = out.lines().map(str::trim).find(|l| !l.is_empty())?;
    DateTime::parse_from_str(line, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(line))
        .ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildDecision {
    Missing,
    Forced,
    Stale { age_days: i64 },
    Fresh,
}

impl RebuildDecision {
    pub fn needs_build(self) -> bool {
        !matches!(self, RebuildDecision::Fresh)
    }
}

pub fn decide_rebuild(exists: bool, force: bool, age: Duration, max_age_days: u32) -> RebuildDecision {
    if !exists {
        RebuildDecision::Missing
    } else if force {
        RebuildDecision::Forced
    } else if age.num_days() > i64::from(max_age_days) {
        RebuildDecision::Stale {
            age_days: age.num_days(),
        }
    } else {
        RebuildDecision::Fresh
    }
}

/// `2d 03:04:05`
pub fn format_age(age: Duration) -> String {
    let total = age.num_seconds().max(0);
    let days = total / 86_400;
    let hours = (total % 86_400) / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{days}d {hours:02}:{minutes:02}:{seconds:02}")
}
