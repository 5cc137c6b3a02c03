use std::fs;
use std::io::IsTerminal;
use std::path::Path;

use chrono::{Duration, Utc};

use crate::engine::{self, BuildSpec, Mount, RebuildDecision, RunSpec};
use crate::error::{Error, Result};
use crate::executor::ExecCtx;
use crate::invocation::Invocation;
use crate::target;

pub fn image_id(ctx: &ExecCtx, image: &str) -> Result<Option<String>> {
    let engine = ctx.engine()?;
    Ok(ctx
        .capture(engine.image_id_query(image))?
        .map(|out| out.lines().next().unwrap_or_default().trim().to_string())
        .filter(|id| !id.is_empty()))
}

/// Age of the newest layer; zero when the engine cannot tell.
pub fn image_age(ctx: &ExecCtx, image: &str) -> Result<Duration> {
    let engine = ctx.engine()?;
    let created = ctx
        .capture(engine.image_created_query(image))?
        .as_deref()
        .and_then(engine::parse_created_at);
    Ok(match created {
        Some(dt) => Utc::now().signed_duration_since(dt),
        None => {
            tracing::debug!(image, "no creation date found");
            Duration::zero()
        }
    })
}

/// Whether a run may use `image`. Dry runs assume it exists.
pub fn image_present(ctx: &ExecCtx, image: &str) -> Result<bool> {
    if ctx.dry_run {
        ctx.log(&format!("DRY-RUN: assuming image '{image}' exists"));
        return Ok(true);
    }
    Ok(image_id(ctx, image)?.is_some())
}

pub fn rebuild_decision(
    ctx: &ExecCtx,
    image: &str,
    force: bool,
    max_age_days: u32,
) -> Result<RebuildDecision> {
    let id = image_id(ctx, image)?;
    let age = if id.is_some() {
        image_age(ctx, image)?
    } else {
        Duration::zero()
    };
    let decision = engine::decide_rebuild(id.is_some(), force, age, max_age_days);
    let msg = match decision {
        RebuildDecision::Missing => format!("image '{image}' does not exist, building"),
        RebuildDecision::Forced => format!("forcing rebuild of image '{image}'"),
        RebuildDecision::Stale { .. } => format!(
            "image '{image}' is {} old (more than {max_age_days} days), rebuilding",
            engine::format_age(age)
        ),
        RebuildDecision::Fresh => format!(
            "image '{image}' exists ({} old), skipping",
            engine::format_age(age)
        ),
    };
    ctx.log(&msg);
    Ok(decision)
}

/// Build `spec.image` from a Dockerfile in the workspace dockerfile dir.
pub fn build_image(inv: &Invocation, ctx: &ExecCtx, mut spec: BuildSpec) -> Result<()> {
    let dockerfile = inv.paths.dockerfile_dir.join(&spec.dockerfile);
    if !dockerfile.is_file() {
        return Err(Error::msg(format!(
            "dockerfile not found: {}",
            dockerfile.display()
        )));
    }
    spec.context_dir = inv.paths.dockerfile_dir.clone();
    let cmd = ctx.engine()?.build(&spec);
    ctx.run_cmd(cmd)
}

pub struct ContainerRun {
    pub image: String,
    pub mounts: Vec<Mount>,
    pub params: Vec<String>,
    pub command: Vec<String>,
    pub interactive: bool,
}

/// Mounts for imagebuilder runs: `output/`, `overlay/` and the target file.
pub fn imagebuilder_mounts(inv: &Invocation) -> Vec<Mount> {
    let ib = &inv.settings.imagebuilder;
    let mut pairs: Vec<(&Path, String)> = vec![
        (inv.paths.output_dir.as_path(), ib.container_path("output")),
        (inv.paths.overlay_dir.as_path(), ib.container_path("overlay")),
    ];
    if let Some(name) = inv.target_path.file_name() {
        pairs.push((
            inv.target_path.as_path(),
            format!("{}/{}", ib.workdir(), name.to_string_lossy()),
        ));
    }
    engine::existing_mounts(&pairs)
}

pub fn container_run(ctx: &ExecCtx, run: ContainerRun) -> Result<()> {
    let engine = ctx.engine()?;
    let (uid, gid) = engine::current_ids();
    let spec = RunSpec {
        hostname: target::hostname(&run.image),
        image: run.image,
        interactive: run.interactive,
        env: vec![
            ("UID".into(), uid.to_string()),
            ("GID".into(), gid.to_string()),
            ("PLATFORM".into(), engine.platform.to_string()),
        ],
        mounts: run.mounts,
        params: run.params,
        command: run.command,
    };
    let cmd = engine.run(&spec);
    if spec.interactive {
        ctx.run_interactive(cmd)
    } else {
        ctx.run_cmd(cmd)
    }
}

pub fn stdin_is_terminal() -> bool {
    std::io::stdin().is_terminal()
}

pub fn ensure_dir(p: &Path) -> Result<()> {
    fs::create_dir_all(p)
        .map_err(|e| Error::msg(format!("failed to create dir {}: {e}", p.display())))
}

pub fn write_json_pretty(p: &Path, v: &serde_json::Value) -> Result<()> {
    let s = serde_json::to_string_pretty(v)
        .map_err(|e| Error::msg(format!("json encode error: {e}")))?;
    if let Some(parent) = p.parent() {
        ensure_dir(parent)?;
    }
    fs::write(p, s).map_err(|e| Error::msg(format!("failed to write {}: {e}", p.display())))
}
