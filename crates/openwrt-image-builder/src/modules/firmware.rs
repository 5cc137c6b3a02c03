use std::fs;
use std::io::Read;
use std::path::Path;

use serde_json::json;

use crate::error::{Error, Result};
use crate::executor::{ExecCtx, ModuleExec, TaskRegistry};
use crate::invocation::{Goal, Invocation};
use crate::modules::{
    Module, TOKEN_DIRS, TOKEN_IMAGEBUILDER_READY, TOKEN_PLATFORM, task, util,
};
use crate::planner::Plan;

const BUILD_TASK_ID: &str = "firmware.build";
const REPORT_TASK_ID: &str = "firmware.report";
const INFO_TASK_ID: &str = "firmware.info";
const CLEAN_TASK_ID: &str = "firmware.clean";

pub const REPORT_FILE: &str = "build-report.json";

pub struct FirmwareModule;

impl Module for FirmwareModule {
    fn id(&self) -> &'static str {
        "firmware"
    }

    fn detect(&self, inv: &Invocation) -> bool {
        matches!(inv.goal, Goal::Build { .. } | Goal::Info | Goal::Clean)
    }

    fn plan(&self, inv: &Invocation, plan: &mut Plan) -> Result<()> {
        match inv.goal {
            Goal::Build { .. } => {
                plan.add(task(
                    self.id(),
                    BUILD_TASK_ID,
                    "Build firmware image",
                    &[TOKEN_IMAGEBUILDER_READY, TOKEN_DIRS],
                    &[],
                ))?;
                plan.add(task(
                    self.id(),
                    REPORT_TASK_ID,
                    "Write build report",
                    &[BUILD_TASK_ID],
                    &[],
                ))
            }
            Goal::Info => plan.add(task(
                self.id(),
                INFO_TASK_ID,
                "Show imagebuilder info",
                &[TOKEN_PLATFORM, TOKEN_DIRS],
                &[],
            )),
            Goal::Clean => plan.add(task(
                self.id(),
                CLEAN_TASK_ID,
                "Clean imagebuilder",
                &[TOKEN_PLATFORM, TOKEN_DIRS],
                &[],
            )),
            _ => Ok(()),
        }
    }
}

impl ModuleExec for FirmwareModule {
    fn register_tasks(reg: &mut TaskRegistry) -> Result<()> {
        reg.add(BUILD_TASK_ID, build_firmware)?;
        reg.add(REPORT_TASK_ID, write_report)?;
        reg.add(INFO_TASK_ID, imagebuilder_info)?;
        reg.add(CLEAN_TASK_ID, imagebuilder_clean)?;
        Ok(())
    }
}

/// Arguments for `make image` inside the imagebuilder workdir.
pub fn make_image_args(inv: &Invocation) -> Result<Vec<String>> {
    let t = inv.target()?;
    let ib = &inv.settings.imagebuilder;
    let mut args = vec![
        "image".to_string(),
        format!("PROFILE={}", t.profile()),
        format!("PACKAGES={}", t.packages().join(" ")),
        format!("DISABLED_SERVICES={}", t.disabled_services().join(" ")),
        format!("BIN_DIR={}", ib.container_path("output")),
    ];
    if inv.paths.has_overlay() {
        args.push(format!("FILES={}", ib.container_path("overlay")));
    }
    Ok(args)
}

fn make_command(inv: &Invocation, args: &[String]) -> Vec<String> {
    let mut cmd = vec![
        "make".to_string(),
        "-C".to_string(),
        inv.settings.imagebuilder.workdir(),
    ];
    cmd.extend(args.iter().cloned());
    cmd
}

fn imagebuilder_info(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    run_make(inv, ctx, &["info".to_string()])
}

fn imagebuilder_clean(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    run_make(inv, ctx, &["clean".to_string()])
}

fn run_make(inv: &Invocation, ctx: &mut ExecCtx, args: &[String]) -> Result<()> {
    let image = inv.imagebuilder_image()?;
    if !util::image_present(ctx, &image)? {
        return Err(Error::msg(format!(
            "imagebuilder image '{image}' not found; run `owrt imagebuilder` first"
        )));
    }
    util::container_run(
        ctx,
        util::ContainerRun {
            image,
            mounts: util::imagebuilder_mounts(inv),
            params: Vec::new(),
            command: make_command(inv, args),
            interactive: false,
        },
    )
}

fn build_firmware(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    for (key, value) in inv.target()?.describe() {
        ctx.log(&format!("{key}={value}"));
    }
    let args = make_image_args(inv)?;
    run_make(inv, ctx, &args)
}

/// Target summary plus the SHA-256 of every file under the output dir.
pub fn build_report(inv: &Invocation) -> Result<serde_json::Value> {
    let t = inv.target()?;
    let out_dir = &inv.paths.output_dir;
    let mut artifacts = Vec::new();
    if out_dir.is_dir() {
        for entry in walkdir::WalkDir::new(out_dir).sort_by_file_name() {
            let entry = entry.map_err(|e| Error::msg(format!("walkdir error: {e}")))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let p = entry.path();
            let rel = p
                .strip_prefix(out_dir)
                .map_err(|e| Error::msg(format!("strip_prefix failed: {e}")))?;
            if rel == Path::new(REPORT_FILE) {
                continue;
            }
            let size = fs::metadata(p)
                .map_err(|e| Error::msg(format!("failed to stat {}: {e}", p.display())))?
                .len();
            artifacts.push(json!({
                "path": rel.to_string_lossy(),
                "size": size,
                "sha256": sha256_file_hex(p)?,
            }));
        }
    }

    Ok(json!({
        "profile": t.profile(),
        "release": t.release().to_string(),
        "target": t.target(),
        "subtarget": t.subtarget(),
        "packages": t.packages(),
        "disabled_services": t.disabled_services(),
        "imagebuilder_url": inv.imagebuilder_url()?,
        "image": inv.imagebuilder_image()?,
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "artifacts": artifacts,
    }))
}

fn write_report(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    let path = inv.paths.output_dir.join(REPORT_FILE);
    if ctx.dry_run {
        ctx.log(&format!("DRY-RUN: would write {}", path.display()));
        return Ok(());
    }
    let report = build_report(inv)?;
    let count = report["artifacts"].as_array().map_or(0, Vec::len);
    util::write_json_pretty(&path, &report)?;
    ctx.log(&format!("wrote {} ({count} artifacts)", path.display()));
    Ok(())
}

fn sha256_file_hex(path: &Path) -> Result<String> {
    use sha2::{Digest, Sha256};

    let mut file = fs::File::open(path)
        .map_err(|e| Error::msg(format!("failed to open {}: {e}", path.display())))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file
            .read(&mut buf)
            .map_err(|e| Error::msg(format!("failed to read {}: {e}", path.display())))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
