use crate::engine::{self, BuildSpec, RebuildDecision};
use crate::error::Result;
use crate::executor::{ExecCtx, ModuleExec, TaskRegistry};
use crate::invocation::{Goal, ImageOpts, Invocation};
use crate::modules::{Module, TOKEN_BASE_READY, TOKEN_IMAGEBUILDER_READY, task, util};
use crate::planner::Plan;

const IMAGE_TASK_ID: &str = "imagebuilder.image";

pub struct ImagebuilderModule;

impl Module for ImagebuilderModule {
    fn id(&self) -> &'static str {
        "imagebuilder"
    }

    fn detect(&self, inv: &Invocation) -> bool {
        matches!(inv.goal, Goal::Imagebuilder(_) | Goal::Build { .. })
    }

    fn plan(&self, _inv: &Invocation, plan: &mut Plan) -> Result<()> {
        plan.add(task(
            self.id(),
            IMAGE_TASK_ID,
            "Build imagebuilder image",
            &[TOKEN_BASE_READY],
            &[TOKEN_IMAGEBUILDER_READY],
        ))
    }
}

impl ModuleExec for ImagebuilderModule {
    fn register_tasks(reg: &mut TaskRegistry) -> Result<()> {
        reg.add(IMAGE_TASK_ID, build_imagebuilder)
    }
}

/// `--build-arg` pairs the imagebuilder Dockerfile expects.
pub fn build_args(inv: &Invocation, uid: u32, gid: u32) -> Result<Vec<(String, String)>> {
    let ib = &inv.settings.imagebuilder;
    Ok(vec![
        ("IMAGE_BASE".into(), inv.settings.base.image.clone()),
        ("BUILDER_URL".into(), inv.imagebuilder_url()?),
        ("BUILDER_WORKDIR_ROOT".into(), ib.workdir_root.clone()),
        ("BUILDER_WORKDIR".into(), ib.workdir()),
        ("BUILDER_USER".into(), ib.user.clone()),
        ("BUILDER_UID".into(), uid.to_string()),
        ("BUILDER_GID".into(), gid.to_string()),
    ])
}

fn build_imagebuilder(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    let opts = match &inv.goal {
        Goal::Imagebuilder(opts) => opts.clone(),
        Goal::Build { force } => ImageOpts {
            force: *force,
            ..ImageOpts::default()
        },
        _ => ImageOpts::default(),
    };
    let cfg = &inv.settings.imagebuilder;
    let image = inv.imagebuilder_image()?;
    let max_age = opts.max_age_days.unwrap_or(cfg.max_age_days);
    let decision = util::rebuild_decision(ctx, &image, opts.force, max_age)?;
    if !decision.needs_build() {
        return Ok(());
    }

    let (uid, gid) = engine::current_ids();
    let spec = BuildSpec {
        image,
        dockerfile: opts.dockerfile.unwrap_or_else(|| cfg.dockerfile.clone()),
        build_args: build_args(inv, uid, gid)?,
        no_cache: decision == RebuildDecision::Forced,
        params: opts.params,
        ..BuildSpec::default()
    };
    util::build_image(inv, ctx, spec)
}
