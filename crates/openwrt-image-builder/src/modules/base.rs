use crate::engine::{BuildSpec, RebuildDecision};
use crate::error::Result;
use crate::executor::{ExecCtx, ModuleExec, TaskRegistry};
use crate::invocation::{Goal, ImageOpts, Invocation};
use crate::modules::{Module, TOKEN_BASE_READY, TOKEN_PLATFORM, task, util};
use crate::planner::Plan;

const IMAGE_TASK_ID: &str = "base.image";
const CHECK_TASK_ID: &str = "base.check";

pub struct BaseModule;

impl Module for BaseModule {
    fn id(&self) -> &'static str {
        "base"
    }

    fn detect(&self, inv: &Invocation) -> bool {
        matches!(
            inv.goal,
            Goal::BaseImage(_) | Goal::Imagebuilder(_) | Goal::Build { .. }
        )
    }

    fn plan(&self, inv: &Invocation, plan: &mut Plan) -> Result<()> {
        let t = match inv.goal {
            Goal::BaseImage(_) => task(
                self.id(),
                IMAGE_TASK_ID,
                "Build base image",
                &[TOKEN_PLATFORM],
                &[TOKEN_BASE_READY],
            ),
            _ => task(
                self.id(),
                CHECK_TASK_ID,
                "Ensure base image exists",
                &[TOKEN_PLATFORM],
                &[TOKEN_BASE_READY],
            ),
        };
        plan.add(t)
    }
}

impl ModuleExec for BaseModule {
    fn register_tasks(reg: &mut TaskRegistry) -> Result<()> {
        reg.add(IMAGE_TASK_ID, build_base)?;
        reg.add(CHECK_TASK_ID, check_base)?;
        Ok(())
    }
}

fn build_base(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    let opts = match &inv.goal {
        Goal::BaseImage(opts) => opts.clone(),
        _ => ImageOpts::default(),
    };
    ensure_base(inv, ctx, &opts)
}

// The imagebuilder Dockerfile starts FROM the base image, so a missing one is
// built here. An existing one is used regardless of age.
fn check_base(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    let image = &inv.settings.base.image;
    if util::image_id(ctx, image)?.is_some() {
        ctx.log(&format!("base image '{image}' found"));
        return Ok(());
    }
    ensure_base(inv, ctx, &ImageOpts::default())
}

fn ensure_base(inv: &Invocation, ctx: &mut ExecCtx, opts: &ImageOpts) -> Result<()> {
    let cfg = &inv.settings.base;
    let max_age = opts.max_age_days.unwrap_or(cfg.max_age_days);
    let decision = util::rebuild_decision(ctx, &cfg.image, opts.force, max_age)?;
    if !decision.needs_build() {
        return Ok(());
    }
    let spec = BuildSpec {
        image: cfg.image.clone(),
        dockerfile: opts
            .dockerfile
            .clone()
            .unwrap_or_else(|| cfg.dockerfile.clone()),
        build_args: vec![("IMAGE_BASE".into(), cfg.from.clone())],
        no_cache: decision == RebuildDecision::Forced,
        params: opts.params.clone(),
        ..BuildSpec::default()
    };
    util::build_image(inv, ctx, spec)
}
