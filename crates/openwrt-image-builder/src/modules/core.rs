use crate::engine::{Engine, Platform};
use crate::error::{Error, Result};
use crate::executor::{ExecCtx, ModuleExec, TaskRegistry};
use crate::invocation::{Goal, Invocation};
use crate::modules::{Module, TOKEN_DIRS, TOKEN_PLATFORM, task};
use crate::planner::Plan;
use crate::workspace;

const PLATFORM_TASK_ID: &str = "core.platform";
const PREREQUISITES_TASK_ID: &str = "core.prerequisites";

pub struct CoreModule;

impl Module for CoreModule {
    fn id(&self) -> &'static str {
        "core"
    }

    fn detect(&self, _inv: &Invocation) -> bool {
        true
    }

    fn plan(&self, inv: &Invocation, plan: &mut Plan) -> Result<()> {
        plan.add(task(
            self.id(),
            PLATFORM_TASK_ID,
            "Detect container platform",
            &[],
            &[TOKEN_PLATFORM],
        ))?;
        if matches!(
            inv.goal,
            Goal::Shell(_) | Goal::Build { .. } | Goal::Info | Goal::Clean
        ) {
            plan.add(task(
                self.id(),
                PREREQUISITES_TASK_ID,
                "Check directories",
                &[PLATFORM_TASK_ID],
                &[TOKEN_DIRS],
            ))?;
        }
        Ok(())
    }
}

impl ModuleExec for CoreModule {
    fn register_tasks(reg: &mut TaskRegistry) -> Result<()> {
        reg.add(PLATFORM_TASK_ID, detect_platform)?;
        reg.add(PREREQUISITES_TASK_ID, check_prerequisites)?;
        Ok(())
    }
}

fn detect_platform(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    let cfg = &inv.settings.engine;
    let platform = match cfg.kind.platform() {
        Some(p) => {
            ctx.log(&format!("container platform: {p} (configured)"));
            p
        }
        None if ctx.dry_run => {
            ctx.log("DRY-RUN: container platform not queried, assuming docker");
            Platform::Docker
        }
        None => {
            let out = ctx
                .capture(Engine::version_query(&cfg.program))?
                .ok_or_else(|| {
                    Error::tool(
                        "could not determine container platform (Docker/Podman) - cannot continue",
                    )
                })?;
            let p = Platform::from_version_output(&out);
            ctx.log(&format!("container platform: {p} ({})", out.trim()));
            p
        }
    };
    ctx.set_engine(Engine::new(platform, cfg.program.clone()));
    Ok(())
}

fn check_prerequisites(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    if ctx.dry_run {
        ctx.log(&format!(
            "DRY-RUN: ensure {} exists",
            inv.paths.output_dir.display()
        ));
        return Ok(());
    }
    workspace::init_dirs(&inv.paths)
}
