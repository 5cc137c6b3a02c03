use crate::error::Result;
use crate::executor::{ExecCtx, ModuleExec, TaskRegistry};
use crate::invocation::{Goal, Invocation, ShellOpts};
use crate::modules::{Module, TOKEN_DIRS, TOKEN_PLATFORM, task, util};
use crate::planner::Plan;

const RUN_TASK_ID: &str = "shell.run";

pub struct ShellModule;

impl Module for ShellModule {
    fn id(&self) -> &'static str {
        "shell"
    }

    fn detect(&self, inv: &Invocation) -> bool {
        matches!(inv.goal, Goal::Shell(_))
    }

    fn plan(&self, _inv: &Invocation, plan: &mut Plan) -> Result<()> {
        plan.add(task(
            self.id(),
            RUN_TASK_ID,
            "Run container shell",
            &[TOKEN_PLATFORM, TOKEN_DIRS],
            &[],
        ))
    }
}

impl ModuleExec for ShellModule {
    fn register_tasks(reg: &mut TaskRegistry) -> Result<()> {
        reg.add(RUN_TASK_ID, run_shell)
    }
}

/// Container command: `bash -c <cmd>`, or a login `bash` when no command is given.
pub fn shell_command(cmd: Option<&str>) -> Vec<String> {
    match cmd.map(str::trim).filter(|c| !c.is_empty()) {
        Some(c) => vec!["bash".into(), "-c".into(), c.into()],
        None => vec!["bash".into()],
    }
}

fn run_shell(inv: &Invocation, ctx: &mut ExecCtx) -> Result<()> {
    let opts = match &inv.goal {
        Goal::Shell(opts) => opts.clone(),
        _ => ShellOpts::default(),
    };

    let (image, mounts) = if opts.base {
        (inv.settings.base.image.clone(), Vec::new())
    } else {
        let image = inv.imagebuilder_image()?;
        if !util::image_present(ctx, &image)? {
            tracing::warn!(image = %image, "imagebuilder image not found; run `owrt imagebuilder` first");
            return Ok(());
        }
        (image, util::imagebuilder_mounts(inv))
    };

    let interactive = opts.cmd.is_none() || util::stdin_is_terminal();
    util::container_run(
        ctx,
        util::ContainerRun {
            image,
            mounts,
            params: opts.params,
            command: shell_command(opts.cmd.as_deref()),
            interactive,
        },
    )
}
