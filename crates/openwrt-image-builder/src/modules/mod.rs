use crate::error::Result;
use crate::invocation::Invocation;
use crate::planner::{Plan, Task};

pub mod base;
pub mod core;
pub mod firmware;
pub mod imagebuilder;
pub mod shell;
pub mod util;

pub const TOKEN_PLATFORM: &str = "core:platform";
pub const TOKEN_DIRS: &str = "core:dirs";
pub const TOKEN_BASE_READY: &str = "base:ready";
pub const TOKEN_IMAGEBUILDER_READY: &str = "imagebuilder:ready";

pub trait Module {
    fn id(&self) -> &'static str;
    fn detect(&self, inv: &Invocation) -> bool;
    fn plan(&self, inv: &Invocation, plan: &mut Plan) -> Result<()>;
}

pub fn builtin_modules() -> Vec<Box<dyn Module>> {
    vec![
        Box::new(core::CoreModule),
        Box::new(base::BaseModule),
        Box::new(imagebuilder::ImagebuilderModule),
        Box::new(firmware::FirmwareModule),
        Box::new(shell::ShellModule),
    ]
}

/// Collect the tasks every detected module contributes for this goal.
pub fn build_plan(inv: &Invocation) -> Result<Plan> {
    let mut plan = Plan::default();
    for m in builtin_modules() {
        if m.detect(inv) {
            m.plan(inv, &mut plan)?;
        }
    }
    Ok(plan)
}

pub(crate) fn task(module: &str, id: &str, label: &str, after: &[&str], provides: &[&str]) -> Task {
    Task {
        id: id.into(),
        label: label.into(),
        module: module.into(),
        after: after.iter().map(|s| s.to_string()).collect(),
        provides: provides.iter().map(|s| s.to_string()).collect(),
    }
}
