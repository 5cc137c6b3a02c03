use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, mpsc};
use std::time::Instant;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::invocation::Invocation;
use crate::planner::Plan;

pub mod output;

use output::{read_output_stream, sanitize_line};

pub type TaskExecFn = fn(&Invocation, &mut ExecCtx) -> Result<()>;

#[derive(Debug, Clone)]
pub enum ExecEvent {
    TaskStarted {
        id: String,
    },
    TaskLog {
        id: String,
        line: String,
    },
    CommandIssued {
        id: String,
        argv: Vec<String>,
        cwd: Option<PathBuf>,
        dry_run: bool,
    },
    TaskFinished {
        id: String,
        ok: bool,
        error: Option<String>,
        elapsed_ms: u128,
    },
    ExecutorDone {
        ok: bool,
        error: Option<String>,
    },
}

pub trait ExecSink: Send + Sync {
    fn emit(&self, ev: ExecEvent);
}

/// Forwards executor events to `tracing`.
#[derive(Default)]
pub struct TracingSink;

impl ExecSink for TracingSink {
    fn emit(&self, ev: ExecEvent) {
        match ev {
            ExecEvent::TaskStarted { id } => tracing::debug!(task = %id, "task started"),
            ExecEvent::TaskLog { id, line } => tracing::info!(task = %id, "{line}"),
            ExecEvent::CommandIssued {
                id,
                argv,
                cwd,
                dry_run,
            } => {
                let cwd = cwd.map(|p| p.display().to_string()).unwrap_or_default();
                if dry_run {
                    tracing::info!(task = %id, cwd = %cwd, "DRY-RUN: {}", shell_join(&argv));
                } else {
                    tracing::info!(task = %id, cwd = %cwd, "command: {}", shell_join(&argv));
                }
            }
            ExecEvent::TaskFinished {
                id,
                ok,
                error,
                elapsed_ms,
            } => {
                if ok {
                    tracing::debug!(task = %id, elapsed_ms = elapsed_ms as u64, "task done");
                } else {
                    tracing::error!(
                        task = %id,
                        elapsed_ms = elapsed_ms as u64,
                        "task failed: {}",
                        error.unwrap_or_default()
                    );
                }
            }
            ExecEvent::ExecutorDone { ok, error } => {
                if ok {
                    tracing::info!("done");
                } else {
                    tracing::error!("failed: {}", error.unwrap_or_default());
                }
            }
        }
    }
}

#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ExecEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ExecEvent>) -> Self {
        Self { tx }
    }
}

impl ExecSink for ChannelSink {
    fn emit(&self, ev: ExecEvent) {
        let _ = self.tx.send(ev);
    }
}

/// Per-run state threaded through every task. The detected container engine
/// lives here once `core.platform` has run.
pub struct ExecCtx {
    pub dry_run: bool,
    pub sink: Arc<dyn ExecSink>,
    pub current_task_id: Option<String>,
    engine: Option<Engine>,
}

impl ExecCtx {
    pub fn new(dry_run: bool, sink: Arc<dyn ExecSink>) -> Self {
        Self {
            dry_run,
            sink,
            current_task_id: None,
            engine: None,
        }
    }

    pub fn set_task(&mut self, id: impl Into<String>) {
        self.current_task_id = Some(id.into());
    }

    fn task_id(&self) -> String {
        self.current_task_id
            .clone()
            .unwrap_or_else(|| "<none>".into())
    }

    pub fn set_engine(&mut self, engine: Engine) {
        self.engine = Some(engine);
    }

    pub fn engine(&self) -> Result<&Engine> {
        self.engine
            .as_ref()
            .ok_or_else(|| Error::msg("container platform not detected (core.platform did not run)"))
    }

    pub fn log(&self, msg: &str) {
        self.sink.emit(ExecEvent::TaskLog {
            id: self.task_id(),
            line: msg.to_string(),
        });
    }

    fn issue(&self, cmd: &Command) {
        self.sink.emit(ExecEvent::CommandIssued {
            id: self.task_id(),
            argv: argv(cmd),
            cwd: cmd.get_current_dir().map(PathBuf::from),
            dry_run: self.dry_run,
        });
    }

    /// Run a command with its output streamed, line by line and sanitized,
    /// into the task log.
    pub fn run_cmd(&self, mut cmd: Command) -> Result<()> {
        self.issue(&cmd);
        if self.dry_run {
            return Ok(());
        }

        let mut child = cmd
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::tool(format!("failed to start {}: {e}", program(&cmd))))?;

        let (tx, rx) = mpsc::channel::<String>();
        if let Some(out) = child.stdout.take() {
            let tx = tx.clone();
            std::thread::spawn(move || read_output_stream(out, tx));
        }
        if let Some(err) = child.stderr.take() {
            let tx = tx.clone();
            std::thread::spawn(move || read_output_stream(err, tx));
        }
        drop(tx);

        for line in rx {
            let line = sanitize_line(&line);
            if !line.is_empty() {
                self.log(&line);
            }
        }

        let status = child
            .wait()
            .map_err(|e| Error::tool(format!("wait failed: {e}")))?;
        if !status.success() {
            return Err(Error::tool(format!(
                "{} failed: {status}",
                program(&cmd)
            )));
        }
        Ok(())
    }

    /// Run a command attached to this terminal (interactive shells).
    pub fn run_interactive(&self, mut cmd: Command) -> Result<()> {
        self.issue(&cmd);
        if self.dry_run {
            return Ok(());
        }
        let status = cmd
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|e| Error::tool(format!("failed to start {}: {e}", program(&cmd))))?;
        if !status.success() {
            return Err(Error::tool(format!(
                "{} failed: {status}",
                program(&cmd)
            )));
        }
        Ok(())
    }

    /// Run a read-only query and return its trimmed stdout. A non-zero exit or
    /// empty output yields `None`; failing to start the program is an error.
    /// Queries are not executed in dry-run mode.
    pub fn capture(&self, mut cmd: Command) -> Result<Option<String>> {
        if self.dry_run {
            self.log(&format!("DRY-RUN: skipped query: {}", shell_join(&argv(&cmd))));
            return Ok(None);
        }
        let out = cmd
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::tool(format!("failed to start {}: {e}", program(&cmd))))?;
        if !out.status.success() {
            tracing::debug!(
                command = %shell_join(&argv(&cmd)),
                status = %out.status,
                "query failed"
            );
            return Ok(None);
        }
        let stdout = String::from_utf8_lossy(&out.stdout).trim_end().to_string();
        Ok((!stdout.trim().is_empty()).then_some(stdout))
    }
}

fn program(cmd: &Command) -> String {
    cmd.get_program().to_string_lossy().into_owned()
}

pub fn argv(cmd: &Command) -> Vec<String> {
    std::iter::once(cmd.get_program())
        .chain(cmd.get_args())
        .map(|a| a.to_string_lossy().into_owned())
        .collect()
}

/// Render an argv the way it would be typed into a POSIX shell.
pub fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=,@%+".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[derive(Default)]
pub struct TaskRegistry {
    exec: BTreeMap<&'static str, TaskExecFn>,
}

impl TaskRegistry {
    pub fn add(&mut self, id: &'static str, f: TaskExecFn) -> Result<()> {
        if self.exec.contains_key(id) {
            return Err(Error::msg(format!("duplicate task executor for '{id}'")));
        }
        self.exec.insert(id, f);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<TaskExecFn> {
        self.exec.get(id).copied()
    }
}

pub trait ModuleExec {
    fn register_tasks(reg: &mut TaskRegistry) -> Result<()>;
}

/// Run the plan's tasks one after another in dependency order. The first
/// failure stops the run.
pub fn execute_plan(
    inv: &Invocation,
    plan: &Plan,
    reg: &TaskRegistry,
    ctx: &mut ExecCtx,
) -> Result<()> {
    for task in plan.ordered()? {
        let Some(exec) = reg.get(&task.id) else {
            return Err(Error::msg(format!(
                "no executor registered for task '{}'",
                task.id
            )));
        };
        ctx.sink.emit(ExecEvent::TaskStarted {
            id: task.id.clone(),
        });
        ctx.set_task(task.id.clone());
        let start = Instant::now();
        let res = exec(inv, ctx);
        let elapsed_ms = start.elapsed().as_millis();
        match res {
            Ok(()) => ctx.sink.emit(ExecEvent::TaskFinished {
                id: task.id.clone(),
                ok: true,
                error: None,
                elapsed_ms,
            }),
            Err(e) => {
                ctx.sink.emit(ExecEvent::TaskFinished {
                    id: task.id.clone(),
                    ok: false,
                    error: Some(e.to_string()),
                    elapsed_ms,
                });
                let e = e.context(format!("task '{}' failed", task.id));
                ctx.sink.emit(ExecEvent::ExecutorDone {
                    ok: false,
                    error: Some(e.to_string()),
                });
                return Err(e);
            }
        }
    }
    ctx.sink.emit(ExecEvent::ExecutorDone {
        ok: true,
        error: None,
    });
    Ok(())
}

pub fn builtin_registry() -> Result<TaskRegistry> {
    let mut reg = TaskRegistry::default();
    crate::modules::core::CoreModule::register_tasks(&mut reg)?;
    crate::modules::base::BaseModule::register_tasks(&mut reg)?;
    crate::modules::imagebuilder::ImagebuilderModule::register_tasks(&mut reg)?;
    crate::modules::firmware::FirmwareModule::register_tasks(&mut reg)?;
    crate::modules::shell::ShellModule::register_tasks(&mut reg)?;
    Ok(reg)
}
