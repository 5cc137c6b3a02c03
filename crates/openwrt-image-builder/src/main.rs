use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use openwrt_image_builder::config::Settings;
use openwrt_image_builder::engine::EngineKind;
use openwrt_image_builder::executor::{self, ExecCtx, TracingSink};
use openwrt_image_builder::invocation::{Goal, ImageOpts, Invocation, ShellOpts};
use openwrt_image_builder::logging::{self, LogFormat};
use openwrt_image_builder::target::{self, TargetConfig};
use openwrt_image_builder::planner::Plan;
use openwrt_image_builder::{Result, modules, workspace};

#[derive(Debug, Parser)]
#[command(name = "owrt", author, version, about)]
struct Args {
    /// Target config file (KEY=VALUE); defaults to `target.config` from settings
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Settings TOML; `owrt.toml` in the current directory is used when present
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    /// Workspace root holding output/, overlay/ and the Dockerfiles
    #[arg(long, global = true)]
    workdir: Option<PathBuf>,
    /// Container engine; overrides `engine.kind`
    #[arg(long, global = true, value_enum)]
    engine: Option<EngineKind>,
    /// Print what would run without executing anything
    #[arg(long, global = true)]
    dry_run: bool,
    /// Print the task plan instead of executing it
    #[arg(long, global = true)]
    plan: bool,
    /// With --plan, print GraphViz dot instead of a linear plan
    #[arg(long, global = true)]
    dot: bool,
    /// More output; repeat for trace level
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, ClapArgs)]
struct ImageArgs {
    /// Dockerfile name inside the dockerfile directory
    #[arg(long)]
    dockerfile: Option<String>,
    /// Rebuild when the image is older than this many days
    #[arg(long)]
    max_age: Option<u32>,
    /// Rebuild without cache even if the image is fresh
    #[arg(long)]
    force: bool,
    /// Extra argument for the engine build call (repeatable)
    #[arg(long = "param", allow_hyphen_values = true)]
    params: Vec<String>,
}

impl From<ImageArgs> for ImageOpts {
    fn from(a: ImageArgs) -> Self {
        Self {
            dockerfile: a.dockerfile,
            max_age_days: a.max_age,
            force: a.force,
            params: a.params,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build the base container image
    BaseImage(ImageArgs),
    /// Build the imagebuilder container image for the target
    Imagebuilder(ImageArgs),
    /// Open a shell (or run a command) in the container
    Shell {
        /// Use the base image instead of the imagebuilder image
        #[arg(long)]
        base: bool,
        /// Command line to run with `bash -c`
        #[arg(long)]
        cmd: Option<String>,
        /// Extra argument for the engine run call (repeatable)
        #[arg(long = "param", allow_hyphen_values = true)]
        params: Vec<String>,
    },
    /// Build the firmware image
    Build {
        /// Rebuild the imagebuilder image without cache
        #[arg(long)]
        force: bool,
    },
    /// Show imagebuilder profiles and info
    Info,
    /// Clean the imagebuilder work tree
    Clean,
    /// Print the parsed target config and derived values
    Show,
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let args = Args::parse();
    if let Err(e) = logging::init(args.log_format, args.verbose) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let mut settings = Settings::discover(args.settings.as_deref())?;
    if let Some(kind) = args.engine {
        settings.engine.kind = kind;
    }

    let goal = match args.cmd {
        Command::BaseImage(a) => Goal::BaseImage(a.into()),
        Command::Imagebuilder(a) => Goal::Imagebuilder(a.into()),
        Command::Shell { base, cmd, params } => Goal::Shell(ShellOpts { base, cmd, params }),
        Command::Build { force } => Goal::Build { force },
        Command::Info => Goal::Info,
        Command::Clean => Goal::Clean,
        Command::Show => {
            return cmd_show(&settings, args.workdir.as_deref(), args.config.as_deref());
        }
    };

    let inv = Invocation::prepare(
        settings,
        goal,
        args.workdir.as_deref(),
        args.config.as_deref(),
    )?;
    let plan = modules::build_plan(&inv)?;

    if args.plan || args.dot {
        return cmd_plan(&plan, args.dot);
    }

    let reg = executor::builtin_registry()?;
    let mut ctx = ExecCtx::new(args.dry_run, Arc::new(TracingSink));
    executor::execute_plan(&inv, &plan, &reg, &mut ctx)
}

fn cmd_plan(plan: &Plan, dot: bool) -> Result<()> {
    if dot {
        print!("{}", plan.to_dot()?);
        return Ok(());
    }
    for (i, task) in plan.ordered()?.iter().enumerate() {
        println!(
            "{:>2}. {:<22}  {:<12}  {}",
            i + 1,
            task.id,
            task.module,
            task.label
        );
    }
    Ok(())
}

fn cmd_show(
    settings: &Settings,
    workdir: Option<&Path>,
    config: Option<&Path>,
) -> Result<()> {
    let paths = workspace::load_paths(&settings.workspace, workdir)?;
    let path = match config {
        Some(p) => paths.resolve(&p.to_string_lossy())?,
        None => paths.resolve(&settings.target.config)?,
    };
    let t = TargetConfig::load(&path)?;
    let ib = &settings.imagebuilder;
    let image = t.namespaced_image_name(ib.namespace.as_deref(), &ib.image);

    println!("# {}", path.display());
    for (key, value) in t.describe() {
        println!("{key}={value}");
    }
    println!("imagebuilder_url={}", t.imagebuilder_url_from(&ib.mirror));
    println!("image_name={image}");
    println!("hostname={}", target::hostname(&image));
    Ok(())
}
