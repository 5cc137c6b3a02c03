use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};

use openwrt_image_builder::config::Settings;
use openwrt_image_builder::engine::EngineKind;
use openwrt_image_builder::executor::{self, ChannelSink, ExecCtx, ExecEvent};
use openwrt_image_builder::invocation::{Goal, ImageOpts, Invocation, ShellOpts};
use openwrt_image_builder::modules::{self, firmware};

const TARGET: &str = "\
OPENWRT_PROFILE=generic
OPENWRT_RELEASE=24.10.0
OPENWRT_TARGET=x86
OPENWRT_SUBTARGET=64
OPENWRT_PACKAGES=luci curl
";

fn workspace(target: Option<&str>) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir_all(dir.path().join("docker")).unwrap();
    fs::write(dir.path().join("docker/Dockerfile.base"), "FROM ${IMAGE_BASE}\n").unwrap();
    fs::write(
        dir.path().join("docker/Dockerfile.imagebuilder"),
        "FROM ${IMAGE_BASE}\n",
    )
    .unwrap();
    if let Some(t) = target {
        fs::write(dir.path().join("default.conf"), t).unwrap();
    }
    dir
}

fn settings(kind: EngineKind) -> Settings {
    let mut s = Settings::default();
    s.engine.kind = kind;
    s
}

struct Issued {
    task: String,
    argv: Vec<String>,
    cwd: Option<PathBuf>,
}

fn dry_run(inv: &Invocation) -> Vec<Issued> {
    let plan = modules::build_plan(inv).unwrap();
    let reg = executor::builtin_registry().unwrap();
    let (tx, rx) = mpsc::channel();
    let mut ctx = ExecCtx::new(true, Arc::new(ChannelSink::new(tx)));
    executor::execute_plan(inv, &plan, &reg, &mut ctx).unwrap();
    drop(ctx);
    rx.into_iter()
        .filter_map(|ev| match ev {
            ExecEvent::CommandIssued {
                id,
                argv,
                cwd,
                dry_run,
            } => {
                assert!(dry_run);
                Some(Issued {
                    task: id,
                    argv,
                    cwd,
                })
            }
            _ => None,
        })
        .collect()
}

fn has(argv: &[String], s: &str) -> bool {
    argv.iter().any(|a| a == s)
}

fn plan_ids(inv: &Invocation) -> Vec<String> {
    modules::build_plan(inv)
        .unwrap()
        .ordered()
        .unwrap()
        .into_iter()
        .map(|t| t.id.clone())
        .collect()
}

#[test]
fn build_plan_order() {
    let ws = workspace(Some(TARGET));
    let inv = Invocation::prepare(
        settings(EngineKind::Docker),
        Goal::Build { force: false },
        Some(ws.path()),
        None,
    )
    .unwrap();
    assert_eq!(
        plan_ids(&inv),
        [
            "core.platform",
            "base.check",
            "core.prerequisites",
            "imagebuilder.image",
            "firmware.build",
            "firmware.report",
        ]
    );
}

#[test]
fn build_issues_image_builds_then_make() {
    let ws = workspace(Some(TARGET));
    fs::create_dir_all(ws.path().join("overlay/etc")).unwrap();
    let inv = Invocation::prepare(
        settings(EngineKind::Podman),
        Goal::Build { force: false },
        Some(ws.path()),
        None,
    )
    .unwrap();

    let cmds = dry_run(&inv);
    let tasks: Vec<&str> = cmds.iter().map(|c| c.task.as_str()).collect();
    assert_eq!(tasks, ["base.check", "imagebuilder.image", "firmware.build"]);

    let base = &cmds[0];
    assert_eq!(
        base.argv,
        [
            "docker",
            "build",
            "--format=docker",
            "--build-arg",
            "IMAGE_BASE=ubuntu:22.04",
            "--tag",
            "openwrt-base:latest",
            "--file",
            "Dockerfile.base",
            "."
        ]
    );
    assert_eq!(base.cwd.as_deref(), Some(ws.path().join("docker").as_path()));

    let ib = &cmds[1].argv;
    assert!(has(ib, "IMAGE_BASE=openwrt-base"), "{ib:?}");
    assert!(has(
        ib,
        "BUILDER_URL=https://downloads.openwrt.org/releases/24.10.0/targets/x86/64/openwrt-imagebuilder-24.10.0-x86-64.Linux-x86_64.tar.zst"
    ));
    assert!(has(ib, "BUILDER_WORKDIR=/builder/imagebuilder"));
    assert!(has(ib, "openwrt-imagebuilder-24.10.0-x86-64:latest"));
    assert!(!has(ib, "--no-cache"));

    let make = &cmds[2].argv;
    assert!(has(make, "--userns=keep-id"));
    assert!(has(make, "--hostname"));
    assert!(has(make, "openwrt-imagebuilder-24-10-0-x86-64"));
    let overlay_mount = format!(
        "type=bind,src={},dst=/builder/overlay,relabel=shared",
        ws.path().join("overlay").display()
    );
    assert!(has(make, &overlay_mount), "{make:?}");
    let tail: Vec<&str> = make
        .iter()
        .skip_while(|a| a.as_str() != "make")
        .map(String::as_str)
        .collect();
    assert_eq!(
        tail,
        [
            "make",
            "-C",
            "/builder/imagebuilder",
            "image",
            "PROFILE=generic",
            "PACKAGES=luci curl",
            "DISABLED_SERVICES=",
            "BIN_DIR=/builder/output",
            "FILES=/builder/overlay",
        ]
    );
    assert!(!ws.path().join("output").exists(), "dry run creates nothing");
}

#[test]
fn imagebuilder_build_passes_extra_params() {
    let ws = workspace(Some(TARGET));
    let inv = Invocation::prepare(
        settings(EngineKind::Docker),
        Goal::Imagebuilder(ImageOpts {
            force: true,
            max_age_days: Some(1),
            params: vec!["--pull".into()],
            ..ImageOpts::default()
        }),
        Some(ws.path()),
        None,
    )
    .unwrap();

    // Dry runs never query the engine, so every image counts as missing
    // and the base image is built first.
    let cmds = dry_run(&inv);
    assert_eq!(cmds.len(), 2);
    assert_eq!(cmds[1].task, "imagebuilder.image");
    let ib = &cmds[1].argv;
    assert!(!has(ib, "--format=docker"));
    assert!(has(ib, "--pull"));
    assert_eq!(ib.last().map(String::as_str), Some("."));
}

#[test]
fn invalid_target_stops_before_any_command() {
    let ws = workspace(Some(&TARGET.replace("OPENWRT_TARGET=x86\n", "")));
    let err = Invocation::prepare(
        settings(EngineKind::Docker),
        Goal::Build { force: false },
        Some(ws.path()),
        None,
    )
    .unwrap_err();
    assert!(err.is_config());
    assert!(err.to_string().contains("OPENWRT_TARGET"), "{err}");
}

#[test]
fn base_image_and_base_shell_need_no_target_file() {
    let ws = workspace(None);
    let inv = Invocation::prepare(
        settings(EngineKind::Docker),
        Goal::BaseImage(ImageOpts::default()),
        Some(ws.path()),
        None,
    )
    .unwrap();
    assert_eq!(plan_ids(&inv), ["core.platform", "base.image"]);
    assert_eq!(dry_run(&inv).len(), 1);

    let inv = Invocation::prepare(
        settings(EngineKind::Docker),
        Goal::Shell(ShellOpts {
            base: true,
            cmd: Some("uname -a".into()),
            params: Vec::new(),
        }),
        Some(ws.path()),
        None,
    )
    .unwrap();
    let cmds = dry_run(&inv);
    assert_eq!(cmds.len(), 1);
    let run = &cmds[0].argv;
    assert!(has(run, "-u"));
    assert!(!run.iter().any(|a| a.starts_with("type=bind")), "{run:?}");
    assert!(run.ends_with(&[
        "openwrt-base:latest".to_string(),
        "bash".to_string(),
        "-c".to_string(),
        "uname -a".to_string(),
    ]));
}

#[test]
fn info_and_clean_run_make_targets() {
    let ws = workspace(Some(TARGET));
    fs::create_dir_all(ws.path().join("output")).unwrap();
    for (goal, verb) in [(Goal::Info, "info"), (Goal::Clean, "clean")] {
        let inv = Invocation::prepare(
            settings(EngineKind::Docker),
            goal,
            Some(ws.path()),
            None,
        )
        .unwrap();
        assert_eq!(
            plan_ids(&inv),
            [
                "core.platform".to_string(),
                "core.prerequisites".to_string(),
                format!("firmware.{verb}"),
            ]
        );
        let cmds = dry_run(&inv);
        assert_eq!(cmds.len(), 1);
        let argv = &cmds[0].argv;
        assert!(argv.ends_with(&[
            "make".to_string(),
            "-C".to_string(),
            "/builder/imagebuilder".to_string(),
            verb.to_string(),
        ]));
        let conf_mount = format!(
            "type=bind,source={},destination=/builder/imagebuilder/default.conf",
            ws.path().join("default.conf").display()
        );
        assert!(has(argv, &conf_mount), "{argv:?}");
        let output_mount = format!(
            "type=bind,source={},destination=/builder/output",
            ws.path().join("output").display()
        );
        assert!(has(argv, &output_mount), "{argv:?}");
    }
}

fn write(p: &Path, data: &[u8]) {
    fs::create_dir_all(p.parent().unwrap()).unwrap();
    fs::write(p, data).unwrap();
}

#[test]
fn report_hashes_output_artifacts() {
    let ws = workspace(Some(TARGET));
    let out = ws.path().join("output");
    write(
        &out.join("targets/x86/64/openwrt-24.10.0-x86-64-generic-ext4-combined.img.gz"),
        b"abc",
    );
    write(&out.join(firmware::REPORT_FILE), b"{}");

    let inv = Invocation::prepare(
        settings(EngineKind::Docker),
        Goal::Build { force: false },
        Some(ws.path()),
        None,
    )
    .unwrap();
    let report = firmware::build_report(&inv).unwrap();
    assert_eq!(report["release"], "24.10.0");
    assert_eq!(report["packages"], serde_json::json!(["luci", "curl"]));
    assert_eq!(report["image"], "openwrt-imagebuilder-24.10.0-x86-64");

    let artifacts = report["artifacts"].as_array().unwrap();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(
        artifacts[0]["path"],
        "targets/x86/64/openwrt-24.10.0-x86-64-generic-ext4-combined.img.gz"
    );
    assert_eq!(artifacts[0]["size"], 3);
    assert_eq!(
        artifacts[0]["sha256"],
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}
