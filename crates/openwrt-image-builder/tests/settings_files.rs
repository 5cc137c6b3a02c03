use std::fs;

use openwrt_image_builder::config::{self, Settings};
use openwrt_image_builder::engine::EngineKind;

#[test]
fn extends_and_imports_merge_in_order() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("common.toml"),
        r#"
[engine]
kind = "podman"
program = "podman"

[base]
from = "debian:12"
max_age_days = 7
"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("mirror.toml"),
        r#"
[imagebuilder]
mirror = "https://mirror.example.org/openwrt/"
namespace = "lab"
"#,
    )
    .unwrap();
    let main = dir.path().join("owrt.toml");
    fs::write(
        &main,
        r#"
extends = "common.toml"
imports = ["mirror.toml"]

[base]
max_age_days = 1

[target]
config = "targets/x86.conf"
"#,
    )
    .unwrap();

    let s = Settings::discover(Some(&main)).unwrap();
    assert_eq!(s.engine.kind, EngineKind::Podman);
    assert_eq!(s.engine.program, "podman");
    assert_eq!(s.base.from, "debian:12");
    assert_eq!(s.base.max_age_days, 1);
    assert_eq!(s.base.image, "openwrt-base");
    assert_eq!(s.imagebuilder.namespace.as_deref(), Some("lab"));
    assert_eq!(s.target.config, "targets/x86.conf");

    let doc = config::load(&main).unwrap();
    assert!(doc.value_path("extends").is_none());
    assert!(doc.value_path("imports").is_none());
}

#[test]
fn import_cycles_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.toml"), "imports = [\"b.toml\"]\n").unwrap();
    fs::write(dir.path().join("b.toml"), "extends = \"a.toml\"\n").unwrap();
    let err = config::load(&dir.path().join("a.toml")).unwrap_err();
    assert!(err.is_config());
    assert!(err.to_string().contains("cycle"), "{err}");
}

#[test]
fn missing_settings_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Settings::discover(Some(&dir.path().join("absent.toml"))).unwrap_err();
    assert!(err.to_string().contains("absent.toml"), "{err}");
}
