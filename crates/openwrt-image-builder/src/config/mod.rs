use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use toml::Value;

use crate::engine::EngineKind;
use crate::error::{Error, Result};
use crate::workspace::WorkspaceConfig;

pub const DEFAULT_SETTINGS_FILE: &str = "owrt.toml";

/// A loaded settings document with `extends`/`imports` already resolved.
#[derive(Debug, Clone)]
pub struct ConfigDoc {
    pub path: Option<PathBuf>,
    pub value: Value,
}

impl ConfigDoc {
    pub fn empty() -> Self {
        Self {
            path: None,
            value: Value::Table(Default::default()),
        }
    }

    pub fn value_path(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return Some(&self.value);
        }

        let mut cur = &self.value;
        for seg in path.split('.') {
            let tbl = cur.as_table()?;
            cur = tbl.get(seg)?;
        }
        Some(cur)
    }

    pub fn deserialize_path<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        let Some(v) = self.value_path(path) else {
            return Ok(None);
        };
        let parsed = v
            .clone()
            .try_into()
            .map_err(|e| Error::config(format!("invalid settings at '{}': {e}", path)))?;
        Ok(Some(parsed))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub kind: EngineKind,
    /// Binary used for every engine command. Podman installs usually ship a
    /// `docker` shim, so the default queries that.
    pub program: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::Auto,
            program: "docker".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BaseImageConfig {
    pub image: String,
    pub from: String,
    pub dockerfile: String,
    pub max_age_days: u32,
}

impl Default for BaseImageConfig {
    fn default() -> Self {
        Self {
            image: "openwrt-base".into(),
            from: "ubuntu:22.04".into(),
            dockerfile: "Dockerfile.base".into(),
            max_age_days: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ImagebuilderConfig {
    pub image: String,
    pub namespace: Option<String>,
    pub dockerfile: String,
    pub workdir_root: String,
    pub user: String,
    pub max_age_days: u32,
    pub mirror: String,
}

impl Default for ImagebuilderConfig {
    fn default() -> Self {
        Self {
            image: "openwrt-imagebuilder".into(),
            namespace: None,
            dockerfile: "Dockerfile.imagebuilder".into(),
            workdir_root: "/builder".into(),
            user: "buildbot".into(),
            max_age_days: 3,
            mirror: crate::target::DEFAULT_MIRROR.into(),
        }
    }
}

impl ImagebuilderConfig {
    /// Path inside the container where the imagebuilder archive is unpacked.
    pub fn workdir(&self) -> String {
        self.container_path("imagebuilder")
    }

    pub fn container_path(&self, rel: &str) -> String {
        format!("{}/{}", self.workdir_root.trim_end_matches('/'), rel)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TargetFileConfig {
    pub config: String,
}

impl Default for TargetFileConfig {
    fn default() -> Self {
        Self {
            config: "default.conf".into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub workspace: WorkspaceConfig,
    pub engine: EngineConfig,
    pub base: BaseImageConfig,
    pub imagebuilder: ImagebuilderConfig,
    pub target: TargetFileConfig,
}

impl Settings {
    pub fn from_doc(doc: &ConfigDoc) -> Result<Self> {
        Ok(Self {
            workspace: doc.deserialize_path("workspace")?.unwrap_or_default(),
            engine: doc.deserialize_path("engine")?.unwrap_or_default(),
            base: doc.deserialize_path("base")?.unwrap_or_default(),
            imagebuilder: doc.deserialize_path("imagebuilder")?.unwrap_or_default(),
            target: doc.deserialize_path("target")?.unwrap_or_default(),
        })
    }

    /// Load settings from `path`, or from `owrt.toml` in the current directory
    /// when it exists. Without a file every value takes its default.
    pub fn discover(path: Option<&Path>) -> Result<Self> {
        let doc = match path {
            Some(p) => load(p)?,
            None => {
                let fallback = Path::new(DEFAULT_SETTINGS_FILE);
                if fallback.is_file() {
                    load(fallback)?
                } else {
                    ConfigDoc::empty()
                }
            }
        };
        if let Some(p) = &doc.path {
            tracing::debug!(path = %p.display(), "loaded settings");
        }
        Self::from_doc(&doc)
    }
}

fn merge_values(base: &mut Value, child: Value) {
    match (base, child) {
        (Value::Table(base_tbl), Value::Table(child_tbl)) => {
            for (k, v) in child_tbl {
                match base_tbl.get_mut(&k) {
                    Some(existing) => merge_values(existing, v),
                    None => {
                        base_tbl.insert(k, v);
                    }
                }
            }
        }
        (base_slot, child_val) => {
            *base_slot = child_val;
        }
    }
}

fn resolve_ref_path(from_file: &Path, reference: &str) -> PathBuf {
    let p = PathBuf::from(reference);
    if p.is_absolute() {
        p
    } else {
        from_file.parent().unwrap_or_else(|| Path::new(".")).join(p)
    }
}

fn parse_imports(path: &Path, value: &Value) -> Result<Vec<String>> {
    let Some(arr) = value.get("imports").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    for v in arr {
        let Some(s) = v.as_str() else {
            return Err(Error::config(format!(
                "invalid imports entry in {} (expected string)",
                path.display()
            )));
        };
        let s = s.trim();
        if !s.is_empty() {
            out.push(s.to_string());
        }
    }
    Ok(out)
}

// Merge order: extends parent, then imports in order, then the file itself.
fn load_value_inner(path: &Path, stack: &mut HashSet<PathBuf>) -> Result<Value> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !stack.insert(canonical.clone()) {
        return Err(Error::config(format!(
            "settings import cycle detected at {}",
            canonical.display()
        )));
    }

    let data = fs::read_to_string(path)
        .map_err(|e| Error::config(format!("failed to read settings {}: {e}", path.display())))?;
    let mut value: Value = toml::from_str(&data)
        .map_err(|e| Error::config(format!("TOML parse error in {}: {e}", path.display())))?;

    let mut out = Value::Table(Default::default());
    if let Some(ext) = value.get("extends").and_then(Value::as_str) {
        out = load_value_inner(&resolve_ref_path(path, ext), stack)?;
    }
    for imp in parse_imports(path, &value)? {
        let loaded = load_value_inner(&resolve_ref_path(path, &imp), stack)?;
        merge_values(&mut out, loaded);
    }
    if let Some(tbl) = value.as_table_mut() {
        tbl.remove("extends");
        tbl.remove("imports");
    }
    merge_values(&mut out, value);

    stack.remove(&canonical);
    Ok(out)
}

pub fn load(path: &Path) -> Result<ConfigDoc> {
    let mut stack = HashSet::<PathBuf>::new();
    let value = load_value_inner(path, &mut stack)?;
    Ok(ConfigDoc {
        path: Some(path.to_path_buf()),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file() {
        let s = Settings::from_doc(&ConfigDoc::empty()).expect("defaults");
        assert_eq!(s.base.image, "openwrt-base");
        assert_eq!(s.base.from, "ubuntu:22.04");
        assert_eq!(s.imagebuilder.workdir(), "/builder/imagebuilder");
        assert_eq!(s.imagebuilder.container_path("output"), "/builder/output");
        assert_eq!(s.target.config, "default.conf");
        assert_eq!(s.engine.kind, EngineKind::Auto);
    }

    #[test]
    fn rejects_unknown_engine_kind() {
        let doc = ConfigDoc {
            path: None,
            value: toml::from_str("[engine]\nkind = \"lxc\"\n").expect("toml"),
        };
        let err = Settings::from_doc(&doc).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("engine"), "{err}");
    }
}
