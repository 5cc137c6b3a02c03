//! Target description of one firmware build (profile, release, target,
//! subtarget, package set) and the names and URLs derived from it.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use semver::Version;

use crate::error::{Error, Result};

pub mod parser;

pub use parser::{RawConfig, parse_file, parse_str};

pub const KEY_PROFILE: &str = "OPENWRT_PROFILE";
pub const KEY_RELEASE: &str = "OPENWRT_RELEASE";
pub const KEY_TARGET: &str = "OPENWRT_TARGET";
pub const KEY_SUBTARGET: &str = "OPENWRT_SUBTARGET";
pub const KEY_PACKAGES: &str = "OPENWRT_PACKAGES";
pub const KEY_DISABLED_SERVICES: &str = "OPENWRT_DISABLED_SERVICES";

pub const REQUIRED_KEYS: [&str; 5] = [
    KEY_PROFILE,
    KEY_RELEASE,
    KEY_TARGET,
    KEY_SUBTARGET,
    KEY_PACKAGES,
];

pub const DEFAULT_MIRROR: &str = "https://downloads.openwrt.org";

// Upstream switched imagebuilder archives from xz to zstd with 24.x.
const ZSTD_SINCE_MAJOR: u64 = 24;

static HOSTNAME_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[/._-]+").expect("hostname separator regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    profile: String,
    release: Version,
    target: String,
    subtarget: String,
    packages: Vec<String>,
    disabled_services: Vec<String>,
}

impl TargetConfig {
    /// Validate a parsed target file. Every required key must be present and
    /// non-empty, and the release must be `major.minor.patch`.
    pub fn from_map(map: &RawConfig) -> Result<Self> {
        let missing: Vec<&str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|k| !map.contains_key(*k))
            .collect();
        if !missing.is_empty() {
            return Err(Error::config(format!(
                "target config does not contain all required keys (missing: {}); required keys: {}",
                missing.join(", "),
                REQUIRED_KEYS.join(", ")
            )));
        }

        for key in REQUIRED_KEYS {
            let value = map.get(key).map(|v| v.trim()).unwrap_or_default();
            if value.is_empty() {
                return Err(Error::config(format!(
                    "target config key {key} has an empty value; required keys: {}",
                    REQUIRED_KEYS.join(", ")
                )));
            }
        }

        let value = |key: &str| map.get(key).map(|v| v.trim().to_string()).unwrap_or_default();
        let words = |key: &str| -> Vec<String> {
            map.get(key)
                .map(|v| v.split_whitespace().map(ToOwned::to_owned).collect())
                .unwrap_or_default()
        };

        Ok(Self {
            profile: value(KEY_PROFILE),
            release: parse_release(&value(KEY_RELEASE))?,
            target: value(KEY_TARGET),
            subtarget: value(KEY_SUBTARGET),
            packages: words(KEY_PACKAGES),
            disabled_services: words(KEY_DISABLED_SERVICES),
        })
    }

    /// Parse and validate a target file. A missing file surfaces as the same
    /// configuration error as an incomplete one.
    pub fn load(path: &Path) -> Result<Self> {
        let map = parse_file(path)?;
        let cfg = Self::from_map(&map).map_err(|e| e.context(path.display()))?;
        if let Some(note) = map
            .get(KEY_RELEASE)
            .and_then(|raw| cfg.release_normalization_note(raw))
        {
            tracing::warn!(path = %path.display(), "{note}");
        }
        Ok(cfg)
    }

    // Set when the file spells the release differently from the parsed
    // version (leading zeros). The download URL is built from the parsed form.
    fn release_normalization_note(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        let normalized = self.release.to_string();
        (raw != normalized).then(|| {
            format!(
                "{KEY_RELEASE} '{raw}' is read as {normalized}; the imagebuilder download URL \
                 uses '{normalized}' ({}), so spell the release without leading zeros if that \
                 URL does not exist",
                self.imagebuilder_url()
            )
        })
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }

    pub fn release(&self) -> &Version {
        &self.release
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn subtarget(&self) -> &str {
        &self.subtarget
    }

    pub fn packages(&self) -> &[String] {
        &self.packages
    }

    pub fn disabled_services(&self) -> &[String] {
        &self.disabled_services
    }

    /// `major.minor.patch`, without pre-release or build metadata.
    pub fn release_str(&self) -> String {
        format!(
            "{}.{}.{}",
            self.release.major, self.release.minor, self.release.patch
        )
    }

    pub fn archive_ext(&self) -> &'static str {
        if self.release.major >= ZSTD_SINCE_MAJOR {
            "zst"
        } else {
            "xz"
        }
    }

    pub fn imagebuilder_url(&self) -> String {
        self.imagebuilder_url_from(DEFAULT_MIRROR)
    }

    pub fn imagebuilder_url_from(&self, mirror: &str) -> String {
        let rel = self.release_str();
        format!(
            "{}/releases/{rel}/targets/{t}/{st}/openwrt-imagebuilder-{rel}-{t}-{st}.Linux-x86_64.tar.{ext}",
            mirror.trim().trim_end_matches('/'),
            t = self.target,
            st = self.subtarget,
            ext = self.archive_ext(),
        )
    }

    pub fn image_name(&self, basename: &str) -> String {
        format!(
            "{basename}-{}-{}-{}",
            self.release_str(),
            self.target,
            self.subtarget
        )
    }

    pub fn namespaced_image_name(&self, namespace: Option<&str>, basename: &str) -> String {
        match namespace.map(str::trim).filter(|s| !s.is_empty()) {
            Some(ns) => format!("{}/{}", ns.trim_end_matches('/'), self.image_name(basename)),
            None => self.image_name(basename),
        }
    }

    /// Key/value lines for logs and `owrt show`.
    pub fn describe(&self) -> Vec<(&'static str, String)> {
        vec![
            (KEY_PROFILE, self.profile.clone()),
            (KEY_RELEASE, self.release.to_string()),
            (KEY_TARGET, self.target.clone()),
            (KEY_SUBTARGET, self.subtarget.clone()),
            (KEY_PACKAGES, self.packages.join(" ")),
            (KEY_DISABLED_SERVICES, self.disabled_services.join(" ")),
        ]
    }
}

/// Parse `major.minor.patch`, optionally followed by semver pre-release or
/// build metadata. Leading zeros are accepted (`23.05.2` is `23.5.2`); a
/// missing or extra component is rejected.
pub fn parse_release(raw: &str) -> Result<Version> {
    let raw = raw.trim();
    let invalid = || {
        Error::config(format!(
            "{KEY_RELEASE} '{raw}' is not a valid major.minor.patch version"
        ))
    };

    let split = raw.find(|c| c == '-' || c == '+').unwrap_or(raw.len());
    let (core, suffix) = raw.split_at(split);

    let mut nums = [0u64; 3];
    let mut parts = core.split('.');
    for slot in nums.iter_mut() {
        let part = parts.next().ok_or_else(invalid)?;
        if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        *slot = part.parse().map_err(|_| invalid())?;
    }
    if parts.next().is_some() {
        return Err(invalid());
    }

    let [major, minor, patch] = nums;
    Version::parse(&format!("{major}.{minor}.{patch}{suffix}")).map_err(|_| invalid())
}

/// Container hostname for an image name: every run of `/`, `.`, `_` or `-`
/// becomes a single `-`.
pub fn hostname(image_name: &str) -> String {
    HOSTNAME_SEPARATORS
        .replace_all(image_name.trim(), "-")
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> RawConfig {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn complete(release: &str) -> RawConfig {
        map(&[
            (KEY_PROFILE, "generic"),
            (KEY_RELEASE, release),
            (KEY_TARGET, "x86"),
            (KEY_SUBTARGET, "64"),
            (KEY_PACKAGES, "luci curl"),
        ])
    }

    #[test]
    fn builds_from_complete_map() {
        let cfg = TargetConfig::from_map(&complete("24.10.0")).expect("valid");
        assert_eq!(cfg.profile(), "generic");
        assert_eq!(cfg.release(), &Version::new(24, 10, 0));
        assert_eq!(cfg.target(), "x86");
        assert_eq!(cfg.subtarget(), "64");
        assert_eq!(cfg.packages(), ["luci", "curl"]);
        assert!(cfg.disabled_services().is_empty());
        assert_eq!(cfg.release_str(), "24.10.0");
        assert_eq!(cfg.image_name("imagebuilder"), "imagebuilder-24.10.0-x86-64");
        assert_eq!(
            cfg.imagebuilder_url(),
            "https://downloads.openwrt.org/releases/24.10.0/targets/x86/64/openwrt-imagebuilder-24.10.0-x86-64.Linux-x86_64.tar.zst"
        );
    }

    #[test]
    fn each_missing_required_key_is_rejected() {
        for key in REQUIRED_KEYS {
            let mut m = complete("23.5.2");
            m.remove(key);
            let err = TargetConfig::from_map(&m).unwrap_err();
            assert!(err.is_config(), "{key}: {err}");
            let msg = err.to_string();
            assert!(msg.contains(&format!("missing: {key}")), "{msg}");
            for required in REQUIRED_KEYS {
                assert!(msg.contains(required), "{msg}");
            }
        }
    }

    #[test]
    fn empty_required_value_is_rejected() {
        let mut m = complete("23.5.2");
        m.insert(KEY_TARGET.into(), "   ".into());
        let err = TargetConfig::from_map(&m).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains(KEY_TARGET));
    }

    #[test]
    fn disabled_services_are_split() {
        let mut m = complete("23.5.2");
        m.insert(KEY_DISABLED_SERVICES.into(), "dnsmasq odhcpd".into());
        let cfg = TargetConfig::from_map(&m).expect("valid");
        assert_eq!(cfg.disabled_services(), ["dnsmasq", "odhcpd"]);
    }

    #[test]
    fn archive_extension_threshold() {
        for (release, ext) in [
            ("22.3.6", ".tar.xz"),
            ("23.5.5", ".tar.xz"),
            ("24.10.0", ".tar.zst"),
            ("25.12.1", ".tar.zst"),
            ("30.0.0", ".tar.zst"),
        ] {
            let cfg = TargetConfig::from_map(&complete(release)).expect("valid");
            assert!(cfg.imagebuilder_url().ends_with(ext), "{release}");
        }
    }

    #[test]
    fn release_parsing() {
        assert_eq!(parse_release("23.05.2").expect("zero padded"), Version::new(23, 5, 2));
        let pre = parse_release("24.10.0-rc4").expect("pre-release");
        assert_eq!(pre.pre.as_str(), "rc4");
        for bad in ["", "24", "24.10", "24.10.0.1", "24.x.0", "24..0", "v24.10.0", "24.10.0-"] {
            let err = parse_release(bad).unwrap_err();
            assert!(err.is_config(), "{bad:?}");
        }
    }

    #[test]
    fn release_str_drops_prerelease() {
        let cfg = TargetConfig::from_map(&complete("24.10.0-rc4")).expect("valid");
        assert_eq!(cfg.release_str(), "24.10.0");
        assert_eq!(cfg.image_name("ib"), "ib-24.10.0-x86-64");
    }

    #[test]
    fn namespaced_names_and_hostnames() {
        let cfg = TargetConfig::from_map(&complete("23.5.3")).expect("valid");
        let name = cfg.namespaced_image_name(Some("openwrt"), "imagebuilder");
        assert_eq!(name, "openwrt/imagebuilder-23.5.3-x86-64");
        assert_eq!(cfg.namespaced_image_name(Some(" "), "ib"), "ib-23.5.3-x86-64");
        assert_eq!(hostname(&name), "openwrt-imagebuilder-23-5-3-x86-64");
        assert_eq!(hostname("a__b/.-c"), "a-b-c");
    }

    #[test]
    fn custom_mirror() {
        let cfg = TargetConfig::from_map(&complete("23.5.3")).expect("valid");
        assert_eq!(
            cfg.imagebuilder_url_from("https://mirror.example/openwrt/"),
            "https://mirror.example/openwrt/releases/23.5.3/targets/x86/64/openwrt-imagebuilder-23.5.3-x86-64.Linux-x86_64.tar.xz"
        );
    }

    #[test]
    fn leading_zero_release_names_the_url_actually_used() {
        let cfg = TargetConfig::from_map(&complete("23.05.2")).expect("valid");
        let note = cfg.release_normalization_note("23.05.2").expect("note");
        assert!(note.contains("'23.05.2' is read as 23.5.2"), "{note}");
        assert!(note.contains("/releases/23.5.2/"), "{note}");
        assert!(cfg.release_normalization_note(" 23.5.2 ").is_none());
    }
}
