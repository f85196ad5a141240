//! DivaModLoader companion: its `config.toml` in the game root is both the
//! loader's own configuration and the place mod priority lives, so everything
//! that touches it goes through the read-merge-write helpers here.

use crate::api::{self, USER_AGENT};
use crate::error::Error;
use crate::extract;
use crate::manager::StagingGuard;
use anyhow::{bail, Context, Result};
use semver::Version;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use toml::{Table, Value};
use tracing::info;
use walkdir::WalkDir;

pub const LOADER_CONFIG_FILE: &str = "config.toml";
pub const LOADER_REPO: &str = "blueskythlikesclouds/DivaModLoader";

const LATEST_RELEASE_URL: &str =
    "https://api.github.com/repos/blueskythlikesclouds/DivaModLoader/releases/latest";

static STAGING_COUNTER: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone)]
pub struct LoaderInfo {
    pub version: Version,
    pub enabled: bool,
    pub mods_dir: PathBuf,
}

pub fn is_installed(game_root: &Path) -> bool {
    game_root.join(LOADER_CONFIG_FILE).is_file()
}

pub fn read_config(game_root: &Path) -> Result<Table> {
    let path = game_root.join(LOADER_CONFIG_FILE);
    let raw =
        fs::read_to_string(&path).with_context(|| format!("read loader config {}", path.display()))?;
    raw.parse::<Table>().context("parse loader config")
}

pub fn write_config(game_root: &Path, config: &Table) -> Result<()> {
    let path = game_root.join(LOADER_CONFIG_FILE);
    let rendered = toml::to_string(config).context("serialize loader config")?;
    fs::write(&path, rendered).with_context(|| format!("write loader config {}", path.display()))
}

pub fn info(game_root: &Path) -> Result<LoaderInfo> {
    let config = read_config(game_root)?;
    // Loader builds that predate the version key report 0.0.0.
    let version = config
        .get("version")
        .and_then(Value::as_str)
        .and_then(parse_version)
        .unwrap_or_else(|| Version::new(0, 0, 0));
    let enabled = config
        .get("enabled")
        .and_then(Value::as_bool)
        .context("loader config missing 'enabled'")?;
    let mods_dir = game_root.join(
        config
            .get("mods")
            .and_then(Value::as_str)
            .unwrap_or("mods"),
    );
    Ok(LoaderInfo {
        version,
        enabled,
        mods_dir,
    })
}

fn parse_version(raw: &str) -> Option<Version> {
    Version::parse(raw.trim().trim_start_matches('v')).ok()
}

#[derive(Debug, Deserialize)]
struct Release {
    name: String,
    tag_name: String,
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    browser_download_url: String,
}

/// Asks GitHub for the newest loader release. Returns the version and the
/// download URL of its first asset, which is the packaged loader.
pub fn check_latest() -> Result<(Version, String)> {
    let agent = api::http_agent(Duration::from_secs(10));
    let response = agent
        .get(LATEST_RELEASE_URL)
        .set("User-Agent", USER_AGENT)
        .call()
        .with_context(|| format!("fetch latest release of {LOADER_REPO}"))?;
    let release: Release = response.into_json().context("decode release metadata")?;
    let version = parse_version(&release.name)
        .or_else(|| parse_version(&release.tag_name))
        .with_context(|| format!("release {:?} has no parseable version", release.name))?;
    let Some(asset) = release.assets.first() else {
        bail!("release {} of {LOADER_REPO} has no assets", version);
    };
    Ok((version, asset.browser_download_url.clone()))
}

/// Downloads and installs the newest loader into the game root. Loader files
/// overwrite their previous versions; the loader config is merged so an
/// update never resets `enabled`, the mods folder, or mod priority.
pub fn install(game_root: &Path) -> Result<Version> {
    let (version, download_url) = check_latest()?;
    info!("installing DivaModLoader {version}");
    let payload = api::download_mod(&download_url)?;
    install_payload(game_root, &payload, &version)?;
    Ok(version)
}

fn install_payload(game_root: &Path, payload: &[u8], version: &Version) -> Result<()> {
    let staging = staging_dir(game_root)?;
    let _guard = StagingGuard::new(staging.clone());
    extract::extract(payload, &staging)?;
    for entry in WalkDir::new(&staging) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(&staging)
            .context("staging-relative path")?;
        if rel == Path::new(LOADER_CONFIG_FILE) {
            merge_shipped_config(game_root, entry.path(), version)?;
            continue;
        }
        let dest = game_root.join(rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).context("create loader file directory")?;
        }
        fs::copy(entry.path(), &dest)
            .with_context(|| format!("install loader file {}", rel.display()))?;
    }
    Ok(())
}

/// Fresh install: shipped config plus the version stamp. Upgrade: existing
/// config wins, only the version stamp changes.
fn merge_shipped_config(game_root: &Path, shipped_path: &Path, version: &Version) -> Result<()> {
    let raw = fs::read_to_string(shipped_path).context("read shipped loader config")?;
    let shipped: Table = raw.parse().context("parse shipped loader config")?;
    let mut merged = if is_installed(game_root) {
        read_config(game_root)?
    } else {
        shipped
    };
    merged.insert("version".to_string(), Value::String(version.to_string()));
    write_config(game_root, &merged)
}

fn staging_dir(game_root: &Path) -> Result<PathBuf> {
    let counter = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = game_root.join(format!(".divaforge-loader-{nanos}-{counter}"));
    fs::create_dir_all(&dir).context("create loader staging directory")?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use zip::write::SimpleFileOptions;

    fn loader_zip(config: &str) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default();
        writer.start_file("dinput8.dll", options).unwrap();
        writer.write_all(b"\x4d\x5a loader stub").unwrap();
        writer.start_file(LOADER_CONFIG_FILE, options).unwrap();
        writer.write_all(config.as_bytes()).unwrap();
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn info_reads_config_with_defaults() {
        let root = tempfile::tempdir().unwrap();
        fs::write(
            root.path().join(LOADER_CONFIG_FILE),
            "enabled = true\nmods = \"mods\"\nversion = \"v0.0.7\"\n",
        )
        .unwrap();
        let info = info(root.path()).unwrap();
        assert!(info.enabled);
        assert_eq!(info.version, Version::new(0, 0, 7));
        assert_eq!(info.mods_dir, root.path().join("mods"));
    }

    #[test]
    fn missing_version_reports_zero() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join(LOADER_CONFIG_FILE), "enabled = false\n").unwrap();
        let info = info(root.path()).unwrap();
        assert_eq!(info.version, Version::new(0, 0, 0));
        assert!(!info.enabled);
        assert_eq!(info.mods_dir, root.path().join("mods"));
    }

    #[test]
    fn not_installed_without_config() {
        let root = tempfile::tempdir().unwrap();
        assert!(!is_installed(root.path()));
        fs::write(root.path().join(LOADER_CONFIG_FILE), "enabled = true\n").unwrap();
        assert!(is_installed(root.path()));
    }

    #[test]
    fn fresh_install_writes_shipped_config_with_version() {
        let root = tempfile::tempdir().unwrap();
        let payload = loader_zip("enabled = true\nmods = \"mods\"\nconsole = false\n");
        install_payload(root.path(), &payload, &Version::new(0, 0, 7)).unwrap();

        assert!(root.path().join("dinput8.dll").is_file());
        let config = read_config(root.path()).unwrap();
        assert_eq!(config.get("enabled"), Some(&Value::Boolean(true)));
        assert_eq!(config.get("console"), Some(&Value::Boolean(false)));
        assert_eq!(
            config.get("version"),
            Some(&Value::String("0.0.7".to_string()))
        );
        // Staging directory cleaned up.
        let leftovers: Vec<_> = fs::read_dir(root.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".divaforge"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn upgrade_keeps_existing_config() {
        let root = tempfile::tempdir().unwrap();
        fs::write(
            root.path().join(LOADER_CONFIG_FILE),
            "enabled = false\nmods = \"custom_mods\"\npriority = [\"A\", \"B\"]\nversion = \"0.0.6\"\n",
        )
        .unwrap();
        fs::write(root.path().join("dinput8.dll"), b"old loader").unwrap();

        let payload = loader_zip("enabled = true\nmods = \"mods\"\n");
        install_payload(root.path(), &payload, &Version::new(0, 0, 7)).unwrap();

        // Loader binary replaced, user configuration intact.
        assert_eq!(
            fs::read(root.path().join("dinput8.dll")).unwrap(),
            b"\x4d\x5a loader stub"
        );
        let config = read_config(root.path()).unwrap();
        assert_eq!(config.get("enabled"), Some(&Value::Boolean(false)));
        assert_eq!(
            config.get("mods"),
            Some(&Value::String("custom_mods".to_string()))
        );
        assert!(config.get("priority").is_some());
        assert_eq!(
            config.get("version"),
            Some(&Value::String("0.0.7".to_string()))
        );
    }

    #[test]
    fn version_parse_tolerates_v_prefix() {
        assert_eq!(parse_version("v1.2.3"), Some(Version::new(1, 2, 3)));
        assert_eq!(parse_version("0.0.7"), Some(Version::new(0, 0, 7)));
        assert_eq!(parse_version("DivaModLoader"), None);
    }
}
