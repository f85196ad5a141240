use crate::error::Error;
use anyhow::{Context, Result};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use toml::{Table, Value};
use walkdir::WalkDir;

/// Mod declaration file consumed by the loader itself.
pub const MOD_CONFIG_FILE: &str = "config.toml";
/// Origin-identity file written at install time. Its absence (or being
/// unreadable) degrades a mod to simple, never to a load failure.
pub const MOD_INFO_FILE: &str = "modinfo.toml";
pub const THUMBNAIL_FILE: &str = "preview.png";

/// Identity files written before origins were a thing carry no `origin` or
/// `category` key; they are all GameBanana mods.
pub const LEGACY_ORIGIN: &str = "gamebanana";
pub const LEGACY_CATEGORY: &str = "Mod";

fn legacy_origin() -> String {
    LEGACY_ORIGIN.to_string()
}

fn legacy_category() -> String {
    LEGACY_CATEGORY.to_string()
}

/// Contents of the origin-identity file. `hash` is the fingerprint the
/// payload had when it was installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModSource {
    pub id: i64,
    pub hash: String,
    #[serde(default = "legacy_origin")]
    pub origin: String,
    #[serde(default = "legacy_category")]
    pub category: String,
}

/// A mod directory under the loader's mods folder. `source` is `Some` for
/// tracked mods (installed through an origin) and `None` for simple ones.
#[derive(Debug, Clone)]
pub struct DivaMod {
    pub path: PathBuf,
    pub name: String,
    pub author: String,
    pub version: Option<Version>,
    pub enabled: bool,
    pub size_bytes: u64,
    pub source: Option<ModSource>,
}

/// Reads a mod directory. Fails only when the declaration file is missing,
/// unparseable, or lacks a usable `enabled` flag; a broken identity file
/// just yields a simple mod.
pub fn load_mod(path: &Path) -> Result<DivaMod, Error> {
    let unmanageable = || Error::UnmanageableMod(path.to_path_buf());
    let raw = fs::read_to_string(path.join(MOD_CONFIG_FILE)).map_err(|_| unmanageable())?;
    let table: Table = raw.parse().map_err(|_| unmanageable())?;
    let enabled = table
        .get("enabled")
        .and_then(Value::as_bool)
        .ok_or_else(unmanageable)?;
    let name = table
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| dir_basename(path));
    let author = table
        .get("author")
        .and_then(Value::as_str)
        .unwrap_or("unknown author")
        .to_string();
    let version = table
        .get("version")
        .and_then(Value::as_str)
        .and_then(|raw| Version::parse(raw).ok());
    Ok(DivaMod {
        path: path.to_path_buf(),
        name,
        author,
        version,
        enabled,
        size_bytes: dir_size(path),
        source: read_source(path),
    })
}

fn read_source(path: &Path) -> Option<ModSource> {
    let raw = fs::read_to_string(path.join(MOD_INFO_FILE)).ok()?;
    toml::from_str(&raw).ok()
}

fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

fn dir_basename(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

impl DivaMod {
    pub fn is_simple(&self) -> bool {
        self.source.is_none()
    }

    /// Folder name as recorded in the loader's priority list.
    pub fn dir_name(&self) -> String {
        dir_basename(&self.path)
    }

    pub fn enable(&mut self) -> Result<()> {
        self.set_enabled(true)
    }

    pub fn disable(&mut self) -> Result<()> {
        self.set_enabled(false)
    }

    /// Read-merge-write so unknown declaration keys survive the toggle.
    fn set_enabled(&mut self, enabled: bool) -> Result<()> {
        let config_path = self.path.join(MOD_CONFIG_FILE);
        let raw = fs::read_to_string(&config_path)
            .with_context(|| format!("read {}", config_path.display()))?;
        let mut table: Table = raw.parse().context("parse mod declaration")?;
        table.insert("enabled".to_string(), Value::Boolean(enabled));
        let rendered = toml::to_string(&table).context("serialize mod declaration")?;
        fs::write(&config_path, rendered)
            .with_context(|| format!("write {}", config_path.display()))?;
        self.enabled = enabled;
        Ok(())
    }

    pub fn thumbnail_path(&self) -> PathBuf {
        self.path.join(THUMBNAIL_FILE)
    }

    pub fn has_thumbnail(&self) -> bool {
        self.thumbnail_path().is_file()
    }
}

/// Two mods are the same iff they were installed from the same origin entry.
/// Simple mods never compare equal through this; they have no identity.
impl PartialEq for DivaMod {
    fn eq(&self, other: &Self) -> bool {
        match (&self.source, &other.source) {
            (Some(a), Some(b)) => a.origin == b.origin && a.id == b.id,
            _ => false,
        }
    }
}

impl fmt::Display for DivaMod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{} ({}) by {}", self.name, version, self.author),
            None => write!(f, "{} by {}", self.name, self.author),
        }
    }
}
