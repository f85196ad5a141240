use crate::game;
use anyhow::{bail, Context, Result};
use directories::BaseDirs;
use std::{
    fs,
    path::{Path, PathBuf},
};
use toml::{Table, Value};

/// Application configuration, kept as a raw table so keys written by other
/// (newer, older) versions survive a read-modify-write cycle.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    table: Table,
    path: PathBuf,
}

impl AppConfig {
    pub fn load_or_create() -> Result<Self> {
        Self::load_from(config_path()?)
    }

    pub fn load_from(path: PathBuf) -> Result<Self> {
        if path.exists() {
            let raw = fs::read_to_string(&path).context("read app config")?;
            let table = raw.parse::<Table>().context("parse app config")?;
            return Ok(Self { table, path });
        }
        let config = Self {
            table: Table::new(),
            path,
        };
        config.save()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("create config dir")?;
        }
        let raw = toml::to_string(&self.table).context("serialize app config")?;
        fs::write(&self.path, raw).context("write app config")?;
        Ok(())
    }

    pub fn install_dir(&self) -> Option<PathBuf> {
        self.table
            .get("diva_path")
            .and_then(Value::as_str)
            .map(PathBuf::from)
    }

    pub fn set_install_dir(&mut self, path: &Path) {
        self.table.insert(
            "diva_path".to_string(),
            Value::String(path.to_string_lossy().into_owned()),
        );
    }

    /// Where the game lives: environment override first, then the configured
    /// path, then Steam library detection.
    pub fn resolve_install_dir(&self) -> Result<PathBuf> {
        if let Some(path) = game::env_override() {
            return Ok(path);
        }
        if let Some(path) = self.install_dir() {
            return Ok(path);
        }
        match game::detect_install_dir() {
            Some(path) => Ok(path),
            None => bail!(
                "could not locate {}; set diva_path in {} or export {}",
                game::GAME_NAME,
                self.path.display(),
                game::INSTALL_DIR_ENV
            ),
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.config_dir().join("divaforge").join("config.toml"))
}

/// Default landing spot for save-data backups.
pub fn default_backup_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("divaforge").join("backups"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_empty_config_on_first_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested/config.toml");
        let config = AppConfig::load_from(path.clone()).unwrap();
        assert!(path.is_file());
        assert_eq!(config.install_dir(), None);
    }

    #[test]
    fn set_install_dir_preserves_foreign_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(&path, "last_update_check = 17\n").unwrap();

        let mut config = AppConfig::load_from(path.clone()).unwrap();
        config.set_install_dir(Path::new("/games/diva"));
        config.save().unwrap();

        let reloaded = AppConfig::load_from(path).unwrap();
        assert_eq!(reloaded.install_dir(), Some(PathBuf::from("/games/diva")));
        assert_eq!(
            reloaded.table.get("last_update_check"),
            Some(&Value::Integer(17))
        );
    }

    #[test]
    fn configured_path_wins_over_detection() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.toml");
        let mut config = AppConfig::load_from(path).unwrap();
        config.set_install_dir(Path::new("/games/diva"));
        assert_eq!(
            config.resolve_install_dir().unwrap(),
            PathBuf::from("/games/diva")
        );
    }
}
