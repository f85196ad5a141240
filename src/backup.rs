//! Save-data backups. A backup is a plain zip of the save directory plus a
//! small metadata file recording which flavor of save it came from, so a
//! restore can find its way back without the user remembering.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use time::macros::format_description;
use time::OffsetDateTime;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

pub const BACKUP_META_FILE: &str = "divaforge_meta.toml";
const BACKUP_PREFIX: &str = "divaforge_backup_";

/// The two save-data layouts Mega Mix+ can run with. The song limit patch
/// moves saves into its own vendor folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveKind {
    Vanilla,
    SongLimitPatch,
}

impl SaveKind {
    pub fn type_name(self) -> &'static str {
        match self {
            SaveKind::Vanilla => "vanilla",
            SaveKind::SongLimitPatch => "songlimitpatch",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            SaveKind::Vanilla => "Vanilla",
            SaveKind::SongLimitPatch => "Song Limit Patch",
        }
    }

    /// Vendor folder under AppData/Roaming that holds this flavor's saves.
    pub fn vendor_dir(self) -> &'static str {
        match self {
            SaveKind::Vanilla => "SEGA",
            SaveKind::SongLimitPatch => "DIVA",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "vanilla" => Some(SaveKind::Vanilla),
            "songlimitpatch" => Some(SaveKind::SongLimitPatch),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BackupMeta {
    #[serde(rename = "type")]
    pub kind: String,
    pub steam_id: String,
    pub timestamp: u64,
    pub divaforge_version: String,
}

impl BackupMeta {
    pub fn save_kind(&self) -> Option<SaveKind> {
        SaveKind::parse(&self.kind)
    }
}

/// Zips `save_dir` into `output_dir` and returns the archive path.
pub fn create_backup(
    save_dir: &Path,
    output_dir: &Path,
    kind: SaveKind,
    steam_id: &str,
) -> Result<PathBuf> {
    if !save_dir.is_dir() {
        bail!(
            "no {} save data found at {}",
            kind.display_name(),
            save_dir.display()
        );
    }
    fs::create_dir_all(output_dir).context("create backup directory")?;

    let format = format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");
    let stamp = OffsetDateTime::now_utc()
        .format(&format)
        .context("format backup timestamp")?;
    let archive_path = output_dir.join(format!("{BACKUP_PREFIX}{}_{stamp}.zip", kind.type_name()));

    let file = fs::File::create(&archive_path)
        .with_context(|| format!("create {}", archive_path.display()))?;
    let mut writer = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default();

    for entry in WalkDir::new(save_dir) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(save_dir)
            .context("save-relative path")?;
        if rel.as_os_str().is_empty() {
            continue;
        }
        let name = rel.to_string_lossy().into_owned();
        if entry.file_type().is_dir() {
            writer
                .add_directory(name, options)
                .context("add backup directory")?;
        } else if entry.file_type().is_file() {
            writer.start_file(name, options).context("add backup file")?;
            let mut source = fs::File::open(entry.path())
                .with_context(|| format!("open {}", entry.path().display()))?;
            io::copy(&mut source, &mut writer).context("write backup file")?;
        }
    }

    let meta = BackupMeta {
        kind: kind.type_name().to_string(),
        steam_id: steam_id.to_string(),
        timestamp: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs(),
        divaforge_version: env!("CARGO_PKG_VERSION").to_string(),
    };
    writer
        .start_file(BACKUP_META_FILE, options)
        .context("add backup metadata")?;
    let rendered = toml::to_string(&meta).context("serialize backup metadata")?;
    io::copy(&mut Cursor::new(rendered.into_bytes()), &mut writer)
        .context("write backup metadata")?;
    writer.finish().context("finalize backup archive")?;

    Ok(archive_path)
}

/// Reads the metadata file out of a backup without extracting it.
pub fn inspect_backup(archive_path: &Path) -> Result<BackupMeta> {
    let file = fs::File::open(archive_path)
        .with_context(|| format!("open backup {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file).context("read backup archive")?;
    let mut entry = archive
        .by_name(BACKUP_META_FILE)
        .context("backup has no divaforge metadata")?;
    let mut raw = String::new();
    io::Read::read_to_string(&mut entry, &mut raw).context("read backup metadata")?;
    toml::from_str(&raw).context("parse backup metadata")
}

/// Unpacks a backup into the save directory. Never overwrites: restoring
/// over existing saves is a deliberate, manual cleanup away.
pub fn restore_backup(archive_path: &Path, save_dir: &Path) -> Result<()> {
    let file = fs::File::open(archive_path)
        .with_context(|| format!("open backup {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file).context("read backup archive")?;
    fs::create_dir_all(save_dir).context("create save directory")?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).context("read backup entry")?;
        let Some(rel) = entry.enclosed_name() else {
            bail!("unsafe path {:?} in backup", entry.name());
        };
        if rel == Path::new(BACKUP_META_FILE) {
            continue;
        }
        let dest = save_dir.join(rel);
        if entry.is_dir() {
            fs::create_dir_all(&dest).context("create save subdirectory")?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).context("create save subdirectory")?;
        }
        let mut out = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&dest)
            .with_context(|| format!("restore would overwrite {}", dest.display()))?;
        io::copy(&mut entry, &mut out).context("write restored file")?;
    }
    Ok(())
}

/// Backup archives in `dir`, oldest first. The timestamped names make
/// lexical order chronological.
pub fn list_backups(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut backups: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("list {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with(BACKUP_PREFIX) && name.ends_with(".zip"))
        })
        .collect();
    backups.sort();
    Ok(backups)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_save_dir(root: &Path) -> PathBuf {
        let save = root.join("save");
        fs::create_dir_all(save.join("pv_data")).unwrap();
        fs::write(save.join("secsave.dat"), b"scores").unwrap();
        fs::write(save.join("pv_data/pv_001.dat"), b"chart").unwrap();
        save
    }

    #[test]
    fn backup_round_trips_without_meta_leak() {
        let tmp = tempfile::tempdir().unwrap();
        let save = fake_save_dir(tmp.path());
        let out = tmp.path().join("backups");

        let archive = create_backup(&save, &out, SaveKind::Vanilla, "76561198000000002").unwrap();
        assert!(archive.file_name().unwrap().to_str().unwrap().starts_with(BACKUP_PREFIX));

        let meta = inspect_backup(&archive).unwrap();
        assert_eq!(meta.save_kind(), Some(SaveKind::Vanilla));
        assert_eq!(meta.steam_id, "76561198000000002");
        assert_eq!(meta.divaforge_version, env!("CARGO_PKG_VERSION"));

        let restored = tmp.path().join("restored");
        restore_backup(&archive, &restored).unwrap();
        assert_eq!(fs::read(restored.join("secsave.dat")).unwrap(), b"scores");
        assert_eq!(
            fs::read(restored.join("pv_data/pv_001.dat")).unwrap(),
            b"chart"
        );
        assert!(!restored.join(BACKUP_META_FILE).exists());
    }

    #[test]
    fn restore_refuses_to_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let save = fake_save_dir(tmp.path());
        let out = tmp.path().join("backups");
        let archive =
            create_backup(&save, &out, SaveKind::SongLimitPatch, "765611980000").unwrap();

        let restored = tmp.path().join("restored");
        restore_backup(&archive, &restored).unwrap();
        assert!(restore_backup(&archive, &restored).is_err());
    }

    #[test]
    fn backup_of_missing_save_dir_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let missing = tmp.path().join("nope");
        assert!(create_backup(&missing, tmp.path(), SaveKind::Vanilla, "1").is_err());
    }

    #[test]
    fn list_backups_filters_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("divaforge_backup_vanilla_b.zip"), b"x").unwrap();
        fs::write(tmp.path().join("divaforge_backup_vanilla_a.zip"), b"x").unwrap();
        fs::write(tmp.path().join("unrelated.zip"), b"x").unwrap();
        fs::write(tmp.path().join("notes.txt"), b"x").unwrap();

        let found = list_backups(tmp.path()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            [
                "divaforge_backup_vanilla_a.zip",
                "divaforge_backup_vanilla_b.zip"
            ]
        );
        assert!(list_backups(&tmp.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn save_kind_parse_round_trip() {
        for kind in [SaveKind::Vanilla, SaveKind::SongLimitPatch] {
            assert_eq!(SaveKind::parse(kind.type_name()), Some(kind));
        }
        assert_eq!(SaveKind::parse("modern"), None);
    }
}
