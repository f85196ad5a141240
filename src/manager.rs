use crate::api::{self, OriginRegistry};
use crate::divamod::{self, DivaMod, ModSource, MOD_CONFIG_FILE, MOD_INFO_FILE};
use crate::error::Error;
use crate::extract;
use crate::loader;
use anyhow::{bail, Context, Result};
use filetime::FileTime;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use toml::Value;
use tracing::{info, warn};
use walkdir::WalkDir;

static STAGING_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// The installed mod collection of one game root. `mods` is ordered by load
/// priority, highest first, and every mutation keeps the loader config's
/// priority list persistable from it.
pub struct ModManager {
    pub base_path: PathBuf,
    pub mods_path: PathBuf,
    /// Loader master switch, mirrored from its config.
    pub enabled: bool,
    pub mods: Vec<DivaMod>,
}

impl ModManager {
    /// Opens a game root that has the loader installed. `mods_override`
    /// substitutes the mods directory for setups that keep it elsewhere.
    pub fn open(base_path: &Path, mods_override: Option<&Path>) -> Result<Self> {
        let config = loader::read_config(base_path)?;
        let enabled = config
            .get("enabled")
            .and_then(Value::as_bool)
            .context("loader config missing 'enabled'")?;
        let mods_path = match mods_override {
            Some(path) => path.to_path_buf(),
            None => base_path.join(
                config
                    .get("mods")
                    .and_then(Value::as_str)
                    .unwrap_or("mods"),
            ),
        };
        if !mods_path.is_dir() {
            fs::create_dir_all(&mods_path)
                .with_context(|| format!("create mods directory {}", mods_path.display()))?;
        }
        let mods = load_mods(&mods_path, &priority_from(&config))?;
        Ok(Self {
            base_path: base_path.to_path_buf(),
            mods_path,
            enabled,
            mods,
        })
    }

    /// Re-reads the loader config and the mods directory, dropping any
    /// unsaved ordering.
    pub fn reload(&mut self) -> Result<()> {
        let config = loader::read_config(&self.base_path)?;
        self.enabled = config
            .get("enabled")
            .and_then(Value::as_bool)
            .context("loader config missing 'enabled'")?;
        self.mods = load_mods(&self.mods_path, &priority_from(&config))?;
        Ok(())
    }

    /// Writes the current in-memory order into the loader config's priority
    /// list, leaving every other key alone.
    pub fn save_priority(&self) -> Result<()> {
        let mut config = loader::read_config(&self.base_path)?;
        let names = self
            .mods
            .iter()
            .map(|entry| Value::String(entry.dir_name()))
            .collect();
        config.insert("priority".to_string(), Value::Array(names));
        loader::write_config(&self.base_path, &config)
    }

    /// Moves the mod at `index` by `delta` priority slots, clamped to the
    /// list ends, and persists the new order.
    pub fn shift_priority(&mut self, index: usize, delta: isize) -> Result<()> {
        if index >= self.mods.len() {
            bail!("mod index {index} out of range");
        }
        let last = self.mods.len() as isize - 1;
        let target = (index as isize + delta).clamp(0, last) as usize;
        if target != index {
            let entry = self.mods.remove(index);
            self.mods.insert(target, entry);
        }
        self.save_priority()
    }

    pub fn set_loader_enabled(&mut self, enabled: bool) -> Result<()> {
        let mut config = loader::read_config(&self.base_path)?;
        config.insert("enabled".to_string(), Value::Boolean(enabled));
        loader::write_config(&self.base_path, &config)?;
        self.enabled = enabled;
        Ok(())
    }

    pub fn enable(&mut self, index: usize) -> Result<()> {
        self.mod_at_mut(index)?.enable()
    }

    pub fn disable(&mut self, index: usize) -> Result<()> {
        self.mod_at_mut(index)?.disable()
    }

    fn mod_at_mut(&mut self, index: usize) -> Result<&mut DivaMod> {
        let len = self.mods.len();
        self.mods
            .get_mut(index)
            .with_context(|| format!("mod index {index} out of range (have {len})"))
    }

    pub fn mods_from(&self, origin: &str) -> Vec<&DivaMod> {
        self.mods
            .iter()
            .filter(|entry| {
                entry
                    .source
                    .as_ref()
                    .is_some_and(|source| source.origin == origin)
            })
            .collect()
    }

    /// Identity is the (origin, id) pair; the same numeric id from another
    /// origin is a different mod.
    pub fn mod_is_installed(&self, id: i64, origin: &str) -> bool {
        self.mods.iter().any(|entry| {
            entry
                .source
                .as_ref()
                .is_some_and(|source| source.id == id && source.origin == origin)
        })
    }

    /// Installs a mod from an origin and appends it at the bottom of the
    /// priority order. Fails without touching the mods directory if the
    /// metadata is broken, the download fails, or the target folder exists.
    pub fn install(
        &mut self,
        registry: &mut OriginRegistry,
        origin: &str,
        id: i64,
        category: &str,
        fetch_thumbnail: bool,
    ) -> Result<&DivaMod> {
        let data = registry.fetch_mod_data(origin, id, category)?;
        if let Some(detail) = &data.error {
            return Err(Error::MetadataUnavailable {
                origin: origin.to_string(),
                id,
                detail: detail.clone(),
            }
            .into());
        }
        info!("downloading mod {id} from {origin}");
        let payload = api::download_mod(&data.download)?;
        let source = ModSource {
            id,
            hash: data.hash.clone(),
            origin: origin.to_string(),
            category: category.to_string(),
        };
        let index = self.install_payload(&payload, &id.to_string(), Some(source))?;
        if fetch_thumbnail {
            if let Err(err) = self.fetch_thumbnail(registry, &self.mods[index], false) {
                warn!("thumbnail for mod {id} unavailable: {err}");
            }
        }
        Ok(&self.mods[index])
    }

    /// Installs a local archive file. The mod stays simple; there is no
    /// origin identity to record.
    pub fn install_from_archive(&mut self, archive_path: &Path) -> Result<&DivaMod> {
        let payload = fs::read(archive_path)
            .with_context(|| format!("read archive {}", archive_path.display()))?;
        let fallback = archive_path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("mod")
            .to_string();
        let index = self.install_payload(&payload, &fallback, None)?;
        Ok(&self.mods[index])
    }

    fn install_payload(
        &mut self,
        payload: &[u8],
        fallback_name: &str,
        source: Option<ModSource>,
    ) -> Result<usize> {
        let staging = make_staging_dir(&self.base_path)?;
        let _guard = StagingGuard::new(staging.clone());
        extract::extract(payload, &staging)?;
        let (extracted_root, folder_name) = resolve_mod_root(&staging, fallback_name)?;
        let target = self.mods_path.join(&folder_name);
        if target.exists() {
            bail!("mod folder {} already exists", target.display());
        }
        move_or_copy_dir(&extracted_root, &target)?;
        if let Some(source) = &source {
            let rendered = toml::to_string(source).context("serialize mod identity")?;
            fs::write(target.join(MOD_INFO_FILE), rendered).context("write mod identity file")?;
        }
        let new_mod = match divamod::load_mod(&target) {
            Ok(loaded) => loaded,
            Err(err) => {
                let _ = fs::remove_dir_all(&target);
                return Err(err).context("installed archive is not a loadable mod");
            }
        };
        info!("installed {new_mod}");
        self.mods.push(new_mod);
        Ok(self.mods.len() - 1)
    }

    /// Removes the mod's directory and its collection entry.
    pub fn delete(&mut self, index: usize) -> Result<DivaMod> {
        let entry = self
            .mods
            .get(index)
            .with_context(|| format!("mod index {index} out of range"))?;
        fs::remove_dir_all(&entry.path)
            .with_context(|| format!("remove {}", entry.path.display()))?;
        let removed = self.mods.remove(index);
        info!("deleted {}", removed.name);
        Ok(removed)
    }

    /// Updates a tracked mod by deleting it and reinstalling from its origin.
    /// The old copy is gone before the new download starts; a failed
    /// reinstall leaves the mod uninstalled.
    pub fn update(
        &mut self,
        registry: &mut OriginRegistry,
        index: usize,
        fetch_thumbnail: bool,
    ) -> Result<()> {
        let Some(source) = self.mods.get(index).and_then(|entry| entry.source.clone()) else {
            warn!("mod at index {index} has no origin identity, skipping update");
            return Ok(());
        };
        self.delete(index)?;
        self.install(
            registry,
            &source.origin,
            source.id,
            &source.category,
            fetch_thumbnail,
        )
        .with_context(|| {
            format!(
                "reinstall of mod {} from {} failed; the old copy was already removed",
                source.id, source.origin
            )
        })?;
        Ok(())
    }

    /// Warms the per-origin metadata caches with one batched request per
    /// origin covering every tracked mod, so subsequent out-of-date checks
    /// run without further network traffic.
    pub fn check_for_updates(
        &self,
        registry: &mut OriginRegistry,
        fetch_thumbnails: bool,
    ) -> Result<(), Error> {
        for origin in registry.keys() {
            let mut batch: Vec<(i64, String)> = Vec::new();
            for entry in self.mods_from(origin) {
                if let Some(source) = &entry.source {
                    if !batch.iter().any(|(id, _)| *id == source.id) {
                        batch.push((source.id, source.category.clone()));
                    }
                }
            }
            if batch.is_empty() {
                continue;
            }
            registry.multi_fetch_mod_data(origin, &batch)?;
        }
        if fetch_thumbnails {
            for entry in &self.mods {
                if entry.is_simple() {
                    continue;
                }
                if let Err(err) = self.fetch_thumbnail(registry, entry, false) {
                    warn!("thumbnail for {} unavailable: {err}", entry.name);
                }
            }
        }
        Ok(())
    }

    /// Compares the fingerprint recorded at install time with the origin's
    /// current one. Simple mods are never out of date. A cached error record
    /// surfaces as `MetadataUnavailable` instead of a stale `false`.
    pub fn is_out_of_date(
        &self,
        registry: &mut OriginRegistry,
        entry: &DivaMod,
    ) -> Result<bool, Error> {
        let Some(source) = &entry.source else {
            return Ok(false);
        };
        let data = registry.fetch_mod_data(&source.origin, source.id, &source.category)?;
        if let Some(detail) = &data.error {
            return Err(Error::MetadataUnavailable {
                origin: source.origin.clone(),
                id: source.id,
                detail: detail.clone(),
            });
        }
        Ok(data.hash != source.hash)
    }

    /// Best-effort preview image download into the mod's directory. Skips
    /// mods that already have one unless `force` is set.
    pub fn fetch_thumbnail(
        &self,
        registry: &mut OriginRegistry,
        entry: &DivaMod,
        force: bool,
    ) -> Result<()> {
        let Some(source) = &entry.source else {
            return Ok(());
        };
        if !force && entry.has_thumbnail() {
            return Ok(());
        }
        let data = registry.fetch_mod_data(&source.origin, source.id, &source.category)?;
        if let Some(detail) = &data.error {
            return Err(Error::MetadataUnavailable {
                origin: source.origin.clone(),
                id: source.id,
                detail: detail.clone(),
            }
            .into());
        }
        let image = api::download_mod(&data.image)?;
        fs::write(entry.thumbnail_path(), image)
            .with_context(|| format!("write {}", entry.thumbnail_path().display()))?;
        Ok(())
    }
}

fn priority_from(config: &toml::Table) -> Vec<String> {
    config
        .get("priority")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Loads every mod directory, skipping (with a log line) any that cannot be
/// read, then orders them: priority-listed mods first in list order, the
/// rest behind in enumeration order.
fn load_mods(mods_path: &Path, priority: &[String]) -> Result<Vec<DivaMod>> {
    let mut remaining = Vec::new();
    let entries = fs::read_dir(mods_path)
        .with_context(|| format!("list mods directory {}", mods_path.display()))?;
    for entry in entries {
        let path = entry.context("read mods directory entry")?.path();
        if !path.is_dir() {
            continue;
        }
        match divamod::load_mod(&path) {
            Ok(loaded) => remaining.push(loaded),
            Err(err) => warn!("skipping {}: {err}", path.display()),
        }
    }
    let mut ordered = Vec::with_capacity(remaining.len());
    for name in priority {
        if let Some(position) = remaining
            .iter()
            .position(|entry| entry.dir_name() == *name)
        {
            ordered.push(remaining.remove(position));
        }
    }
    ordered.append(&mut remaining);
    Ok(ordered)
}

/// Decides which extracted directory becomes the mod folder. A declaration
/// file at the archive root means the archive itself is the mod, named by
/// `fallback_name`; otherwise a single top-level folder is promoted under
/// its own name. Anything else is unusable.
fn resolve_mod_root(staging: &Path, fallback_name: &str) -> Result<(PathBuf, String)> {
    if staging.join(MOD_CONFIG_FILE).is_file() {
        return Ok((staging.to_path_buf(), fallback_name.to_string()));
    }
    let entries: Vec<PathBuf> = fs::read_dir(staging)
        .context("list staging directory")?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    match entries.as_slice() {
        [single] if single.is_dir() => {
            let name = single
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| fallback_name.to_string());
            Ok((single.clone(), name))
        }
        [single] => {
            let name = single
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            Err(Error::UnusableArchiveLayout(format!(
                "the only top-level entry {name:?} is a file, not a mod folder"
            ))
            .into())
        }
        [] => Err(Error::UnusableArchiveLayout("archive was empty".to_string()).into()),
        _ => Err(Error::UnusableArchiveLayout(format!(
            "no declaration file at the archive root and {} top-level entries",
            entries.len()
        ))
        .into()),
    }
}

/// Scratch directory under the game root, so promoting into the mods folder
/// is a same-filesystem rename in the common case.
fn make_staging_dir(base_path: &Path) -> Result<PathBuf> {
    let counter = STAGING_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let dir = base_path.join(format!(".divaforge-stage-{nanos}-{counter}"));
    fs::create_dir_all(&dir).context("create staging directory")?;
    Ok(dir)
}

/// Removes a staging directory when dropped. Promotion renames the tree away
/// first, so the drop only sweeps up leftovers.
pub(crate) struct StagingGuard {
    path: PathBuf,
}

impl StagingGuard {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

fn move_or_copy_dir(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).context("create mods directory")?;
    }
    if fs::rename(source, dest).is_ok() {
        return Ok(());
    }
    // Rename fails across filesystems; fall back to a copy, sweeping away a
    // partial destination if the copy dies midway.
    if let Err(err) = copy_dir(source, dest) {
        let _ = fs::remove_dir_all(dest);
        return Err(err);
    }
    Ok(())
}

fn copy_dir(source: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(source) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .context("source-relative path")?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("create {}", target.display()))?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            fs::copy(entry.path(), &target)
                .with_context(|| format!("copy {}", rel.display()))?;
            preserve_mtime(entry.path(), &target);
        }
    }
    Ok(())
}

fn preserve_mtime(source: &Path, dest: &Path) {
    if let Ok(meta) = fs::metadata(source) {
        let mtime = FileTime::from_last_modification_time(&meta);
        let _ = filetime::set_file_mtime(dest, mtime);
    }
}
