use crate::{
    api::OriginRegistry,
    backup::{self, SaveKind},
    config::{self, AppConfig},
    divamod::LEGACY_CATEGORY,
    game, loader,
    manager::ModManager,
};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "json" => Some(OutputFormat::Json),
            "text" => Some(OutputFormat::Text),
            _ => None,
        }
    }
}

struct GlobalOptions {
    format: OutputFormat,
    game_dir: Option<PathBuf>,
}

enum CliCommand {
    Mods(ModsOptions),
    Search {
        query: String,
        origin: Option<String>,
    },
    Install(InstallOptions),
    Import {
        archives: Vec<String>,
    },
    Remove {
        name: String,
    },
    Update(UpdateOptions),
    Enable {
        name: String,
    },
    Disable {
        name: String,
    },
    Priority {
        name: String,
        direction: PriorityMove,
    },
    Loader(LoaderCommand),
    Backup(BackupCommand),
    Paths,
    SetGameDir {
        path: PathBuf,
    },
    Help,
    Version,
}

struct ModsOptions {
    check: bool,
    thumbnails: bool,
}

struct InstallOptions {
    origin: String,
    id: i64,
    category: String,
    thumbnail: bool,
}

struct UpdateOptions {
    target: UpdateTarget,
    thumbnail: bool,
}

enum UpdateTarget {
    All,
    One(String),
}

#[derive(Clone, Copy)]
enum PriorityMove {
    Up,
    Down,
    Top,
    Bottom,
}

enum LoaderCommand {
    Status,
    Check,
    Enable,
    Disable,
    Install,
}

enum BackupCommand {
    Save {
        kind: SaveKind,
        output: Option<PathBuf>,
    },
    Restore {
        archive: PathBuf,
    },
    List {
        dir: Option<PathBuf>,
    },
}

pub fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let (global, command) = parse_args(&args)?;
    match command {
        CliCommand::Help => {
            print_help();
            Ok(())
        }
        CliCommand::Version => {
            println!("divaforge v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        command => dispatch(command, &global),
    }
}

fn parse_args(args: &[String]) -> Result<(GlobalOptions, CliCommand)> {
    let (global, tokens) = parse_global_options(args);
    let command = match tokens.first().map(String::as_str) {
        None => CliCommand::Help,
        Some("--help" | "-h" | "help") => CliCommand::Help,
        Some("--version" | "-V" | "version") => CliCommand::Version,
        Some(_) => parse_command(&tokens)?,
    };
    Ok((global, command))
}

fn parse_global_options(args: &[String]) -> (GlobalOptions, Vec<String>) {
    let mut format = OutputFormat::Text;
    let mut game_dir = None;
    let mut tokens = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if let Some(value) = arg.strip_prefix("--format=") {
            if let Some(parsed) = OutputFormat::parse(value) {
                format = parsed;
            }
            continue;
        }
        if arg == "--format" {
            if let Some(value) = iter.next() {
                if let Some(parsed) = OutputFormat::parse(value) {
                    format = parsed;
                }
            }
            continue;
        }
        if let Some(value) = arg.strip_prefix("--game-dir=") {
            game_dir = Some(PathBuf::from(value));
            continue;
        }
        if arg == "--game-dir" {
            if let Some(value) = iter.next() {
                game_dir = Some(PathBuf::from(value));
            }
            continue;
        }
        tokens.push(arg.to_string());
    }

    (GlobalOptions { format, game_dir }, tokens)
}

fn parse_command(tokens: &[String]) -> Result<CliCommand> {
    let Some(head) = tokens.first() else {
        return Ok(CliCommand::Help);
    };
    let rest = tokens.get(1..).unwrap_or(&[]);
    match head.as_str() {
        "mods" | "list" => Ok(CliCommand::Mods(parse_mods(rest))),
        "search" => parse_search(rest),
        "install" => parse_install(rest),
        "import" => {
            if rest.is_empty() {
                bail!("import requires at least one archive path");
            }
            Ok(CliCommand::Import {
                archives: rest.to_vec(),
            })
        }
        "remove" | "uninstall" => Ok(CliCommand::Remove {
            name: single_name(rest, "remove")?,
        }),
        "update" => parse_update(rest),
        "enable" => Ok(CliCommand::Enable {
            name: single_name(rest, "enable")?,
        }),
        "disable" => Ok(CliCommand::Disable {
            name: single_name(rest, "disable")?,
        }),
        "priority" => parse_priority(rest),
        "loader" => parse_loader(rest),
        "backup" => parse_backup(rest),
        "paths" => Ok(CliCommand::Paths),
        "set-game-dir" => Ok(CliCommand::SetGameDir {
            path: PathBuf::from(single_name(rest, "set-game-dir")?),
        }),
        other => bail!("Unknown command: {other} (try 'divaforge help')"),
    }
}

fn single_name(args: &[String], command: &str) -> Result<String> {
    match args {
        [name] => Ok(name.clone()),
        [] => bail!("{command} requires an argument"),
        _ => bail!("{command} takes exactly one argument"),
    }
}

fn parse_mods(args: &[String]) -> ModsOptions {
    let mut check = false;
    let mut thumbnails = false;
    for arg in args {
        match arg.as_str() {
            "--check" | "-c" => check = true,
            "--thumbnails" => thumbnails = true,
            _ => {}
        }
    }
    ModsOptions { check, thumbnails }
}

fn parse_search(args: &[String]) -> Result<CliCommand> {
    let mut origin = None;
    let mut words = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--origin" {
            let value = iter.next().context("--origin requires an origin key")?;
            origin = Some(value.to_string());
        } else if let Some(value) = arg.strip_prefix("--origin=") {
            origin = Some(value.to_string());
        } else {
            words.push(arg.as_str());
        }
    }
    if words.is_empty() {
        bail!("search requires a query");
    }
    Ok(CliCommand::Search {
        query: words.join(" "),
        origin,
    })
}

fn parse_install(args: &[String]) -> Result<CliCommand> {
    let mut origin = None;
    let mut id = None;
    let mut category = None;
    let mut thumbnail = true;
    for arg in args {
        match arg.as_str() {
            "--no-thumbnail" => thumbnail = false,
            value if origin.is_none() => origin = Some(value.to_string()),
            value if id.is_none() => {
                id = Some(
                    value
                        .parse::<i64>()
                        .with_context(|| format!("mod id {value:?} is not a number"))?,
                )
            }
            value if category.is_none() => category = Some(value.to_string()),
            value => bail!("unexpected argument: {value}"),
        }
    }
    let origin = origin.context("install requires an origin and a mod id")?;
    let id = id.context("install requires a mod id")?;
    Ok(CliCommand::Install(InstallOptions {
        origin,
        id,
        category: category.unwrap_or_else(|| LEGACY_CATEGORY.to_string()),
        thumbnail,
    }))
}

fn parse_update(args: &[String]) -> Result<CliCommand> {
    let mut target = None;
    let mut thumbnail = true;
    for arg in args {
        match arg.as_str() {
            "--all" | "-a" => target = Some(UpdateTarget::All),
            "--no-thumbnail" => thumbnail = false,
            value if target.is_none() => target = Some(UpdateTarget::One(value.to_string())),
            value => bail!("unexpected argument: {value}"),
        }
    }
    let target = target.context("update requires a mod name or --all")?;
    Ok(CliCommand::Update(UpdateOptions { target, thumbnail }))
}

fn parse_priority(args: &[String]) -> Result<CliCommand> {
    let name = args.first().context("priority requires a mod name")?;
    let direction = match args.get(1).map(String::as_str) {
        Some("up") => PriorityMove::Up,
        Some("down") => PriorityMove::Down,
        Some("top") => PriorityMove::Top,
        Some("bottom") => PriorityMove::Bottom,
        Some(other) => bail!("Unknown direction: {other} (use 'up', 'down', 'top', or 'bottom')"),
        None => bail!("priority requires a direction: up, down, top, or bottom"),
    };
    Ok(CliCommand::Priority {
        name: name.to_string(),
        direction,
    })
}

fn parse_loader(args: &[String]) -> Result<CliCommand> {
    let sub = args.first().map(String::as_str).unwrap_or("status");
    let command = match sub {
        "status" => LoaderCommand::Status,
        "check" => LoaderCommand::Check,
        "enable" => LoaderCommand::Enable,
        "disable" => LoaderCommand::Disable,
        "install" | "update" => LoaderCommand::Install,
        other => {
            bail!("Unknown loader command: {other} (use 'status', 'check', 'enable', 'disable', or 'install')")
        }
    };
    Ok(CliCommand::Loader(command))
}

fn parse_backup(args: &[String]) -> Result<CliCommand> {
    let sub = args.first().map(String::as_str).unwrap_or("list");
    match sub {
        "save" => {
            let kind_raw = args
                .get(1)
                .context("backup save requires a save type: vanilla or songlimitpatch")?;
            let kind = SaveKind::parse(kind_raw).with_context(|| {
                format!("unknown save type {kind_raw:?} (use 'vanilla' or 'songlimitpatch')")
            })?;
            let output = parse_path_flag(args.get(2..).unwrap_or(&[]), "--output")?;
            Ok(CliCommand::Backup(BackupCommand::Save { kind, output }))
        }
        "restore" => {
            let archive = args
                .get(1)
                .context("backup restore requires an archive path")?;
            Ok(CliCommand::Backup(BackupCommand::Restore {
                archive: PathBuf::from(archive),
            }))
        }
        "list" => {
            let dir = parse_path_flag(args.get(1..).unwrap_or(&[]), "--dir")?;
            Ok(CliCommand::Backup(BackupCommand::List { dir }))
        }
        other => bail!("Unknown backup command: {other} (use 'save', 'restore', or 'list')"),
    }
}

fn parse_path_flag(args: &[String], flag: &str) -> Result<Option<PathBuf>> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == flag {
            let value = iter
                .next()
                .with_context(|| format!("{flag} requires a path"))?;
            return Ok(Some(PathBuf::from(value)));
        }
        if let Some(value) = arg.strip_prefix(flag).and_then(|v| v.strip_prefix('=')) {
            return Ok(Some(PathBuf::from(value)));
        }
    }
    Ok(None)
}

fn dispatch(command: CliCommand, global: &GlobalOptions) -> Result<()> {
    let config = AppConfig::load_or_create()?;
    match command {
        CliCommand::Mods(options) => list_mods(&config, global, options),
        CliCommand::Search { query, origin } => search(global, &query, origin.as_deref()),
        CliCommand::Install(options) => install(&config, global, options),
        CliCommand::Import { archives } => import(&config, global, &archives),
        CliCommand::Remove { name } => remove(&config, global, &name),
        CliCommand::Update(options) => update(&config, global, options),
        CliCommand::Enable { name } => set_mod_enabled(&config, global, &name, true),
        CliCommand::Disable { name } => set_mod_enabled(&config, global, &name, false),
        CliCommand::Priority { name, direction } => {
            shift_priority(&config, global, &name, direction)
        }
        CliCommand::Loader(command) => run_loader(&config, global, command),
        CliCommand::Backup(command) => run_backup(&config, global, command),
        CliCommand::Paths => list_paths(&config, global),
        CliCommand::SetGameDir { path } => set_game_dir(config, &path),
        CliCommand::Help | CliCommand::Version => Ok(()),
    }
}

/// Game root for this invocation: the `--game-dir` flag wins over the
/// configured and detected locations.
fn resolve_root(config: &AppConfig, global: &GlobalOptions) -> Result<PathBuf> {
    match &global.game_dir {
        Some(path) => Ok(path.clone()),
        None => config.resolve_install_dir(),
    }
}

fn open_manager(config: &AppConfig, global: &GlobalOptions) -> Result<ModManager> {
    let root = resolve_root(config, global)?;
    if !loader::is_installed(&root) {
        bail!(
            "DivaModLoader is not installed at {}; run 'divaforge loader install' first",
            root.display()
        );
    }
    ModManager::open(&root, None)
}

fn find_mod(manager: &ModManager, query: &str) -> Result<usize> {
    manager
        .mods
        .iter()
        .position(|entry| entry.dir_name() == query || entry.name == query)
        .with_context(|| format!("no installed mod named {query:?}"))
}

#[derive(Serialize)]
struct ModListItem {
    name: String,
    folder: String,
    author: String,
    version: Option<String>,
    enabled: bool,
    size_bytes: u64,
    origin: Option<String>,
    id: Option<i64>,
    update_available: Option<bool>,
}

fn list_mods(config: &AppConfig, global: &GlobalOptions, options: ModsOptions) -> Result<()> {
    let manager = open_manager(config, global)?;
    let mut updates: HashMap<String, Option<bool>> = HashMap::new();
    if options.check || options.thumbnails {
        let mut registry = OriginRegistry::default();
        manager.check_for_updates(&mut registry, options.thumbnails)?;
        for entry in &manager.mods {
            if entry.is_simple() {
                continue;
            }
            let state = manager.is_out_of_date(&mut registry, entry).ok();
            updates.insert(entry.dir_name(), state);
        }
    }

    let items: Vec<ModListItem> = manager
        .mods
        .iter()
        .map(|entry| ModListItem {
            name: entry.name.clone(),
            folder: entry.dir_name(),
            author: entry.author.clone(),
            version: entry.version.as_ref().map(|v| v.to_string()),
            enabled: entry.enabled,
            size_bytes: entry.size_bytes,
            origin: entry.source.as_ref().map(|s| s.origin.clone()),
            id: entry.source.as_ref().map(|s| s.id),
            update_available: updates.get(&entry.dir_name()).copied().flatten(),
        })
        .collect();

    match global.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        OutputFormat::Text => {
            if items.is_empty() {
                println!("No mods installed.");
                return Ok(());
            }
            for (position, item) in items.iter().enumerate() {
                let enabled = if item.enabled { "x" } else { " " };
                let origin = item.origin.as_deref().unwrap_or("local");
                let version = item.version.as_deref().unwrap_or("-");
                let note = match item.update_available {
                    Some(true) => "  [update available]",
                    None if options.check && item.origin.is_some() => "  [check failed]",
                    _ => "",
                };
                println!(
                    "{position:>3} [{enabled}] {origin:<14} {size:>10} {name} ({version}){note}",
                    position = position + 1,
                    size = format_size(item.size_bytes),
                    name = item.name,
                );
            }
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct SearchListItem {
    origin: String,
    id: i64,
    category: String,
    author: String,
    name: String,
}

fn search(global: &GlobalOptions, query: &str, origin: Option<&str>) -> Result<()> {
    let mut registry = OriginRegistry::default();
    let hits = match origin {
        Some(key) => registry.search_mods(key, query)?,
        None => registry.search_all(query),
    };
    let items: Vec<SearchListItem> = hits
        .into_iter()
        .map(|hit| SearchListItem {
            origin: hit.origin.to_string(),
            id: hit.id,
            category: hit.category,
            author: hit.author,
            name: hit.name,
        })
        .collect();

    match global.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        OutputFormat::Text => {
            if items.is_empty() {
                println!("No results for {query:?}.");
                return Ok(());
            }
            for item in items {
                println!(
                    "{:<14} {:>8} {:<14} {:<20} {}",
                    item.origin, item.id, item.category, item.author, item.name
                );
            }
        }
    }

    Ok(())
}

fn install(config: &AppConfig, global: &GlobalOptions, options: InstallOptions) -> Result<()> {
    let mut manager = open_manager(config, global)?;
    if manager.mod_is_installed(options.id, &options.origin) {
        bail!(
            "mod {} from {} is already installed (try 'divaforge update')",
            options.id,
            options.origin
        );
    }
    let mut registry = OriginRegistry::default();
    let installed = manager.install(
        &mut registry,
        &options.origin,
        options.id,
        &options.category,
        options.thumbnail,
    )?;
    println!("Installed {installed}");
    Ok(())
}

fn import(config: &AppConfig, global: &GlobalOptions, archives: &[String]) -> Result<()> {
    let mut manager = open_manager(config, global)?;
    for archive in archives {
        let installed = manager.install_from_archive(Path::new(archive))?.to_string();
        println!("Installed {installed}");
    }
    Ok(())
}

fn remove(config: &AppConfig, global: &GlobalOptions, name: &str) -> Result<()> {
    let mut manager = open_manager(config, global)?;
    let index = find_mod(&manager, name)?;
    let removed = manager.delete(index)?;
    println!("Removed {}", removed.name);
    Ok(())
}

fn update(config: &AppConfig, global: &GlobalOptions, options: UpdateOptions) -> Result<()> {
    let mut manager = open_manager(config, global)?;
    let mut registry = OriginRegistry::default();
    match options.target {
        UpdateTarget::One(name) => {
            let index = find_mod(&manager, &name)?;
            if manager.mods[index].is_simple() {
                bail!("{name} was installed from a local archive and cannot be updated");
            }
            if !manager.is_out_of_date(&mut registry, &manager.mods[index])? {
                println!("{name} is already up to date.");
                return Ok(());
            }
            manager.update(&mut registry, index, options.thumbnail)?;
            println!("Updated {name}");
        }
        UpdateTarget::All => {
            manager.check_for_updates(&mut registry, false)?;
            let mut stale = Vec::new();
            for entry in &manager.mods {
                if entry.is_simple() {
                    continue;
                }
                match manager.is_out_of_date(&mut registry, entry) {
                    Ok(true) => stale.push(entry.dir_name()),
                    Ok(false) => {}
                    Err(err) => eprintln!("skipping {}: {err}", entry.name),
                }
            }
            if stale.is_empty() {
                println!("Everything is up to date.");
                return Ok(());
            }
            for folder in stale {
                let index = manager
                    .mods
                    .iter()
                    .position(|entry| entry.dir_name() == folder)
                    .with_context(|| format!("mod folder {folder} disappeared mid-update"))?;
                let name = manager.mods[index].name.clone();
                manager.update(&mut registry, index, options.thumbnail)?;
                println!("Updated {name}");
            }
        }
    }
    Ok(())
}

fn set_mod_enabled(
    config: &AppConfig,
    global: &GlobalOptions,
    name: &str,
    enabled: bool,
) -> Result<()> {
    let mut manager = open_manager(config, global)?;
    let index = find_mod(&manager, name)?;
    if enabled {
        manager.enable(index)?;
    } else {
        manager.disable(index)?;
    }
    println!(
        "{} is now {}",
        manager.mods[index].name,
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

fn shift_priority(
    config: &AppConfig,
    global: &GlobalOptions,
    name: &str,
    direction: PriorityMove,
) -> Result<()> {
    let mut manager = open_manager(config, global)?;
    let index = find_mod(&manager, name)?;
    let delta = match direction {
        PriorityMove::Up => -1,
        PriorityMove::Down => 1,
        PriorityMove::Top => -(index as isize),
        PriorityMove::Bottom => manager.mods.len() as isize,
    };
    manager.shift_priority(index, delta)?;
    for (position, entry) in manager.mods.iter().enumerate() {
        println!("{:>3} {}", position + 1, entry.dir_name());
    }
    Ok(())
}

fn run_loader(config: &AppConfig, global: &GlobalOptions, command: LoaderCommand) -> Result<()> {
    let root = resolve_root(config, global)?;
    match command {
        LoaderCommand::Status => {
            if !loader::is_installed(&root) {
                println!("DivaModLoader is not installed at {}.", root.display());
                println!("Run 'divaforge loader install' to set it up.");
                return Ok(());
            }
            let info = loader::info(&root)?;
            println!("DivaModLoader {}", info.version);
            println!("Enabled: {}", if info.enabled { "yes" } else { "no" });
            println!("Mods folder: {}", info.mods_dir.display());
            Ok(())
        }
        LoaderCommand::Check => {
            let (latest, _) = loader::check_latest()?;
            if !loader::is_installed(&root) {
                println!("DivaModLoader is not installed; {latest} is available.");
                return Ok(());
            }
            let info = loader::info(&root)?;
            if info.version >= latest {
                println!("DivaModLoader {} is up to date.", info.version);
            } else {
                println!(
                    "DivaModLoader {} is installed; {latest} is available.",
                    info.version
                );
            }
            Ok(())
        }
        LoaderCommand::Enable => set_loader(config, global, true),
        LoaderCommand::Disable => set_loader(config, global, false),
        LoaderCommand::Install => {
            let version = loader::install(&root)?;
            println!("Installed DivaModLoader {version}");
            Ok(())
        }
    }
}

fn set_loader(config: &AppConfig, global: &GlobalOptions, enabled: bool) -> Result<()> {
    let mut manager = open_manager(config, global)?;
    manager.set_loader_enabled(enabled)?;
    println!(
        "Mod loading {}",
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

fn run_backup(config: &AppConfig, global: &GlobalOptions, command: BackupCommand) -> Result<()> {
    match command {
        BackupCommand::Save { kind, output } => {
            let root = resolve_root(config, global)?;
            let user = game::steam_user()
                .context("no Steam user found; is Steam installed and logged in?")?;
            let save_dir = game::save_data_dir(&root, kind.vendor_dir(), &user.id64);
            let output = match output {
                Some(dir) => dir,
                None => config::default_backup_dir()?,
            };
            let archive = backup::create_backup(&save_dir, &output, kind, &user.id64)?;
            println!(
                "Backed up {} save data to {}",
                kind.display_name(),
                archive.display()
            );
            Ok(())
        }
        BackupCommand::Restore { archive } => {
            let meta = backup::inspect_backup(&archive)?;
            let kind = meta
                .save_kind()
                .with_context(|| format!("backup has unknown save type {:?}", meta.kind))?;
            let root = resolve_root(config, global)?;
            let user = game::steam_user()
                .context("no Steam user found; is Steam installed and logged in?")?;
            if meta.steam_id != user.id64 {
                eprintln!(
                    "note: backup was taken for Steam user {}, restoring into {}",
                    meta.steam_id, user.id64
                );
            }
            let save_dir = game::save_data_dir(&root, kind.vendor_dir(), &user.id64);
            backup::restore_backup(&archive, &save_dir)?;
            println!(
                "Restored {} save data into {}",
                kind.display_name(),
                save_dir.display()
            );
            Ok(())
        }
        BackupCommand::List { dir } => {
            let dir = match dir {
                Some(dir) => dir,
                None => config::default_backup_dir()?,
            };
            list_backups(global, &dir)
        }
    }
}

#[derive(Serialize)]
struct BackupListItem {
    path: String,
    kind: Option<String>,
    steam_id: Option<String>,
    timestamp: Option<u64>,
}

fn list_backups(global: &GlobalOptions, dir: &Path) -> Result<()> {
    let archives = if dir.is_dir() {
        backup::list_backups(dir)?
    } else {
        Vec::new()
    };
    let items: Vec<BackupListItem> = archives
        .iter()
        .map(|path| match backup::inspect_backup(path) {
            Ok(meta) => BackupListItem {
                path: path.display().to_string(),
                kind: Some(meta.kind),
                steam_id: Some(meta.steam_id),
                timestamp: Some(meta.timestamp),
            },
            Err(_) => BackupListItem {
                path: path.display().to_string(),
                kind: None,
                steam_id: None,
                timestamp: None,
            },
        })
        .collect();

    match global.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        OutputFormat::Text => {
            if items.is_empty() {
                println!("No backups in {}.", dir.display());
                return Ok(());
            }
            for item in items {
                let kind = item.kind.as_deref().unwrap_or("unknown");
                let steam = item.steam_id.as_deref().unwrap_or("-");
                println!("{kind:<16} {steam:<18} {}", item.path);
            }
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct PathsOutput {
    install_dir: Option<String>,
    mods_dir: Option<String>,
    loader_installed: bool,
    config_path: String,
    backup_dir: String,
    error: Option<String>,
}

fn list_paths(config: &AppConfig, global: &GlobalOptions) -> Result<()> {
    let resolved = resolve_root(config, global);
    let (install_dir, error) = match &resolved {
        Ok(path) => (Some(path.display().to_string()), None),
        Err(err) => (None, Some(err.to_string())),
    };
    let (loader_installed, mods_dir) = match &resolved {
        Ok(root) if loader::is_installed(root) => {
            let info = loader::info(root)?;
            (true, Some(info.mods_dir.display().to_string()))
        }
        _ => (false, None),
    };
    let output = PathsOutput {
        install_dir,
        mods_dir,
        loader_installed,
        config_path: config::config_path()?.display().to_string(),
        backup_dir: config::default_backup_dir()?.display().to_string(),
        error,
    };

    match global.format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            match &output.install_dir {
                Some(dir) => println!("Game root: {dir}"),
                None => println!("Game root: not found"),
            }
            println!(
                "Loader: {}",
                if output.loader_installed {
                    "installed"
                } else {
                    "not installed"
                }
            );
            if let Some(mods) = &output.mods_dir {
                println!("Mods folder: {mods}");
            }
            println!("Config: {}", output.config_path);
            println!("Backups: {}", output.backup_dir);
            if let Some(error) = output.error {
                println!("Warning: {error}");
            }
        }
    }

    Ok(())
}

fn set_game_dir(mut config: AppConfig, path: &Path) -> Result<()> {
    if !game::looks_like_install_dir(path) {
        eprintln!(
            "note: {} does not look like a {} install",
            path.display(),
            game::GAME_NAME
        );
    }
    config.set_install_dir(path);
    config.save()?;
    println!("Game root set to {}", path.display());
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn print_help() {
    println!("divaforge v{}", env!("CARGO_PKG_VERSION"));
    println!("Usage:");
    println!("  divaforge mods [--check]                 List installed mods");
    println!("  divaforge search <query>                 Search the mod databases");
    println!("  divaforge install <origin> <id> [cat]    Install a mod by id");
    println!("  divaforge import <archive>...            Install local archive files");
    println!("  divaforge remove <mod>                   Delete an installed mod");
    println!("  divaforge update <mod> | --all           Reinstall outdated mods");
    println!("  divaforge enable|disable <mod>           Toggle a mod");
    println!("  divaforge priority <mod> <up|down|top|bottom>");
    println!("  divaforge loader <status|check|enable|disable|install>");
    println!("  divaforge backup save <vanilla|songlimitpatch>");
    println!("  divaforge backup restore <archive>");
    println!("  divaforge backup list                    List save-data backups");
    println!("  divaforge paths                          Show resolved paths");
    println!("  divaforge set-game-dir <path>            Pin the game root");
    println!();
    println!("Global options:");
    println!("  --format <json|text>                     Output format for list commands");
    println!("  --game-dir <path>                        Override the game root for this run");
    println!("  -h, --help                               Show help");
    println!("  -V, --version                            Show version");
    println!();
    println!("Command options:");
    println!("  --no-thumbnail                           Skip the preview image download");
    println!("  --origin <key>                           Restrict search to one database");
    println!("  --check, -c                              Query origins while listing mods");
    println!();
    println!("Backup options:");
    println!("  --output <dir>                           Where 'backup save' writes");
    println!("  --dir <dir>                              Where 'backup list' looks");
}
