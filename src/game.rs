use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const GAME_NAME: &str = "Hatsune Miku Project DIVA Mega Mix Plus";
pub const STEAM_APP_ID: &str = "1761390";
const GAME_BINARY: &str = "DivaMegaMix.exe";

/// Overrides every detection path when set.
pub const INSTALL_DIR_ENV: &str = "DIVAFORGE_INSTALL_DIR";

#[derive(Debug, Clone)]
pub struct SteamUser {
    pub id64: String,
    pub persona_name: String,
}

pub fn env_override() -> Option<PathBuf> {
    std::env::var_os(INSTALL_DIR_ENV).map(PathBuf::from)
}

/// Walks the local Steam libraries looking for the game folder.
pub fn detect_install_dir() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Some(home) = dirs_home() {
        candidates.push(home.join(".local/share/Steam"));
        candidates.push(home.join(".steam/steam"));
    }

    let mut libraries = Vec::new();
    for base in candidates {
        for vdf in [
            base.join("config/libraryfolders.vdf"),
            base.join("steamapps/libraryfolders.vdf"),
        ] {
            if vdf.exists() {
                if let Ok(paths) = parse_steam_library_paths(&vdf) {
                    libraries.extend(paths);
                }
            }
        }
        libraries.push(base);
    }

    libraries
        .into_iter()
        .map(|lib| lib.join("steamapps/common").join(GAME_NAME))
        .find(|candidate| candidate.exists())
}

pub fn looks_like_install_dir(path: &Path) -> bool {
    path.join(GAME_BINARY).is_file()
}

/// Proton save location for one save-data flavor (`SEGA` for vanilla, `DIVA`
/// for the song limit patch), relative to the game's install directory.
pub fn save_data_dir(install_dir: &Path, vendor_dir: &str, id64: &str) -> PathBuf {
    let raw = install_dir
        .join("../../compatdata")
        .join(STEAM_APP_ID)
        .join("pfx/drive_c/users/steamuser/AppData/Roaming")
        .join(vendor_dir)
        .join("Project DIVA MEGA39's/Steam")
        .join(id64);
    raw.canonicalize().unwrap_or(raw)
}

/// Most recently logged-in Steam user, from `loginusers.vdf`.
pub fn steam_user() -> Option<SteamUser> {
    let path = dirs_home()?.join(".steam/steam/config/loginusers.vdf");
    parse_login_users(&path).ok()?
}

fn parse_login_users(path: &Path) -> Result<Option<SteamUser>> {
    let raw = fs::read_to_string(path).context("read loginusers.vdf")?;
    let mut current_id: Option<String> = None;
    let mut persona: Option<String> = None;
    let mut most_recent = false;

    for line in raw.lines() {
        let parts: Vec<&str> = line.trim().split('"').collect();
        match parts.as_slice() {
            // Block header: a lone quoted steam id64.
            ["", id, ""] if id.chars().all(|c| c.is_ascii_digit()) => {
                current_id = Some(id.to_string());
                persona = None;
                most_recent = false;
            }
            ["", key, _, value, ""] => {
                match *key {
                    "PersonaName" => persona = Some(value.to_string()),
                    "MostRecent" => most_recent = *value == "1",
                    _ => {}
                }
                if most_recent {
                    if let Some(id64) = &current_id {
                        return Ok(Some(SteamUser {
                            id64: id64.clone(),
                            persona_name: persona.clone().unwrap_or_default(),
                        }));
                    }
                }
            }
            _ => {}
        }
    }
    Ok(None)
}

fn parse_steam_library_paths(path: &Path) -> Result<Vec<PathBuf>> {
    let raw = fs::read_to_string(path).context("read libraryfolders.vdf")?;
    let mut paths = Vec::new();

    for line in raw.lines() {
        let line = line.trim();
        if !line.contains("\"path\"") {
            continue;
        }

        let parts: Vec<&str> = line.split('"').collect();
        if parts.len() >= 4 {
            let path = parts[3].replace("\\\\", "\\");
            paths.push(PathBuf::from(path));
        }
    }

    Ok(paths)
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn parses_library_paths_from_vdf() {
        let tmp = tempfile::tempdir().unwrap();
        let vdf = tmp.path().join("libraryfolders.vdf");
        fs::write(
            &vdf,
            concat!(
                "\"libraryfolders\"\n{\n",
                "\t\"0\"\n\t{\n\t\t\"path\"\t\t\"/home/user/.local/share/Steam\"\n\t}\n",
                "\t\"1\"\n\t{\n\t\t\"path\"\t\t\"/mnt/games/SteamLibrary\"\n\t}\n",
                "}\n"
            ),
        )
        .unwrap();

        let paths = parse_steam_library_paths(&vdf).unwrap();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("/home/user/.local/share/Steam"),
                PathBuf::from("/mnt/games/SteamLibrary"),
            ]
        );
    }

    #[test]
    fn picks_most_recent_steam_user() {
        let tmp = tempfile::tempdir().unwrap();
        let vdf = tmp.path().join("loginusers.vdf");
        fs::write(
            &vdf,
            concat!(
                "\"users\"\n{\n",
                "\t\"76561198000000001\"\n\t{\n",
                "\t\t\"PersonaName\"\t\t\"old account\"\n",
                "\t\t\"MostRecent\"\t\t\"0\"\n\t}\n",
                "\t\"76561198000000002\"\n\t{\n",
                "\t\t\"PersonaName\"\t\t\"miku fan\"\n",
                "\t\t\"MostRecent\"\t\t\"1\"\n\t}\n",
                "}\n"
            ),
        )
        .unwrap();

        let user = parse_login_users(&vdf).unwrap().unwrap();
        assert_eq!(user.id64, "76561198000000002");
        assert_eq!(user.persona_name, "miku fan");
    }

    #[test]
    fn no_most_recent_user_means_none() {
        let tmp = tempfile::tempdir().unwrap();
        let vdf = tmp.path().join("loginusers.vdf");
        fs::write(
            &vdf,
            "\"users\"\n{\n\t\"76561198000000001\"\n\t{\n\t\t\"MostRecent\"\t\t\"0\"\n\t}\n}\n",
        )
        .unwrap();
        assert!(parse_login_users(&vdf).unwrap().is_none());
    }

    #[test]
    fn install_dir_check_requires_game_binary() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(!looks_like_install_dir(tmp.path()));
        fs::write(tmp.path().join(GAME_BINARY), b"MZ").unwrap();
        assert!(looks_like_install_dir(tmp.path()));
    }
}
