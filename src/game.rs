use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

pub const GAME_NAME: &str = "Hollow Knight";
pub const STEAM_APP_ID: &str = "367520";
pub const ASSEMBLY_NAME: &str = "Assembly-CSharp.dll";
pub const PRIVATE_DIR_NAME: &str = "Soulforge";

const WINDOWS_EXE: &str = "hollow_knight.exe";
const LINUX_EXE: &str = "hollow_knight.x86_64";
const MAC_BUNDLE: &str = "hollow_knight.app";
const DATA_DIR: &str = "hollow_knight_Data";

/// Files whose presence means the modding API is installed in the managed dir.
pub const API_MARKER_FILES: [&str; 2] = ["MMHOOK_Assembly-CSharp.dll", "MMHOOK_PlayMaker.dll"];

/// Every path the core touches inside one game installation.
#[derive(Debug, Clone)]
pub struct GamePaths {
    pub game_root: PathBuf,
    pub managed_dir: PathBuf,
    pub executable: PathBuf,
    /// `<Managed>/Soulforge`: ledger, packs, caches.
    pub private_dir: PathBuf,
    /// One folder per installed mod.
    pub mods_cache_dir: PathBuf,
    /// What the modding API loads at startup; rebuilt before every launch.
    pub active_mods_dir: PathBuf,
    pub api_cache_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub packs_path: PathBuf,
    pub assembly_state_path: PathBuf,
}

impl GamePaths {
    pub fn new(game_root: &Path) -> Self {
        let managed_dir = managed_dir_for(game_root);
        let private_dir = managed_dir.join(PRIVATE_DIR_NAME);
        Self {
            game_root: game_root.to_path_buf(),
            executable: executable_for(game_root),
            mods_cache_dir: private_dir.join("mods"),
            active_mods_dir: managed_dir.join("Mods"),
            api_cache_dir: private_dir.join("api-cache"),
            ledger_path: private_dir.join("installedMods.json"),
            packs_path: private_dir.join("packs.json"),
            assembly_state_path: private_dir.join("assemblyState.json"),
            private_dir,
            managed_dir,
        }
    }

    /// Validates `game_root` before building its layout.
    pub fn detect(game_root: &Path) -> Result<Self> {
        if !game_root.is_dir() {
            return Err(Error::InvalidGameDirectory {
                path: game_root.to_path_buf(),
                reason: "not a directory".to_string(),
            });
        }
        if !looks_like_game_root(game_root) {
            return Err(Error::InvalidGameDirectory {
                path: game_root.to_path_buf(),
                reason: format!(
                    "directory must be named \"{GAME_NAME}\" or contain {GAME_NAME} game files"
                ),
            });
        }
        Ok(Self::new(game_root))
    }

    pub fn assembly_path(&self) -> PathBuf {
        self.managed_dir.join(ASSEMBLY_NAME)
    }

    pub fn mod_dir(&self, name: &str) -> PathBuf {
        self.mods_cache_dir.join(name)
    }

    pub fn api_installed(&self) -> bool {
        API_MARKER_FILES
            .iter()
            .all(|file| self.managed_dir.join(file).is_file())
    }
}

pub fn looks_like_game_root(path: &Path) -> bool {
    let named = path
        .file_name()
        .map(|name| name.to_string_lossy() == GAME_NAME)
        .unwrap_or(false);
    named
        || path.join(WINDOWS_EXE).exists()
        || path.join(LINUX_EXE).exists()
        || path.join(DATA_DIR).exists()
        || path.join(MAC_BUNDLE).exists()
}

fn managed_dir_for(game_root: &Path) -> PathBuf {
    let standard = game_root.join(DATA_DIR).join("Managed");
    let mac = game_root
        .join(MAC_BUNDLE)
        .join("Contents/Resources/Data/Managed");
    if standard.is_dir() {
        return standard;
    }
    if mac.is_dir() {
        return mac;
    }
    if cfg!(target_os = "macos") {
        mac
    } else {
        standard
    }
}

fn executable_for(game_root: &Path) -> PathBuf {
    let candidates = [
        game_root.join(WINDOWS_EXE),
        game_root.join(LINUX_EXE),
        game_root.join(MAC_BUNDLE),
    ];
    if let Some(found) = candidates.iter().find(|path| path.exists()) {
        return found.clone();
    }
    if cfg!(target_os = "windows") {
        game_root.join(WINDOWS_EXE)
    } else if cfg!(target_os = "macos") {
        game_root.join(MAC_BUNDLE)
    } else {
        game_root.join(LINUX_EXE)
    }
}
