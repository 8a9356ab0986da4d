use crate::assembly::{AssemblyState, AssemblySwitch};
use crate::catalog::FETCH_TIMEOUT;
use crate::error::{Error, IoContext, Result};
use crate::game::{GamePaths, STEAM_APP_ID};
use crate::http::HttpClient;
use crate::ledger::Ledger;
use crate::modlinks;
use crate::payload::{self, PayloadKind};
use crate::store::write_atomic;
use serde::Serialize;
use std::{
    fs, io,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// What a launcher needs to start the game.
#[derive(Debug, Clone)]
pub struct LaunchTarget {
    pub game_root: PathBuf,
    pub executable: PathBuf,
    pub steam_app_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchMethod {
    /// Handed to Steam through the OS URL handler.
    Steam,
    /// Spawned the executable ourselves.
    Direct,
}

pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, target: &LaunchTarget) -> Result<LaunchMethod>;
}

/// Prefers `steam://rungameid/…` so Steam owns the process, then falls back
/// to running the executable directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl ProcessLauncher for SystemLauncher {
    fn launch(&self, target: &LaunchTarget) -> Result<LaunchMethod> {
        let url = format!("steam://rungameid/{}", target.steam_app_id);
        for (command, args) in url_openers(&url) {
            match Command::new(command)
                .args(&args)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
            {
                Ok(status) if status.success() => {
                    info!(command, "launched through steam");
                    return Ok(LaunchMethod::Steam);
                }
                Ok(status) => debug!(command, %status, "url opener refused"),
                Err(err) => debug!(command, %err, "url opener unavailable"),
            }
        }

        let bundle = target.executable.extension().and_then(|ext| ext.to_str()) == Some("app");
        let mut command = if bundle {
            let mut open = Command::new("open");
            open.arg(&target.executable);
            open
        } else {
            Command::new(&target.executable)
        };
        command
            .current_dir(&target.game_root)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| Error::Launch(format!("{}: {err}", target.executable.display())))?;
        info!(path = %target.executable.display(), "launched executable directly");
        Ok(LaunchMethod::Direct)
    }
}

fn url_openers(url: &str) -> Vec<(&'static str, Vec<String>)> {
    if cfg!(target_os = "windows") {
        vec![(
            "cmd",
            vec!["/C".into(), "start".into(), String::new(), url.into()],
        )]
    } else if cfg!(target_os = "macos") {
        vec![("open", vec![url.into()])]
    } else {
        vec![
            ("xdg-open", vec![url.into()]),
            ("gio", vec!["open".into(), url.into()]),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApiInstallOutcome {
    /// False when the API was already present.
    pub installed: bool,
    pub version: Option<String>,
    /// Archive came from the local content-addressed cache.
    pub from_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchReport {
    pub assembly: AssemblyState,
    pub api: Option<ApiInstallOutcome>,
    pub mods_copied: usize,
    pub method: LaunchMethod,
}

/// Brings one game directory into a launchable state and starts it.
pub struct LaunchCoordinator<'a> {
    pub http: &'a dyn HttpClient,
    pub paths: &'a GamePaths,
    pub launcher: &'a dyn ProcessLauncher,
    pub apilinks_url: &'a str,
}

impl LaunchCoordinator<'_> {
    /// Any failing step aborts the launch. Work already done (API files,
    /// copied mods) is left in place.
    pub fn launch(&self, vanilla: bool, ledger: &Ledger) -> Result<LaunchReport> {
        let switch = AssemblySwitch::new(self.paths);
        let wanted = if vanilla {
            AssemblyState::Vanilla
        } else {
            AssemblyState::Modded
        };
        let switched = switch.switch_to(wanted)?;
        info!(from = %switched.from, to = %switched.to, "assembly checked before launch");

        let mut api = None;
        let mut mods_copied = 0;
        if !vanilla {
            api = Some(self.ensure_api(&switch, false)?);
            mods_copied = materialize_enabled(self.paths, ledger)?;
        }

        let target = LaunchTarget {
            game_root: self.paths.game_root.clone(),
            executable: self.paths.executable.clone(),
            steam_app_id: STEAM_APP_ID.to_string(),
        };
        let method = self.launcher.launch(&target)?;
        Ok(LaunchReport {
            assembly: switch.detect()?,
            api,
            mods_copied,
            method,
        })
    }

    /// Installs the modding API over the managed folder unless its marker
    /// files are already there (or `force` is set).
    pub fn ensure_api(&self, switch: &AssemblySwitch, force: bool) -> Result<ApiInstallOutcome> {
        if self.paths.api_installed() && !force {
            debug!("modding api already installed");
            return Ok(ApiInstallOutcome::default());
        }

        let raw = self
            .http
            .get(self.apilinks_url, Some(FETCH_TIMEOUT))
            .map_err(|err| Error::ApiUnavailable(format!("fetch api catalog: {err}")))?;
        let manifest = modlinks::parse_api_links(&String::from_utf8_lossy(&raw))
            .ok_or_else(|| Error::ApiUnavailable("api catalog is malformed".to_string()))?;
        let link = manifest.link_for_current_platform().ok_or_else(|| {
            Error::ApiUnavailable(format!(
                "no api download for {}",
                modlinks::current_platform()
            ))
        })?;

        let (archive, from_cache) = self.api_archive(&link.url, &link.sha256)?;
        if payload::classify("modding api", &archive)? != PayloadKind::Zip {
            return Err(Error::UnsupportedPayload {
                name: "modding api".to_string(),
            });
        }

        if switch.detect()? == AssemblyState::Vanilla {
            switch.switch_to(AssemblyState::Modded)?;
        }
        switch.preserve_vanilla()?;
        let entries = payload::extract_zip("modding api", &archive, &self.paths.managed_dir)?;
        let state = switch.detect()?;
        info!(version = %manifest.version, entries, %state, "modding api installed");

        Ok(ApiInstallOutcome {
            installed: true,
            version: Some(manifest.version),
            from_cache,
        })
    }

    /// Archives are cached by their hash; a cached copy that no longer
    /// verifies is downloaded again.
    fn api_archive(&self, url: &str, sha256: &str) -> Result<(Vec<u8>, bool)> {
        let cached_path = self
            .paths
            .api_cache_dir
            .join(format!("{}.zip", sha256.to_ascii_lowercase()));
        match fs::read(&cached_path) {
            Ok(bytes) if payload::verify_sha256("modding api", &bytes, Some(sha256)).is_ok() => {
                debug!(path = %cached_path.display(), "using cached api archive");
                return Ok((bytes, true));
            }
            Ok(_) => warn!(path = %cached_path.display(), "cached api archive is corrupt"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %cached_path.display(), %err, "cached api archive unreadable"),
        }

        info!(url, "downloading modding api");
        let bytes = self.http.get(url, None)?;
        payload::verify_sha256("modding api", &bytes, Some(sha256))?;
        write_atomic(&cached_path, &bytes).at(&cached_path)?;
        Ok((bytes, false))
    }
}

/// Replaces the active mods folder with a copy of every enabled mod.
pub fn materialize_enabled(paths: &GamePaths, ledger: &Ledger) -> Result<usize> {
    let active = &paths.active_mods_dir;
    match fs::remove_dir_all(active) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(Error::io(active, err)),
    }
    fs::create_dir_all(active).at(active)?;

    let mut copied = 0;
    for name in ledger.enabled_names() {
        let source = paths.mod_dir(&name);
        if !source.is_dir() {
            warn!(mod_name = %name, "enabled mod has no folder, skipping");
            continue;
        }
        copy_recursive(&source, &active.join(&name))?;
        copied += 1;
    }
    info!(copied, path = %active.display(), "active mods folder rebuilt");
    Ok(copied)
}

fn copy_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).at(dst)?;
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|err| {
            let path = err.path().unwrap_or(src).to_path_buf();
            Error::io(path, io::Error::from(err))
        })?;
        let relative = match entry.path().strip_prefix(src) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).at(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).at(parent)?;
            }
            fs::copy(entry.path(), &target).at(&target)?;
        }
    }
    Ok(())
}
