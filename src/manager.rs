use crate::assembly::{AssemblyState, AssemblySwitch, SwitchOutcome};
use crate::catalog::{self, CatalogCache, RefreshOutcome};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::game::GamePaths;
use crate::http::HttpClient;
use crate::installer::{InstallOutcome, InstallRequest, Installer};
use crate::launch::{ApiInstallOutcome, LaunchCoordinator, LaunchReport, ProcessLauncher};
use crate::ledger::{Ledger, UNTRACKED_VERSION};
use crate::library::{BatchReport, Library, Toggle};
use crate::modlinks::ModDescriptor;
use crate::packs::{Pack, PackRegistry};
use crate::reconcile::{self, ReconcileReport};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing::{info, instrument, warn};

/// An installed mod whose version differs from the catalog's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutdatedMod {
    pub name: String,
    pub installed: String,
    pub available: String,
}

/// The stores of the selected game directory. Shared so every operation goes
/// through the same per-file locks.
struct GameContext {
    paths: GamePaths,
    library: Library,
}

impl GameContext {
    fn new(paths: GamePaths) -> Self {
        let library = Library::new(
            paths.mods_cache_dir.clone(),
            paths.ledger_path.clone(),
            paths.packs_path.clone(),
        );
        Self { paths, library }
    }
}

/// Entry point for a presentation layer: every operation it may invoke.
pub struct ModManager {
    data_dir: PathBuf,
    config: Mutex<AppConfig>,
    http: Arc<dyn HttpClient>,
    launcher: Arc<dyn ProcessLauncher>,
    catalog: CatalogCache,
    game: RwLock<Option<Arc<GameContext>>>,
}

impl ModManager {
    /// Loads the config under `data_dir` and reconciles the saved game
    /// directory, if any.
    pub fn open(
        data_dir: impl Into<PathBuf>,
        http: Arc<dyn HttpClient>,
        launcher: Arc<dyn ProcessLauncher>,
    ) -> Result<Self> {
        let data_dir = data_dir.into();
        let config = AppConfig::load_or_create(&data_dir)?;
        let catalog = CatalogCache::new(
            config.modlinks_url.clone(),
            data_dir.join("cache"),
            Duration::from_secs(config.catalog_refresh_hours.saturating_mul(3600)),
            Arc::clone(&http),
        );

        let game = match config.game_directory.as_deref() {
            Some(dir) => match GamePaths::detect(dir) {
                Ok(paths) => Some(Arc::new(GameContext::new(paths))),
                Err(err) => {
                    warn!(%err, "saved game directory is no longer valid");
                    None
                }
            },
            None => None,
        };

        let manager = Self {
            data_dir,
            config: Mutex::new(config),
            http,
            launcher,
            catalog,
            game: RwLock::new(game),
        };
        if let Some(context) = manager.game.read().clone() {
            if let Err(err) = reconcile::reconcile(&context.library) {
                warn!(%err, "startup reconcile failed");
            }
        }
        Ok(manager)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config(&self) -> AppConfig {
        self.config.lock().clone()
    }

    fn update_config(&self, change: impl FnOnce(&mut AppConfig)) -> Result<()> {
        let mut config = self.config.lock();
        let mut next = config.clone();
        change(&mut next);
        next.save(&self.data_dir)?;
        *config = next;
        Ok(())
    }

    fn context(&self) -> Result<Arc<GameContext>> {
        self.game.read().clone().ok_or(Error::GameDirectoryNotSet)
    }

    pub fn game_directory(&self) -> Option<PathBuf> {
        self.game
            .read()
            .as_ref()
            .map(|context| context.paths.game_root.clone())
    }

    pub fn game_paths(&self) -> Result<GamePaths> {
        Ok(self.context()?.paths.clone())
    }

    /// Validates and remembers `dir`, then reconciles its mods folder.
    #[instrument(skip(self, dir), fields(dir = %dir.display()))]
    pub fn select_game_directory(&self, dir: &Path) -> Result<ReconcileReport> {
        let paths = GamePaths::detect(dir)?;
        self.update_config(|config| config.game_directory = Some(paths.game_root.clone()))?;
        let context = Arc::new(GameContext::new(paths));
        *self.game.write() = Some(Arc::clone(&context));
        info!("game directory selected");
        reconcile::reconcile(&context.library)
    }

    pub fn reconcile(&self) -> Result<ReconcileReport> {
        reconcile::reconcile(&self.context()?.library)
    }

    pub fn refresh_catalog(&self) -> Result<RefreshOutcome> {
        self.catalog.refresh()
    }

    pub fn catalog(&self) -> Arc<Vec<ModDescriptor>> {
        self.catalog.mods()
    }

    pub fn catalog_raw(&self) -> Arc<str> {
        self.catalog.get_raw()
    }

    /// Installed mods whose version string differs from the catalog's.
    /// Folders adopted without a known version are never reported.
    pub fn outdated_mods(&self) -> Result<Vec<OutdatedMod>> {
        let ledger = self.installed_mods()?;
        let mods = self.catalog();
        let outdated = ledger
            .mods()
            .iter()
            .filter(|(_, record)| record.version != UNTRACKED_VERSION)
            .filter_map(|(name, record)| {
                let descriptor = catalog::find(&mods, name)?;
                (descriptor.version != record.version).then(|| OutdatedMod {
                    name: name.clone(),
                    installed: record.version.clone(),
                    available: descriptor.version.clone(),
                })
            })
            .collect();
        Ok(outdated)
    }

    pub fn ensure_mods_dir(&self) -> Result<PathBuf> {
        self.context()?.library.ensure_mods_root()
    }

    pub fn installed_mods(&self) -> Result<Ledger> {
        Ok(self.context()?.library.installed())
    }

    #[instrument(skip(self, request), fields(mod_name = %request.name))]
    pub fn install(&self, request: &InstallRequest) -> Result<InstallOutcome> {
        let context = self.context()?;
        Installer::new(self.http.as_ref(), &context.library).install(request)
    }

    /// Installs `name` with its dependencies as listed in the current catalog.
    pub fn install_from_catalog(&self, name: &str) -> Result<InstallOutcome> {
        let mods = self.catalog();
        let request = InstallRequest::from_catalog(&mods, name)?;
        self.install(&request)
    }

    #[instrument(skip(self, also_enable))]
    pub fn set_enabled(&self, name: &str, enabled: bool, also_enable: &[String]) -> Result<()> {
        self.context()?
            .library
            .set_enabled(name, enabled, also_enable)
    }

    pub fn batch_set_enabled(&self, changes: &[Toggle]) -> Result<BatchReport> {
        self.context()?.library.batch_set_enabled(changes)
    }

    #[instrument(skip(self))]
    pub fn uninstall(&self, name: &str) -> Result<()> {
        self.context()?.library.uninstall(name)
    }

    pub fn batch_uninstall(&self, names: &[String]) -> Result<BatchReport> {
        self.context()?.library.batch_uninstall(names)
    }

    pub fn packs(&self) -> Result<PackRegistry> {
        Ok(self.context()?.library.packs())
    }

    #[instrument(skip(self, description, author, members))]
    pub fn create_pack(
        &self,
        name: &str,
        description: &str,
        author: &str,
        members: Option<Vec<String>>,
    ) -> Result<Pack> {
        self.context()?
            .library
            .create_pack(name, description, author, members)
    }

    #[instrument(skip(self))]
    pub fn delete_pack(&self, name: &str) -> Result<()> {
        self.context()?.library.delete_pack(name)
    }

    pub fn export_pack(&self, name: &str) -> Result<String> {
        self.context()?.library.export_pack(name)
    }

    pub fn import_pack(&self, code: &str) -> Result<Pack> {
        self.context()?.library.import_pack(code)
    }

    #[instrument(skip(self))]
    pub fn set_active_pack(&self, name: Option<&str>) -> Result<()> {
        self.context()?.library.set_active_pack(name)
    }

    pub fn vanilla_mode(&self) -> bool {
        self.config.lock().vanilla_mode
    }

    /// Persists the flag and, with a game selected, switches the assembly.
    #[instrument(skip(self))]
    pub fn set_vanilla_mode(&self, vanilla: bool) -> Result<Option<SwitchOutcome>> {
        self.update_config(|config| config.vanilla_mode = vanilla)?;
        let Some(context) = self.game.read().clone() else {
            return Ok(None);
        };
        let target = if vanilla {
            AssemblyState::Vanilla
        } else {
            AssemblyState::Modded
        };
        AssemblySwitch::new(&context.paths).switch_to(target).map(Some)
    }

    pub fn assembly_state(&self) -> Result<AssemblyState> {
        AssemblySwitch::new(&self.context()?.paths).detect()
    }

    /// Downloads and installs the modding API even if it looks present.
    #[instrument(skip(self))]
    pub fn install_api(&self) -> Result<ApiInstallOutcome> {
        let context = self.context()?;
        let apilinks_url = self.config.lock().apilinks_url.clone();
        let coordinator = LaunchCoordinator {
            http: self.http.as_ref(),
            paths: &context.paths,
            launcher: self.launcher.as_ref(),
            apilinks_url: &apilinks_url,
        };
        coordinator.ensure_api(&AssemblySwitch::new(&context.paths), true)
    }

    #[instrument(skip(self))]
    pub fn launch(&self) -> Result<LaunchReport> {
        let context = self.context()?;
        let (vanilla, apilinks_url) = {
            let config = self.config.lock();
            (config.vanilla_mode, config.apilinks_url.clone())
        };
        let coordinator = LaunchCoordinator {
            http: self.http.as_ref(),
            paths: &context.paths,
            launcher: self.launcher.as_ref(),
            apilinks_url: &apilinks_url,
        };
        let ledger = context.library.installed();
        coordinator.launch(vanilla, &ledger)
    }
}
