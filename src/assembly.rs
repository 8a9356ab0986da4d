use crate::error::{Error, IoContext, Result};
use crate::game::GamePaths;
use crate::store::JsonStore;
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{debug, info, warn};

const VANILLA_SUFFIX: &str = ".v";
const MODDED_SUFFIX: &str = ".m";

/// Which build of the managed assembly is currently active.
///
/// Encoded on disk by which backup exists: a vanilla backup means the active
/// file is modded and vice versa. No backup at all means the game was never
/// switched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssemblyState {
    Unconfigured,
    Modded,
    Vanilla,
}

impl fmt::Display for AssemblyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AssemblyState::Unconfigured => "unconfigured",
            AssemblyState::Modded => "modded",
            AssemblyState::Vanilla => "vanilla",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AssemblyRecord {
    #[serde(default)]
    state: Option<AssemblyState>,
    #[serde(default)]
    updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwitchOutcome {
    pub from: AssemblyState,
    pub to: AssemblyState,
    pub renamed: usize,
}

/// Rename-based switch between the modded and vanilla assembly.
pub struct AssemblySwitch {
    active: PathBuf,
    vanilla_backup: PathBuf,
    modded_backup: PathBuf,
    record: JsonStore<AssemblyRecord>,
}

impl AssemblySwitch {
    pub fn new(paths: &GamePaths) -> Self {
        let active = paths.assembly_path();
        Self {
            vanilla_backup: with_suffix(&active, VANILLA_SUFFIX),
            modded_backup: with_suffix(&active, MODDED_SUFFIX),
            active,
            record: JsonStore::new(paths.assembly_state_path.clone()),
        }
    }

    pub fn active_path(&self) -> &Path {
        &self.active
    }

    /// Reads the state from disk, repairing a doubled backup pair when it can
    /// tell which copy is stale. The file layout always wins over the record.
    pub fn detect(&self) -> Result<AssemblyState> {
        let mut record = self.record.edit();
        let remembered = record.state;

        let state = match (self.vanilla_backup.exists(), self.modded_backup.exists()) {
            (true, false) => AssemblyState::Modded,
            (false, true) => AssemblyState::Vanilla,
            (false, false) => AssemblyState::Unconfigured,
            (true, true) => self.repair(remembered)?,
        };

        if remembered != Some(state) {
            if let Some(remembered) = remembered {
                warn!(%remembered, actual = %state, "assembly record out of date");
            }
            record.state = Some(state);
            record.updated_at = OffsetDateTime::now_utc().format(&Rfc3339).ok();
            record.save()?;
        }
        Ok(state)
    }

    /// Both backups present. With an active file, the backup identical to it
    /// is a leftover and is dropped. Without one, a switch stopped between its
    /// two renames: the last recorded state says which way it was going, and
    /// the switch is finished. Nothing else is ever deleted.
    fn repair(&self, remembered: Option<AssemblyState>) -> Result<AssemblyState> {
        let Some(active) = read_if_exists(&self.active)? else {
            return self.finish_interrupted_switch(remembered);
        };

        let (state, duplicate) = if same_contents(&self.modded_backup, &active)? {
            (AssemblyState::Modded, &self.modded_backup)
        } else if same_contents(&self.vanilla_backup, &active)? {
            (AssemblyState::Vanilla, &self.vanilla_backup)
        } else {
            return Err(Error::AssemblyConflict(format!(
                "both {} and {} exist and neither matches the active assembly",
                self.vanilla_backup.display(),
                self.modded_backup.display()
            )));
        };
        fs::remove_file(duplicate).at(duplicate)?;
        info!(path = %duplicate.display(), %state, "removed duplicate assembly backup");
        Ok(state)
    }

    fn finish_interrupted_switch(
        &self,
        remembered: Option<AssemblyState>,
    ) -> Result<AssemblyState> {
        let (restore, state) = match remembered {
            Some(AssemblyState::Modded) => (&self.vanilla_backup, AssemblyState::Vanilla),
            Some(AssemblyState::Vanilla) => (&self.modded_backup, AssemblyState::Modded),
            _ => {
                return Err(Error::AssemblyConflict(format!(
                    "{} is missing and both backups exist",
                    self.active.display()
                )))
            }
        };
        fs::rename(restore, &self.active).at(restore)?;
        warn!(path = %restore.display(), %state, "finished interrupted assembly switch");
        Ok(state)
    }

    /// Switches to `target`. Already there, or never configured, is a no-op.
    ///
    /// A missing file on either rename is skipped so the second rename still
    /// runs; any other failure on the first rename aborts before the active
    /// file could be overwritten.
    pub fn switch_to(&self, target: AssemblyState) -> Result<SwitchOutcome> {
        let from = self.detect()?;
        let unconfigured = from == AssemblyState::Unconfigured;
        if from == target || unconfigured || target == AssemblyState::Unconfigured {
            debug!(%from, %target, "assembly switch not needed");
            return Ok(SwitchOutcome {
                from,
                to: from,
                renamed: 0,
            });
        }

        let (park, restore) = match target {
            AssemblyState::Vanilla => (&self.modded_backup, &self.vanilla_backup),
            _ => (&self.vanilla_backup, &self.modded_backup),
        };

        let mut renamed = 0;
        match fs::rename(&self.active, park) {
            Ok(()) => renamed += 1,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(path = %self.active.display(), "active assembly missing, nothing to park");
            }
            Err(err) => return Err(Error::io(&self.active, err)),
        }
        match fs::rename(restore, &self.active) {
            Ok(()) => renamed += 1,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(path = %restore.display(), "assembly backup missing, nothing to restore");
            }
            Err(err) => return Err(Error::io(restore, err)),
        }

        let to = self.detect()?;
        info!(%from, %to, renamed, "assembly switched");
        Ok(SwitchOutcome { from, to, renamed })
    }

    /// Before the modding API overwrites a never-switched game, keep the
    /// current assembly as the vanilla backup.
    pub fn preserve_vanilla(&self) -> Result<()> {
        if self.detect()? != AssemblyState::Unconfigured || !self.active.is_file() {
            return Ok(());
        }
        fs::copy(&self.active, &self.vanilla_backup).at(&self.vanilla_backup)?;
        info!(path = %self.vanilla_backup.display(), "vanilla assembly backed up");
        Ok(())
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(suffix);
    PathBuf::from(raw)
}

fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(Error::io(path, err)),
    }
}

fn same_contents(path: &Path, expected: &[u8]) -> Result<bool> {
    Ok(read_if_exists(path)?.as_deref() == Some(expected))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, GamePaths, AssemblySwitch) {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("Hollow Knight");
        fs::create_dir_all(root.join("hollow_knight_Data/Managed")).unwrap();
        let paths = GamePaths::new(&root);
        let switch = AssemblySwitch::new(&paths);
        (tmp, paths, switch)
    }

    #[test]
    fn unconfigured_game_is_never_switched() {
        let (_tmp, paths, switch) = setup();
        fs::write(paths.assembly_path(), b"vanilla").unwrap();

        let outcome = switch.switch_to(AssemblyState::Vanilla).unwrap();
        assert_eq!(outcome.renamed, 0);
        assert_eq!(outcome.to, AssemblyState::Unconfigured);
        assert_eq!(fs::read(paths.assembly_path()).unwrap(), b"vanilla");
    }

    #[test]
    fn round_trip_between_variants() {
        let (_tmp, paths, switch) = setup();
        fs::write(paths.assembly_path(), b"modded").unwrap();
        fs::write(with_suffix(&paths.assembly_path(), VANILLA_SUFFIX), b"vanilla").unwrap();

        let outcome = switch.switch_to(AssemblyState::Vanilla).unwrap();
        assert_eq!(outcome.from, AssemblyState::Modded);
        assert_eq!(outcome.to, AssemblyState::Vanilla);
        assert_eq!(outcome.renamed, 2);
        assert_eq!(fs::read(paths.assembly_path()).unwrap(), b"vanilla");

        switch.switch_to(AssemblyState::Modded).unwrap();
        assert_eq!(fs::read(paths.assembly_path()).unwrap(), b"modded");
        assert_eq!(switch.detect().unwrap(), AssemblyState::Modded);
    }

    #[test]
    fn doubled_backup_matching_active_is_removed() {
        let (_tmp, paths, switch) = setup();
        let active = paths.assembly_path();
        fs::write(&active, b"modded").unwrap();
        fs::write(with_suffix(&active, VANILLA_SUFFIX), b"vanilla").unwrap();
        fs::write(with_suffix(&active, MODDED_SUFFIX), b"modded").unwrap();

        assert_eq!(switch.detect().unwrap(), AssemblyState::Modded);
        assert!(!with_suffix(&active, MODDED_SUFFIX).exists());
        assert!(with_suffix(&active, VANILLA_SUFFIX).exists());
    }

    #[test]
    fn unresolvable_backup_pair_is_a_conflict() {
        let (_tmp, paths, switch) = setup();
        let active = paths.assembly_path();
        fs::write(&active, b"third").unwrap();
        fs::write(with_suffix(&active, VANILLA_SUFFIX), b"vanilla").unwrap();
        fs::write(with_suffix(&active, MODDED_SUFFIX), b"modded").unwrap();

        assert!(matches!(switch.detect(), Err(Error::AssemblyConflict(_))));
    }

    #[test]
    fn interrupted_switch_is_finished_without_deleting() {
        let (_tmp, paths, switch) = setup();
        let active = paths.assembly_path();
        fs::write(&active, b"modded").unwrap();
        fs::write(with_suffix(&active, VANILLA_SUFFIX), b"vanilla").unwrap();
        assert_eq!(switch.detect().unwrap(), AssemblyState::Modded);

        // First rename of a switch to vanilla landed, the second never ran.
        fs::rename(&active, with_suffix(&active, MODDED_SUFFIX)).unwrap();

        assert_eq!(switch.detect().unwrap(), AssemblyState::Vanilla);
        assert_eq!(fs::read(&active).unwrap(), b"vanilla");
        assert_eq!(fs::read(with_suffix(&active, MODDED_SUFFIX)).unwrap(), b"modded");
        assert!(!with_suffix(&active, VANILLA_SUFFIX).exists());
    }

    #[test]
    fn missing_active_without_record_is_a_conflict() {
        let (_tmp, paths, switch) = setup();
        let active = paths.assembly_path();
        fs::write(with_suffix(&active, VANILLA_SUFFIX), b"vanilla").unwrap();
        fs::write(with_suffix(&active, MODDED_SUFFIX), b"modded").unwrap();

        assert!(matches!(switch.detect(), Err(Error::AssemblyConflict(_))));
        assert!(with_suffix(&active, VANILLA_SUFFIX).exists());
        assert!(with_suffix(&active, MODDED_SUFFIX).exists());
    }

    #[test]
    fn differing_backups_are_never_deleted_on_record_alone() {
        let (_tmp, paths, switch) = setup();
        let active = paths.assembly_path();
        fs::write(&active, b"modded").unwrap();
        fs::write(with_suffix(&active, VANILLA_SUFFIX), b"vanilla").unwrap();
        assert_eq!(switch.detect().unwrap(), AssemblyState::Modded);
        fs::write(with_suffix(&active, MODDED_SUFFIX), b"older modded").unwrap();

        assert!(matches!(switch.detect(), Err(Error::AssemblyConflict(_))));
        assert!(with_suffix(&active, MODDED_SUFFIX).exists());
        assert!(with_suffix(&active, VANILLA_SUFFIX).exists());
    }

    #[test]
    fn preserve_vanilla_copies_only_when_unconfigured() {
        let (_tmp, paths, switch) = setup();
        let active = paths.assembly_path();
        fs::write(&active, b"vanilla").unwrap();

        switch.preserve_vanilla().unwrap();
        assert_eq!(fs::read(with_suffix(&active, VANILLA_SUFFIX)).unwrap(), b"vanilla");
        assert_eq!(switch.detect().unwrap(), AssemblyState::Modded);
    }
}
