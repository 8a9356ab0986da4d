use crate::error::{Error, Result};
use crate::ledger::Ledger;
use crate::packs::{self, Pack, PackRegistry};
use crate::store::{JsonStore, StoreGuard};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeSet,
    fs, io,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// One requested enable/disable change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toggle {
    pub name: String,
    pub enabled: bool,
}

impl Toggle {
    pub fn new(name: impl Into<String>, enabled: bool) -> Self {
        Self {
            name: name.into(),
            enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    pub name: String,
    pub error: String,
}

/// Per-item outcome of a batch operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<ItemError>,
    /// Active pack cleared by this batch, if any.
    pub pack_cleared: Option<String>,
}

impl BatchReport {
    fn fail(&mut self, name: &str, error: &Error) {
        self.failed += 1;
        self.errors.push(ItemError {
            name: name.to_string(),
            error: error.to_string(),
        });
    }
}

/// Installed-mods ledger and pack registry of one game directory.
///
/// Mutations that need both files lock the ledger first, then the registry.
pub struct Library {
    mods_root: PathBuf,
    ledger: JsonStore<Ledger>,
    packs: JsonStore<PackRegistry>,
}

impl Library {
    pub fn new(
        mods_root: impl Into<PathBuf>,
        ledger_path: impl Into<PathBuf>,
        packs_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            mods_root: mods_root.into(),
            ledger: JsonStore::new(ledger_path),
            packs: JsonStore::new(packs_path),
        }
    }

    pub fn mods_root(&self) -> &Path {
        &self.mods_root
    }

    pub fn mod_dir(&self, name: &str) -> PathBuf {
        self.mods_root.join(name)
    }

    pub fn ensure_mods_root(&self) -> Result<PathBuf> {
        fs::create_dir_all(&self.mods_root).map_err(|err| Error::io(&self.mods_root, err))?;
        Ok(self.mods_root.clone())
    }

    pub fn installed(&self) -> Ledger {
        self.ledger.read()
    }

    pub fn packs(&self) -> PackRegistry {
        self.packs.read()
    }

    pub(crate) fn ledger_store(&self) -> &JsonStore<Ledger> {
        &self.ledger
    }

    pub(crate) fn pack_store(&self) -> &JsonStore<PackRegistry> {
        &self.packs
    }

    /// Enables or disables one mod. Enabling also enables every installed
    /// name in `also_enable`, in the same write.
    pub fn set_enabled(&self, name: &str, enabled: bool, also_enable: &[String]) -> Result<()> {
        let mut ledger = self.ledger.edit();
        let record = ledger
            .get_mut(name)
            .ok_or_else(|| Error::ModNotInstalled(name.to_string()))?;
        record.enabled = enabled;

        if enabled {
            for dependency in also_enable {
                match ledger.get_mut(dependency) {
                    Some(record) => record.enabled = true,
                    None => warn!(mod_name = name, dependency, "dependency not installed"),
                }
            }
        }

        let mut packs = self.packs.edit();
        check_active_pack(&ledger, &mut packs)?;
        ledger.save()?;
        info!(mod_name = name, enabled, "mod toggled");
        Ok(())
    }

    /// Applies every change with a single ledger write. Unknown names are
    /// reported per item and do not stop the batch.
    pub fn batch_set_enabled(&self, changes: &[Toggle]) -> Result<BatchReport> {
        let mut report = BatchReport::default();
        let mut ledger = self.ledger.edit();
        for change in changes {
            match ledger.get_mut(&change.name) {
                Some(record) => {
                    record.enabled = change.enabled;
                    report.succeeded += 1;
                }
                None => report.fail(&change.name, &Error::ModNotInstalled(change.name.clone())),
            }
        }
        let mut packs = self.packs.edit();
        report.pack_cleared = check_active_pack(&ledger, &mut packs)?;
        if report.succeeded > 0 {
            ledger.save()?;
        }
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "batch toggle applied"
        );
        Ok(report)
    }

    /// Records freshly installed mods as enabled in one write.
    pub(crate) fn record_installed(&self, installed: &[(String, String)]) -> Result<()> {
        let mut ledger = self.ledger.edit();
        for (name, version) in installed {
            ledger.upsert(name, version, true);
        }
        let mut packs = self.packs.edit();
        check_active_pack(&ledger, &mut packs)?;
        ledger.save()

    }

    /// Removes the mod's folder and ledger entry. The entry is stripped even
    /// when the folder cannot be deleted; that failure is still returned.
    pub fn uninstall(&self, name: &str) -> Result<()> {
        let (_, first_error) = self.uninstall_names(&[name.to_string()])?;
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Best-effort removal of every name; failures are counted, never fatal.
    pub fn batch_uninstall(&self, names: &[String]) -> Result<BatchReport> {
        self.uninstall_names(names).map(|(report, _)| report)
    }

    fn uninstall_names(&self, names: &[String]) -> Result<(BatchReport, Option<Error>)> {
        let mut report = BatchReport::default();
        let mut first_error = None;
        let mut ledger = self.ledger.edit();
        let mut removed = Vec::new();

        for name in names {
            let tracked = is_plain_name(name) && ledger.remove(name).is_some();
            if tracked {
                removed.push(name.clone());
            }
            match self.remove_mod_dir(name, tracked) {
                Ok(()) => report.succeeded += 1,
                Err(err) => {
                    warn!(mod_name = %name, %err, "uninstall failed");
                    report.fail(name, &err);
                    first_error.get_or_insert(err);
                }
            }
        }

        let mut packs = self.packs.edit();
        let member_removed = packs
            .active()
            .map(|pack| removed.iter().any(|name| pack.mods.contains(name)))
            .unwrap_or(false);
        if member_removed {
            report.pack_cleared = packs.active_pack.take();
            packs.save()?;
            info!(pack = ?report.pack_cleared, "active pack cleared by uninstall");
        } else {
            report.pack_cleared = check_active_pack(&ledger, &mut packs)?;
        }
        if !removed.is_empty() {
            ledger.save()?;
        }
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "uninstall applied"
        );
        Ok((report, first_error))
    }

    fn remove_mod_dir(&self, name: &str, tracked: bool) -> Result<()> {
        if !is_plain_name(name) {
            return Err(Error::InvalidRequest(format!("invalid mod name {name:?}")));
        }
        let dir = self.mod_dir(name);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                debug!(mod_name = name, "mod folder removed");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                if tracked {
                    Ok(())
                } else {
                    Err(Error::ModNotInstalled(name.to_string()))
                }
            }
            Err(err) => Err(Error::io(dir, err)),
        }
    }

    /// Creates a pack. Without an explicit member list the currently enabled
    /// mods are snapshotted.
    pub fn create_pack(
        &self,
        name: &str,
        description: &str,
        author: &str,
        members: Option<Vec<String>>,
    ) -> Result<Pack> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::InvalidRequest("pack name is empty".to_string()));
        }
        let ledger = self.ledger.edit();
        let mut packs = self.packs.edit();
        if packs.packs.contains_key(name) {
            return Err(Error::PackExists(name.to_string()));
        }
        let mods = members.unwrap_or_else(|| ledger.enabled_names().into_iter().collect());
        let pack = Pack {
            name: name.to_string(),
            description: description.to_string(),
            author: author.to_string(),
            mods,
        };
        packs.packs.insert(pack.name.clone(), pack.clone());
        packs.save()?;
        info!(pack = name, members = pack.mods.len(), "pack created");
        Ok(pack)
    }

    pub fn delete_pack(&self, name: &str) -> Result<()> {
        let mut packs = self.packs.edit();
        if packs.packs.remove(name).is_none() {
            return Err(Error::PackNotFound(name.to_string()));
        }
        if packs.active_pack.as_deref() == Some(name) {
            packs.active_pack = None;
        }
        packs.save()?;
        info!(pack = name, "pack deleted");
        Ok(())
    }

    /// `Some` enables exactly the pack's members and disables everything
    /// else, then points at the pack. `None` only clears the pointer.
    pub fn set_active_pack(&self, name: Option<&str>) -> Result<()> {
        let Some(name) = name else {
            let mut packs = self.packs.edit();
            if packs.active_pack.take().is_some() {
                packs.save()?;
                info!("active pack cleared");
            }
            return Ok(());
        };

        let mut ledger = self.ledger.edit();
        let mut packs = self.packs.edit();
        let pack = packs
            .packs
            .get(name)
            .cloned()
            .ok_or_else(|| Error::PackNotFound(name.to_string()))?;
        let missing: Vec<String> = pack
            .mods
            .iter()
            .filter(|member| !ledger.contains(member))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(Error::PackMembersMissing {
                pack: name.to_string(),
                missing,
            });
        }

        let members = pack.member_set();
        let names: Vec<String> = ledger.mods().keys().cloned().collect();
        for mod_name in names {
            if let Some(record) = ledger.get_mut(&mod_name) {
                record.enabled = members.contains(&mod_name);
            }
        }
        ledger.save()?;
        packs.active_pack = Some(name.to_string());
        packs.save()?;
        info!(pack = name, members = members.len(), "pack activated");
        Ok(())
    }

    pub fn export_pack(&self, name: &str) -> Result<String> {
        let packs = self.packs.read();
        let pack = packs
            .packs
            .get(name)
            .ok_or_else(|| Error::PackNotFound(name.to_string()))?;
        packs::export_code(pack)
    }

    /// Imports a shared pack. Existing packs are never overwritten.
    pub fn import_pack(&self, code: &str) -> Result<Pack> {
        let pack = packs::decode_code(code)?;
        let mut packs = self.packs.edit();
        if packs.packs.contains_key(&pack.name) {
            return Err(Error::PackExists(pack.name));
        }
        packs.packs.insert(pack.name.clone(), pack.clone());
        packs.save()?;
        info!(pack = %pack.name, members = pack.mods.len(), "pack imported");
        Ok(pack)
    }
}

/// Clears the active pack pointer when the enabled set drifted from it.
///
/// Run against the mutated ledger before it is saved: a stale pointer is
/// cleared on disk first, so a failed ledger write never leaves it pointing
/// at a pack the enabled set no longer matches.
pub(crate) fn check_active_pack(
    ledger: &Ledger,
    packs: &mut StoreGuard<'_, PackRegistry>,
) -> Result<Option<String>> {
    let enabled: BTreeSet<String> = ledger.enabled_names();
    let cleared = packs.invalidate_if_mismatched(&enabled);
    if let Some(pack) = &cleared {
        packs.save()?;
        info!(pack = %pack, "active pack no longer matches enabled mods, cleared");
    }
    Ok(cleared)
}

/// A mod name usable as a single directory component.
pub(crate) fn is_plain_name(name: &str) -> bool {
    !name.trim().is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library(root: &Path) -> Library {
        let private = root.join("Soulforge");
        Library::new(
            private.join("mods"),
            private.join("installedMods.json"),
            private.join("packs.json"),
        )
    }

    fn seed(library: &Library, names: &[&str]) {
        let installed: Vec<(String, String)> = names
            .iter()
            .map(|name| (name.to_string(), "1.0".to_string()))
            .collect();
        library.record_installed(&installed).unwrap();
    }

    #[test]
    fn toggle_unknown_mod_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let library = library(tmp.path());
        let err = library.set_enabled("Ghost", true, &[]).unwrap_err();
        assert!(matches!(err, Error::ModNotInstalled(_)));
    }

    #[test]
    fn enabling_with_dependencies_enables_them_too() {
        let tmp = tempfile::tempdir().unwrap();
        let library = library(tmp.path());
        seed(&library, &["Core", "Addon"]);
        library
            .batch_set_enabled(&[Toggle::new("Core", false), Toggle::new("Addon", false)])
            .unwrap();

        library
            .set_enabled("Addon", true, &["Core".to_string(), "Missing".to_string()])
            .unwrap();
        let enabled = library.installed().enabled_names();
        assert!(enabled.contains("Core") && enabled.contains("Addon"));
    }

    #[test]
    fn snapshot_pack_then_toggle_outside_it_clears_pointer() {
        let tmp = tempfile::tempdir().unwrap();
        let library = library(tmp.path());
        seed(&library, &["X", "Y", "Z"]);
        library.set_enabled("Z", false, &[]).unwrap();

        let pack = library.create_pack("P", "", "", None).unwrap();
        assert_eq!(pack.mods, vec!["X".to_string(), "Y".to_string()]);
        library.set_active_pack(Some("P")).unwrap();
        assert_eq!(library.packs().active_pack.as_deref(), Some("P"));

        library.set_enabled("Z", true, &[]).unwrap();
        assert_eq!(library.packs().active_pack, None);
    }

    #[test]
    fn activating_pack_with_missing_members_changes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let library = library(tmp.path());
        seed(&library, &["X"]);
        library
            .create_pack("P", "", "", Some(vec!["X".into(), "Gone".into()]))
            .unwrap();

        let err = library.set_active_pack(Some("P")).unwrap_err();
        match err {
            Error::PackMembersMissing { missing, .. } => assert_eq!(missing, vec!["Gone"]),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(library.packs().active_pack, None);
    }

    #[test]
    fn deleting_active_pack_clears_pointer() {
        let tmp = tempfile::tempdir().unwrap();
        let library = library(tmp.path());
        seed(&library, &["X"]);
        library.create_pack("P", "", "", None).unwrap();
        library.set_active_pack(Some("P")).unwrap();

        library.delete_pack("P").unwrap();
        let packs = library.packs();
        assert!(packs.packs.is_empty());
        assert_eq!(packs.active_pack, None);
        assert!(matches!(library.delete_pack("P"), Err(Error::PackNotFound(_))));
    }

    #[test]
    fn import_refuses_to_overwrite() {
        let tmp = tempfile::tempdir().unwrap();
        let library = library(tmp.path());
        library
            .create_pack("P", "desc", "me", Some(vec!["A".into()]))
            .unwrap();
        let code = library.export_pack("P").unwrap();
        assert!(matches!(library.import_pack(&code), Err(Error::PackExists(_))));
    }

    #[test]
    fn stale_pointer_is_cleared_even_when_ledger_write_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let ledger_path = tmp.path().join("ledger/installedMods.json");
        let library = Library::new(
            tmp.path().join("mods"),
            &ledger_path,
            tmp.path().join("packs/packs.json"),
        );
        seed(&library, &["X"]);
        library.create_pack("P", "", "", None).unwrap();
        library.set_active_pack(Some("P")).unwrap();

        // A non-empty directory in place of the ledger cannot be renamed over.
        fs::remove_file(&ledger_path).unwrap();
        fs::create_dir_all(ledger_path.join("blocker")).unwrap();

        let err = library
            .record_installed(&[("Y".to_string(), "1.0".to_string())])
            .unwrap_err();
        assert!(matches!(err, Error::StateWrite { .. }));
        assert_eq!(library.packs().active_pack, None);
    }

    #[test]
    fn plain_names_reject_path_components() {
        assert!(is_plain_name("Benchwarp"));
        assert!(is_plain_name("QoL Mod"));
        assert!(!is_plain_name(".."));
        assert!(!is_plain_name("a/b"));
        assert!(!is_plain_name("a\\b"));
        assert!(!is_plain_name("  "));
    }
}
