use crate::error::{Error, Result};
use crate::ledger::UNTRACKED_VERSION;
use crate::library::{check_active_pack, Library};
use serde::Serialize;
use std::{collections::BTreeSet, fs, io, path::Path};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Folders found on disk with no ledger entry.
    pub added: Vec<String>,
    /// Ledger entries whose folder is gone.
    pub removed: Vec<String>,
    pub pack_cleared: Option<String>,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty() || self.pack_cleared.is_some()
    }
}

/// Makes the ledger agree with the mods folder. Untracked folders are adopted
/// as enabled with an unknown version; entries without a folder are dropped.
/// Nothing is written when both already agree.
pub fn reconcile(library: &Library) -> Result<ReconcileReport> {
    let on_disk = list_mod_folders(library.mods_root())?;
    let mut report = ReconcileReport::default();

    let mut ledger = library.ledger_store().edit();
    ledger.retain(|name, _| {
        let keep = on_disk.contains(name);
        if !keep {
            report.removed.push(name.clone());
        }
        keep
    });
    for name in &on_disk {
        if !ledger.contains(name) {
            ledger.upsert(name, UNTRACKED_VERSION, true);
            report.added.push(name.clone());
        }
    }

    let mut packs = library.pack_store().edit();
    report.pack_cleared = check_active_pack(&ledger, &mut packs)?;

    if !report.added.is_empty() || !report.removed.is_empty() {
        ledger.save()?;
        info!(
            added = ?report.added,
            removed = ?report.removed,
            "ledger reconciled with mods folder"
        );
    } else {
        debug!("ledger already matches mods folder");
    }
    Ok(report)
}

/// Immediate subdirectory names of `root`; a missing root has none.
fn list_mod_folders(root: &Path) -> Result<BTreeSet<String>> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(err) => return Err(Error::io(root, err)),
    };
    let mut names = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(|err| Error::io(root, err))?;
        let is_dir = entry
            .file_type()
            .map(|kind| kind.is_dir())
            .map_err(|err| Error::io(entry.path(), err))?;
        if !is_dir {
            continue;
        }
        match entry.file_name().into_string() {
            Ok(name) => {
                names.insert(name);
            }
            Err(raw) => warn!(folder = ?raw, "skipping mod folder with a non UTF-8 name"),
        }
    }
    Ok(names)
}
