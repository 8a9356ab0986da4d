use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Version recorded for folders the reconciler finds but nobody installed.
pub const UNTRACKED_VERSION: &str = "unknown";

/// `installedMods.json`: what is installed on disk and whether it is active.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledger {
    #[serde(rename = "InstalledMods", default)]
    installed: InstalledMods,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct InstalledMods {
    #[serde(rename = "Mods", default)]
    mods: BTreeMap<String, InstalledModRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledModRecord {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Enabled")]
    pub enabled: bool,
}

impl Ledger {
    pub fn mods(&self) -> &BTreeMap<String, InstalledModRecord> {
        &self.installed.mods
    }

    pub fn get(&self, name: &str) -> Option<&InstalledModRecord> {
        self.installed.mods.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut InstalledModRecord> {
        self.installed.mods.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.installed.mods.contains_key(name)
    }

    pub fn upsert(&mut self, name: &str, version: &str, enabled: bool) {
        self.installed.mods.insert(
            name.to_string(),
            InstalledModRecord {
                version: version.to_string(),
                enabled,
            },
        );
    }

    pub fn remove(&mut self, name: &str) -> Option<InstalledModRecord> {
        self.installed.mods.remove(name)
    }

    pub fn retain(&mut self, keep: impl FnMut(&String, &mut InstalledModRecord) -> bool) {
        self.installed.mods.retain(keep);
    }

    pub fn enabled_names(&self) -> BTreeSet<String> {
        self.installed
            .mods
            .iter()
            .filter(|(_, record)| record.enabled)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.installed.mods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.installed.mods.is_empty()
    }
}
