use crate::error::{Error, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// A named, shareable set of mods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pack {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub mods: Vec<String>,
}

impl Pack {
    pub fn member_set(&self) -> BTreeSet<String> {
        self.mods.iter().cloned().collect()
    }

    /// True when exactly this pack's members are enabled.
    pub fn matches_enabled(&self, enabled: &BTreeSet<String>) -> bool {
        self.member_set() == *enabled
    }
}

/// `packs.json`: every pack plus the single active pointer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackRegistry {
    #[serde(rename = "Packs", default)]
    pub packs: BTreeMap<String, Pack>,
    #[serde(rename = "activePack", default)]
    pub active_pack: Option<String>,
}

impl PackRegistry {
    pub fn active(&self) -> Option<&Pack> {
        self.active_pack
            .as_deref()
            .and_then(|name| self.packs.get(name))
    }

    /// Clears the active pointer unless the enabled set matches its pack.
    /// Returns the name of the pack that was deactivated.
    pub fn invalidate_if_mismatched(&mut self, enabled: &BTreeSet<String>) -> Option<String> {
        let name = self.active_pack.clone()?;
        let consistent = self
            .packs
            .get(&name)
            .map(|pack| pack.matches_enabled(enabled))
            .unwrap_or(false);
        if consistent {
            return None;
        }
        self.active_pack = None;
        Some(name)
    }
}

/// Opaque share code: the pack as JSON, base64 encoded.
pub fn export_code(pack: &Pack) -> Result<String> {
    let json = serde_json::to_string(pack)
        .map_err(|err| Error::InvalidPackCode(format!("serialize pack: {err}")))?;
    Ok(BASE64.encode(json))
}

/// Decodes a share code. Only shape is checked here; name collisions are the
/// registry's concern.
pub fn decode_code(code: &str) -> Result<Pack> {
    let bytes = BASE64
        .decode(code.trim())
        .map_err(|err| Error::InvalidPackCode(format!("not base64: {err}")))?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|err| Error::InvalidPackCode(format!("not a pack record: {err}")))?;

    let name = value
        .get("name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| Error::InvalidPackCode("missing pack name".to_string()))?;
    let mods = value
        .get("mods")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::InvalidPackCode("mods is not a list".to_string()))?;
    let mods = mods
        .iter()
        .map(|entry| {
            entry
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| Error::InvalidPackCode("mods must be names".to_string()))
        })
        .collect::<Result<Vec<_>>>()?;

    let text = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    Ok(Pack {
        name: name.to_string(),
        description: text("description"),
        author: text("author"),
        mods,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(value: Value) -> String {
        BASE64.encode(value.to_string())
    }

    #[test]
    fn code_round_trips_pack_fields_in_order() {
        let pack = Pack {
            name: "Speedrun".into(),
            description: "any%".into(),
            author: "hornet".into(),
            mods: vec!["Zote".into(), "Vasi".into(), "Benchwarp".into()],
        };
        let decoded = decode_code(&export_code(&pack).unwrap()).unwrap();
        assert_eq!(decoded, pack);
    }

    #[test]
    fn rejects_missing_name_and_non_list_mods() {
        let no_name = encode(serde_json::json!({ "mods": ["A"] }));
        assert!(matches!(decode_code(&no_name), Err(Error::InvalidPackCode(_))));

        let bad_mods = encode(serde_json::json!({ "name": "P", "mods": "A" }));
        assert!(matches!(decode_code(&bad_mods), Err(Error::InvalidPackCode(_))));

        assert!(decode_code("%%%").is_err());
    }

    #[test]
    fn registry_wire_layout_uses_null_pointer() {
        let registry = PackRegistry::default();
        let value = serde_json::to_value(&registry).unwrap();
        assert_eq!(value, serde_json::json!({ "Packs": {}, "activePack": null }));
    }

    #[test]
    fn mismatched_enabled_set_clears_pointer() {
        let mut registry = PackRegistry::default();
        registry.packs.insert(
            "P".into(),
            Pack {
                name: "P".into(),
                description: String::new(),
                author: String::new(),
                mods: vec!["X".into(), "Y".into()],
            },
        );
        registry.active_pack = Some("P".into());

        let both: BTreeSet<String> = ["X", "Y"].iter().map(|s| s.to_string()).collect();
        assert_eq!(registry.invalidate_if_mismatched(&both), None);
        assert_eq!(registry.active_pack.as_deref(), Some("P"));

        let only_y: BTreeSet<String> = ["Y"].iter().map(|s| s.to_string()).collect();
        assert_eq!(registry.invalidate_if_mismatched(&only_y), Some("P".into()));
        assert_eq!(registry.active_pack, None);
    }
}
