use crate::error::{Error, IoContext, Result};
use crate::http::HttpClient;
use crate::modlinks::{self, ModDescriptor};
use crate::store::{write_atomic, write_atomic_text};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const PAYLOAD_FILE: &str = "modlinks.xml";
const META_FILE: &str = "modlinks.meta.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshOutcome {
    /// The cached payload changed.
    pub updated: bool,
    /// A network fetch was attempted (false when the freshness gate held).
    pub fetched: bool,
    /// Advisory error when a stale cache was served instead.
    pub error: Option<String>,
}

struct ParsedSnapshot {
    source: Arc<str>,
    mods: Arc<Vec<ModDescriptor>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheMeta {
    #[serde(default)]
    fetched_at: Option<i64>,
}

/// Time-gated local copy of the remote mod catalog.
///
/// Readers always get the last complete snapshot; a refresh swaps the snapshot
/// only once the new payload is on disk.
pub struct CatalogCache {
    url: String,
    cache_dir: PathBuf,
    freshness: Duration,
    http: Arc<dyn HttpClient>,
    raw: RwLock<Option<Arc<str>>>,
    /// Parse of a raw snapshot, keyed by the snapshot it came from.
    parsed: RwLock<Option<ParsedSnapshot>>,
    refresh_lock: Mutex<()>,
}

impl CatalogCache {
    pub fn new(
        url: impl Into<String>,
        cache_dir: impl Into<PathBuf>,
        freshness: Duration,
        http: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            url: url.into(),
            cache_dir: cache_dir.into(),
            freshness,
            http,
            raw: RwLock::new(None),
            parsed: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn payload_path(&self) -> PathBuf {
        self.cache_dir.join(PAYLOAD_FILE)
    }

    fn meta_path(&self) -> PathBuf {
        self.cache_dir.join(META_FILE)
    }

    pub fn refresh(&self) -> Result<RefreshOutcome> {
        self.refresh_at(OffsetDateTime::now_utc().unix_timestamp())
    }

    /// Refresh as if the current time were `now` (unix seconds).
    pub fn refresh_at(&self, now: i64) -> Result<RefreshOutcome> {
        let _refreshing = self.refresh_lock.lock();
        let cached = read_optional(&self.payload_path())?;
        let meta = self.load_meta();

        if cached.is_some() {
            if let Some(fetched_at) = meta.fetched_at {
                let age = now.saturating_sub(fetched_at);
                if age >= 0 && (age as u64) < self.freshness.as_secs() {
                    debug!(age, "catalog cache fresh, skipping fetch");
                    return Ok(RefreshOutcome::default());
                }
            }
        }

        match self.http.get(&self.url, Some(FETCH_TIMEOUT)) {
            Ok(payload) => {
                let updated = cached.as_deref() != Some(payload.as_slice());
                if updated {
                    write_atomic(&self.payload_path(), &payload).at(self.payload_path())?;
                    self.swap_snapshot(&payload);
                    info!(bytes = payload.len(), "catalog updated");
                } else {
                    debug!("catalog unchanged");
                }
                self.save_meta(now)?;
                Ok(RefreshOutcome {
                    updated,
                    fetched: true,
                    error: None,
                })
            }
            Err(err) => match cached {
                Some(_) => {
                    warn!(%err, "catalog fetch failed, serving cached copy");
                    Ok(RefreshOutcome {
                        updated: false,
                        fetched: true,
                        error: Some(err.to_string()),
                    })
                }
                None => Err(Error::CatalogUnavailable(err.to_string())),
            },
        }
    }

    /// The cached payload, or an empty string if nothing was ever fetched.
    pub fn get_raw(&self) -> Arc<str> {
        if let Some(raw) = self.raw.read().as_ref() {
            return Arc::clone(raw);
        }
        let loaded: Arc<str> = match fs::read(self.payload_path()) {
            Ok(bytes) => Arc::from(String::from_utf8_lossy(&bytes).into_owned()),
            Err(_) => Arc::from(""),
        };
        let mut slot = self.raw.write();
        Arc::clone(slot.get_or_insert(loaded))
    }

    /// Parsed catalog, computed once per snapshot. A parse is only reused
    /// while the raw snapshot it came from is still current, so a parse that
    /// finishes after a refresh swapped the payload is never served.
    pub fn mods(&self) -> Arc<Vec<ModDescriptor>> {
        let raw = self.get_raw();
        if let Some(parsed) = self.parsed.read().as_ref() {
            if Arc::ptr_eq(&parsed.source, &raw) {
                return Arc::clone(&parsed.mods);
            }
        }
        let mods = Arc::new(modlinks::parse_mod_links(&raw));
        *self.parsed.write() = Some(ParsedSnapshot {
            source: raw,
            mods: Arc::clone(&mods),
        });
        mods
    }

    /// Drops the parsed snapshot; the next [`CatalogCache::mods`] reparses.
    pub fn invalidate(&self) {
        *self.parsed.write() = None;
    }

    fn swap_snapshot(&self, payload: &[u8]) {
        let raw: Arc<str> = Arc::from(String::from_utf8_lossy(payload).into_owned());
        *self.raw.write() = Some(raw);
        self.invalidate();
    }

    fn load_meta(&self) -> CacheMeta {
        fs::read_to_string(self.meta_path())
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    fn save_meta(&self, now: i64) -> Result<()> {
        let meta = CacheMeta {
            fetched_at: Some(now),
        };
        let raw = serde_json::to_string_pretty(&meta).map_err(|err| Error::StateWrite {
            path: self.meta_path(),
            reason: err.to_string(),
        })?;
        write_atomic_text(&self.meta_path(), &raw).at(self.meta_path())
    }
}

/// Finds a descriptor by name; on duplicates the last entry wins.
pub fn find<'a>(mods: &'a [ModDescriptor], name: &str) -> Option<&'a ModDescriptor> {
    mods.iter().rev().find(|descriptor| descriptor.name == name)
}

fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(Error::io(path, err)),
    }
}
