use crate::catalog;
use crate::error::{Error, InstallStep, Result};
use crate::http::HttpClient;
use crate::library::{is_plain_name, Library};
use crate::modlinks::ModDescriptor;
use crate::payload::{self, PayloadKind};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fs, path::PathBuf};
use tracing::{debug, info, warn};

/// A dependency as handed in by the caller. Its own dependencies are not
/// followed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    pub name: String,
    pub version: String,
    pub download_url: String,
    #[serde(default)]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallRequest {
    pub name: String,
    pub version: String,
    pub download_url: String,
    #[serde(default)]
    pub sha256: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
}

impl InstallRequest {
    /// Builds a request for `name` with its dependencies resolved against the
    /// same catalog snapshot.
    pub fn from_catalog(mods: &[ModDescriptor], name: &str) -> Result<Self> {
        let descriptor = catalog::find(mods, name)
            .ok_or_else(|| Error::InvalidRequest(format!("{name} is not in the catalog")))?;
        let primary = DependencySpec::from_descriptor(descriptor)?;

        let mut dependencies = Vec::new();
        for dependency in &descriptor.dependencies {
            let resolved = catalog::find(mods, dependency).ok_or_else(|| {
                Error::InvalidRequest(format!(
                    "{name} depends on {dependency}, which is not in the catalog"
                ))
            })?;
            dependencies.push(DependencySpec::from_descriptor(resolved)?);
        }

        Ok(Self {
            name: primary.name,
            version: primary.version,
            download_url: primary.download_url,
            sha256: primary.sha256,
            dependencies,
        })
    }

    fn primary(&self) -> DependencySpec {
        DependencySpec {
            name: self.name.clone(),
            version: self.version.clone(),
            download_url: self.download_url.clone(),
            sha256: self.sha256.clone(),
        }
    }
}

impl DependencySpec {
    fn from_descriptor(descriptor: &ModDescriptor) -> Result<Self> {
        let link = descriptor.downloads.first().ok_or_else(|| {
            Error::InvalidRequest(format!("{} has no download link", descriptor.name))
        })?;
        Ok(Self {
            name: descriptor.name.clone(),
            version: descriptor.version.clone(),
            download_url: link.url.clone(),
            sha256: Some(link.sha256.clone()),
        })
    }

    fn validate(&self) -> Result<()> {
        if !is_plain_name(&self.name) {
            return Err(Error::InvalidRequest(format!(
                "invalid mod name {:?}",
                self.name
            )));
        }
        let url = self.download_url.trim();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(Error::InvalidRequest(format!(
                "download url for {} is not http(s): {url:?}",
                self.name
            )));
        }
        if let Some(hash) = self.sha256.as_deref().map(str::trim) {
            if !hash.is_empty() && !(hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit()))
            {
                return Err(Error::InvalidRequest(format!(
                    "sha256 for {} is not a hex digest",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallOutcome {
    /// Mods written to disk and recorded, dependencies first.
    pub installed: Vec<String>,
    /// Dependencies that were already installed.
    pub skipped: Vec<String>,
}

/// A verified payload waiting to be written.
struct Fetched {
    spec: DependencySpec,
    kind: PayloadKind,
    bytes: Vec<u8>,
}

/// Removes folders created by an install unless it completes.
struct StagingGuard {
    created: Vec<PathBuf>,
    armed: bool,
}

impl StagingGuard {
    fn new() -> Self {
        Self {
            created: Vec::new(),
            armed: true,
        }
    }

    fn track(&mut self, path: PathBuf) {
        self.created.push(path);
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StagingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for path in self.created.iter().rev() {
            if let Err(err) = fs::remove_dir_all(path) {
                warn!(path = %path.display(), %err, "failed to roll back mod folder");
            }
        }
    }
}

pub struct Installer<'a> {
    http: &'a dyn HttpClient,
    library: &'a Library,
}

impl<'a> Installer<'a> {
    pub fn new(http: &'a dyn HttpClient, library: &'a Library) -> Self {
        Self { http, library }
    }

    /// Installs missing dependencies, in the order given, then the mod.
    ///
    /// Every payload is downloaded and verified before anything touches the
    /// disk, and the ledger is written once at the end, so a failure anywhere
    /// leaves neither the mod nor its dependencies recorded.
    pub fn install(&self, request: &InstallRequest) -> Result<InstallOutcome> {
        let primary = request.primary();
        primary
            .validate()
            .map_err(|err| err.at_step(&primary.name, InstallStep::Validate))?;

        let ledger = self.library.installed();
        let mut outcome = InstallOutcome::default();
        let mut queue = Vec::new();
        let mut seen = HashSet::new();
        for dependency in &request.dependencies {
            if dependency.name == primary.name || !seen.insert(dependency.name.clone()) {
                continue;
            }
            if ledger.contains(&dependency.name) {
                debug!(dependency = %dependency.name, "dependency already installed");
                outcome.skipped.push(dependency.name.clone());
                continue;
            }
            dependency
                .validate()
                .map_err(|err| err.at_step(&dependency.name, InstallStep::Validate))?;
            queue.push(dependency.clone());
        }
        queue.push(primary);

        let mut fetched = Vec::with_capacity(queue.len());
        for spec in queue {
            fetched.push(self.fetch(spec)?);
        }

        let mut guard = StagingGuard::new();
        for item in &fetched {
            let dest = self.library.mod_dir(&item.spec.name);
            if !dest.exists() {
                guard.track(dest.clone());
            }
            payload::materialize(&item.spec.name, item.kind, &item.bytes, &dest)
                .map_err(|err| err.at_step(&item.spec.name, InstallStep::Extract))?;
        }

        let records: Vec<(String, String)> = fetched
            .iter()
            .map(|item| (item.spec.name.clone(), item.spec.version.clone()))
            .collect();
        self.library
            .record_installed(&records)
            .map_err(|err| err.at_step(&request.name, InstallStep::LedgerWrite))?;
        guard.disarm();

        outcome.installed = records.into_iter().map(|(name, _)| name).collect();
        info!(mod_name = %request.name, installed = ?outcome.installed, "install complete");
        Ok(outcome)
    }

    fn fetch(&self, spec: DependencySpec) -> Result<Fetched> {
        info!(mod_name = %spec.name, url = %spec.download_url, "downloading");
        let bytes = self
            .http
            .get(spec.download_url.trim(), None)
            .map_err(|err| err.at_step(&spec.name, InstallStep::Download))?;
        payload::verify_sha256(&spec.name, &bytes, spec.sha256.as_deref())
            .map_err(|err| err.at_step(&spec.name, InstallStep::Verify))?;
        let kind = payload::classify(&spec.name, &bytes)
            .map_err(|err| err.at_step(&spec.name, InstallStep::Verify))?;
        debug!(mod_name = %spec.name, bytes = bytes.len(), ?kind, "payload verified");
        Ok(Fetched { spec, kind, bytes })
    }
}
