use std::{fmt, io, path::PathBuf};
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Step of an install that failed, reported alongside the underlying error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStep {
    Validate,
    Download,
    Verify,
    Extract,
    LedgerWrite,
}

impl fmt::Display for InstallStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InstallStep::Validate => "validate",
            InstallStep::Download => "download",
            InstallStep::Verify => "verify",
            InstallStep::Extract => "extract",
            InstallStep::LedgerWrite => "ledger write",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("network failure fetching {url}: {reason}")]
    Network { url: String, reason: String },
    #[error("{url} answered with HTTP {status}")]
    HttpStatus { url: String, status: u16 },
    #[error("too many redirects fetching {url}")]
    TooManyRedirects { url: String },
    #[error("hash mismatch for {name}: expected {expected}, got {actual}")]
    HashMismatch {
        name: String,
        expected: String,
        actual: String,
    },
    #[error("downloaded payload for {name} is empty")]
    EmptyPayload { name: String },
    #[error("download for {name} returned an HTML page instead of a mod payload")]
    HtmlPayload { name: String },
    #[error("payload for {name} is neither a DLL nor a zip archive")]
    UnsupportedPayload { name: String },
    #[error("malformed archive for {name}: {reason}")]
    MalformedArchive { name: String, reason: String },
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {}: {reason}", path.display())]
    StateWrite { path: PathBuf, reason: String },
    #[error("mod is not installed: {0}")]
    ModNotInstalled(String),
    #[error("pack not found: {0}")]
    PackNotFound(String),
    #[error("a pack named {0} already exists")]
    PackExists(String),
    #[error("pack {pack} references mods that are not installed: {}", missing.join(", "))]
    PackMembersMissing { pack: String, missing: Vec<String> },
    #[error("invalid pack code: {0}")]
    InvalidPackCode(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("game directory is not set")]
    GameDirectoryNotSet,
    #[error("invalid game directory {}: {reason}", path.display())]
    InvalidGameDirectory { path: PathBuf, reason: String },
    #[error("mod catalog unavailable: {0}")]
    CatalogUnavailable(String),
    #[error("modding API unavailable: {0}")]
    ApiUnavailable(String),
    #[error("managed assembly backups are inconsistent: {0}")]
    AssemblyConflict(String),
    #[error("launch failed: {0}")]
    Launch(String),
    #[error("installing {mod_name} failed at {step}: {source}")]
    InstallFailed {
        mod_name: String,
        step: InstallStep,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn at_step(self, mod_name: &str, step: InstallStep) -> Self {
        Error::InstallFailed {
            mod_name: mod_name.to_string(),
            step,
            source: Box::new(self),
        }
    }

    /// Install step this error was raised at, if it came out of the installer.
    pub fn install_step(&self) -> Option<InstallStep> {
        match self {
            Error::InstallFailed { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// Attaches the offending path to raw `io::Error`s.
pub trait IoContext<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoContext<T> for std::result::Result<T, io::Error> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|source| Error::io(path, source))
    }
}
