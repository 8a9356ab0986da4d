use crate::error::{Error, IoContext, Result};
use filetime::{set_file_mtime, FileTime};
use sha2::{Digest, Sha256};
use std::{
    fs,
    io::{self, Cursor},
    path::Path,
};
use time::{Date, Month, PrimitiveDateTime, Time as TimeOfDay};
use tracing::debug;

const PE_MAGIC: &[u8] = b"MZ";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// A single .NET assembly.
    Dll,
    Zip,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Compares against `expected` ignoring hex case. `None` skips the check.
pub fn verify_sha256(name: &str, bytes: &[u8], expected: Option<&str>) -> Result<()> {
    let Some(expected) = expected.map(str::trim).filter(|hash| !hash.is_empty()) else {
        return Ok(());
    };
    let actual = sha256_hex(bytes);
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(Error::HashMismatch {
            name: name.to_string(),
            expected: expected.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Routes a payload by its leading bytes.
pub fn classify(name: &str, bytes: &[u8]) -> Result<PayloadKind> {
    if bytes.is_empty() {
        return Err(Error::EmptyPayload {
            name: name.to_string(),
        });
    }
    if bytes.starts_with(PE_MAGIC) {
        return Ok(PayloadKind::Dll);
    }
    if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(ZIP_EMPTY_MAGIC) {
        return Ok(PayloadKind::Zip);
    }
    if looks_like_html(bytes) {
        return Err(Error::HtmlPayload {
            name: name.to_string(),
        });
    }
    Err(Error::UnsupportedPayload {
        name: name.to_string(),
    })
}

fn looks_like_html(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(512)];
    let text = String::from_utf8_lossy(head);
    let text = text.trim_start_matches('\u{feff}').trim_start().to_ascii_lowercase();
    text.starts_with("<!doctype") || text.starts_with("<html")
}

/// Writes a classified payload into `dest`, creating it if needed. Existing
/// files are overwritten.
pub fn materialize(name: &str, kind: PayloadKind, bytes: &[u8], dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).at(dest)?;
    match kind {
        PayloadKind::Dll => {
            let target = dest.join(format!("{name}.dll"));
            fs::write(&target, bytes).at(&target)?;
            debug!(mod_name = name, path = %target.display(), "wrote single assembly");
            Ok(())
        }
        PayloadKind::Zip => {
            let count = extract_zip(name, bytes, dest)?;
            debug!(mod_name = name, entries = count, "extracted archive");
            Ok(())
        }
    }
}

/// Extracts every entry of an in-memory zip into `dest`. Entries that would
/// escape `dest` are skipped.
pub fn extract_zip(name: &str, bytes: &[u8], dest: &Path) -> Result<usize> {
    let malformed = |err: zip::result::ZipError| Error::MalformedArchive {
        name: name.to_string(),
        reason: err.to_string(),
    };
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(malformed)?;
    let mut written = 0;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i).map_err(malformed)?;
        let Some(out_path) = file.enclosed_name() else {
            continue;
        };

        let out_path = dest.join(out_path);
        if file.is_dir() {
            fs::create_dir_all(&out_path).at(&out_path)?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent).at(parent)?;
        }

        let mut out_file = fs::File::create(&out_path).at(&out_path)?;
        io::copy(&mut file, &mut out_file).map_err(|err| {
            if err.kind() == io::ErrorKind::InvalidData {
                Error::MalformedArchive {
                    name: name.to_string(),
                    reason: err.to_string(),
                }
            } else {
                Error::io(&out_path, err)
            }
        })?;
        if let Some(dt) = file.last_modified() {
            if let Some(mtime) = zip_time_to_unix(dt) {
                let _ = set_file_mtime(&out_path, FileTime::from_unix_time(mtime, 0));
            }
        }
        written += 1;
    }

    Ok(written)
}

fn zip_time_to_unix(dt: zip::DateTime) -> Option<i64> {
    let month = Month::try_from(dt.month()).ok()?;
    let date = Date::from_calendar_date(dt.year() as i32, month, dt.day()).ok()?;
    let time = TimeOfDay::from_hms(dt.hour(), dt.minute(), dt.second()).ok()?;
    let datetime = PrimitiveDateTime::new(date, time).assume_utc();
    Some(datetime.unix_timestamp())
}
