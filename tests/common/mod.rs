#![allow(dead_code)]

use sha2::{Digest, Sha256};
use soulforge::{
    http::HttpClient,
    launch::{LaunchMethod, LaunchTarget, ProcessLauncher},
    Error, ModManager,
};
use std::{
    collections::HashMap,
    fs,
    io::{Cursor, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

pub const MODLINKS_URL: &str = "https://catalog.test/ModLinks.xml";
pub const APILINKS_URL: &str = "https://catalog.test/ApiLinks.xml";

/// In-memory HTTP double: scripted bodies per URL, every request counted.
#[derive(Default)]
pub struct FakeHttp {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    requests: Mutex<Vec<String>>,
}

impl FakeHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, url: &str, body: impl Into<Vec<u8>>) {
        self.bodies
            .lock()
            .unwrap()
            .insert(url.to_string(), body.into());
    }

    /// Makes `url` fail with a network error from now on.
    pub fn drop_url(&self, url: &str) {
        self.bodies.lock().unwrap().remove(url);
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|requested| requested.as_str() == url)
            .count()
    }
}

impl HttpClient for FakeHttp {
    fn get(&self, url: &str, _timeout: Option<Duration>) -> soulforge::Result<Vec<u8>> {
        self.requests.lock().unwrap().push(url.to_string());
        self.bodies
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::Network {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            })
    }
}

/// Launcher that records what it was asked to start.
#[derive(Default)]
pub struct RecordingLauncher {
    pub launches: Mutex<Vec<LaunchTarget>>,
}

impl ProcessLauncher for RecordingLauncher {
    fn launch(&self, target: &LaunchTarget) -> soulforge::Result<LaunchMethod> {
        self.launches.lock().unwrap().push(target.clone());
        Ok(LaunchMethod::Steam)
    }
}

pub struct Fixture {
    pub tmp: TempDir,
    pub data_dir: PathBuf,
    pub game_root: PathBuf,
    pub http: Arc<FakeHttp>,
    pub launcher: Arc<RecordingLauncher>,
}

impl Fixture {
    /// Fresh data dir plus a fake game install with a vanilla assembly.
    pub fn new() -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let data_dir = tmp.path().join("data");
        let game_root = create_game(tmp.path(), "Hollow Knight");
        fs::create_dir_all(&data_dir).unwrap();
        fs::write(
            data_dir.join("config.json"),
            serde_json::json!({
                "modlinks_url": MODLINKS_URL,
                "apilinks_url": APILINKS_URL,
            })
            .to_string(),
        )
        .unwrap();
        Self {
            tmp,
            data_dir,
            game_root,
            http: FakeHttp::new(),
            launcher: Arc::new(RecordingLauncher::default()),
        }
    }

    pub fn manager(&self) -> ModManager {
        ModManager::open(&self.data_dir, self.http.clone(), self.launcher.clone()).unwrap()
    }

    /// Manager with the fixture's game directory already selected.
    pub fn manager_with_game(&self) -> ModManager {
        let manager = self.manager();
        manager.select_game_directory(&self.game_root).unwrap();
        manager
    }

    pub fn managed_dir(&self) -> PathBuf {
        self.game_root.join("hollow_knight_Data/Managed")
    }

    pub fn mods_cache_dir(&self) -> PathBuf {
        self.managed_dir().join("Soulforge/mods")
    }
}

pub fn create_game(parent: &Path, name: &str) -> PathBuf {
    let root = parent.join(name);
    let managed = root.join("hollow_knight_Data/Managed");
    fs::create_dir_all(&managed).unwrap();
    fs::write(root.join("hollow_knight.x86_64"), b"elf").unwrap();
    fs::write(managed.join("Assembly-CSharp.dll"), b"MZ vanilla").unwrap();
    root
}

pub fn sha256(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub fn dll_bytes(tag: &str) -> Vec<u8> {
    let mut bytes = b"MZ".to_vec();
    bytes.extend_from_slice(tag.as_bytes());
    bytes
}

pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (path, data) in entries {
        writer
            .start_file(*path, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// One catalog entry for [`modlinks_xml`].
pub struct CatalogEntry<'a> {
    pub name: &'a str,
    pub version: &'a str,
    pub dependencies: &'a [&'a str],
    pub url: String,
    pub sha256: String,
}

pub fn modlinks_xml(entries: &[CatalogEntry<'_>]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\"?>\n<ModLinks>\n");
    for entry in entries {
        xml.push_str("  <Manifest>\n");
        xml.push_str(&format!("    <Name>{}</Name>\n", entry.name));
        xml.push_str(&format!("    <Description>{} mod</Description>\n", entry.name));
        xml.push_str(&format!("    <Version>{}</Version>\n", entry.version));
        xml.push_str(&format!(
            "    <Link SHA256=\"{}\"><![CDATA[{}]]></Link>\n",
            entry.sha256, entry.url
        ));
        xml.push_str("    <Dependencies>\n");
        for dependency in entry.dependencies {
            xml.push_str(&format!("      <Dependency>{dependency}</Dependency>\n"));
        }
        xml.push_str("    </Dependencies>\n  </Manifest>\n");
    }
    xml.push_str("</ModLinks>\n");
    xml
}

pub fn apilinks_xml(version: &str, url: &str, sha256: &str) -> String {
    format!(
        r#"<ApiLinks>
  <Manifest>
    <Version>{version}</Version>
    <Files><File>Assembly-CSharp.dll</File><File>MMHOOK_Assembly-CSharp.dll</File><File>MMHOOK_PlayMaker.dll</File></Files>
    <Links>
      <Windows SHA256="{sha256}">{url}</Windows>
      <Mac SHA256="{sha256}">{url}</Mac>
      <Linux SHA256="{sha256}">{url}</Linux>
    </Links>
  </Manifest>
</ApiLinks>"#
    )
}
