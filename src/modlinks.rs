use quick_xml::{events::Event, Reader};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One downloadable payload for a mod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadCandidate {
    pub url: String,
    pub sha256: String,
}

/// A catalog entry. Rebuilt on every parse, identified by `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModDescriptor {
    pub name: String,
    pub description: String,
    pub version: String,
    pub repository: Option<String>,
    pub dependencies: Vec<String>,
    /// The first candidate is the install-time default.
    pub downloads: Vec<DownloadCandidate>,
}

/// The modding API entry of the secondary catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiManifest {
    pub version: String,
    pub files: Vec<String>,
    pub links: Vec<PlatformLink>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformLink {
    pub platform: String,
    pub url: String,
    pub sha256: String,
}

impl ApiManifest {
    pub fn link_for_current_platform(&self) -> Option<&PlatformLink> {
        self.links
            .iter()
            .find(|link| link.platform == current_platform())
    }
}

pub fn current_platform() -> &'static str {
    if cfg!(target_os = "windows") {
        "Windows"
    } else if cfg!(target_os = "macos") {
        "Mac"
    } else {
        "Linux"
    }
}

/// Parses a ModLinks document.
///
/// Never fails: unparseable input gives an empty list, entries without a name
/// are skipped, duplicates are kept (the last one wins for lookups). Output is
/// ordered by name, case-insensitively first and then by exact spelling.
pub fn parse_mod_links(raw: &str) -> Vec<ModDescriptor> {
    let Some(root) = parse_tree(raw) else {
        return Vec::new();
    };

    let mut manifests = Vec::new();
    collect_manifests(&root, &mut manifests);

    let mut mods: Vec<ModDescriptor> = manifests
        .into_iter()
        .filter_map(descriptor_from_manifest)
        .collect();
    mods.sort_by(|a, b| compare_names(&a.name, &b.name));
    mods
}

/// Parses an ApiLinks document; `None` when it has no usable manifest.
pub fn parse_api_links(raw: &str) -> Option<ApiManifest> {
    let root = parse_tree(raw)?;
    let manifest = if root.name == "Manifest" {
        &root
    } else {
        root.child("Manifest")?
    };

    let files = manifest
        .child("Files")
        .map(|files| {
            files
                .children
                .iter()
                .map(|file| file.text.trim().to_string())
                .filter(|file| !file.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let links = manifest
        .child("Links")
        .map(|links| {
            links
                .children
                .iter()
                .filter_map(|link| {
                    let url = link.text.trim();
                    let sha256 = link.attr("SHA256").unwrap_or("").trim();
                    if url.is_empty() || sha256.is_empty() {
                        return None;
                    }
                    Some(PlatformLink {
                        platform: link.name.clone(),
                        url: url.to_string(),
                        sha256: sha256.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(ApiManifest {
        version: manifest.child_text("Version"),
        files,
        links,
    })
}

/// Case-insensitive order; names equal up to case put lowercase first.
pub fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| b.cmp(a))
}

fn collect_manifests<'a>(node: &'a XmlNode, out: &mut Vec<&'a XmlNode>) {
    for child in &node.children {
        if child.name == "Links" {
            continue;
        }
        if child.name == "Manifest" {
            out.push(child);
            continue;
        }
        collect_manifests(child, out);
    }
}

fn descriptor_from_manifest(manifest: &XmlNode) -> Option<ModDescriptor> {
    let name = manifest.child_text("Name");
    if name.is_empty() {
        return None;
    }

    let repository = Some(manifest.child_text("Repository")).filter(|repo| !repo.is_empty());

    let dependencies = manifest
        .child("Dependencies")
        .map(|deps| {
            deps.children
                .iter()
                .map(|dep| dep.text.trim().to_string())
                .filter(|dep| !dep.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Some(ModDescriptor {
        name,
        description: manifest.child_text("Description"),
        version: manifest.child_text("Version"),
        repository,
        dependencies,
        downloads: download_candidates(manifest),
    })
}

fn download_candidates(manifest: &XmlNode) -> Vec<DownloadCandidate> {
    let mut links = Vec::new();
    let mut platform_links = Vec::new();

    for child in &manifest.children {
        match child.name.as_str() {
            "Link" => links.extend(attribute_link(child)),
            "Links" => {
                for link in &child.children {
                    if link.name == "Manifest" {
                        let sha256 = link.child_text("SHA256");
                        let url = link.child_text("URL");
                        if !sha256.is_empty() && !url.is_empty() {
                            links.push(DownloadCandidate { url, sha256 });
                        }
                    } else if let Some(candidate) = attribute_link(link) {
                        platform_links.push((link.name == current_platform(), candidate));
                    }
                }
            }
            _ => {}
        }
    }

    // The current platform's link goes first so it becomes the install default.
    platform_links.sort_by_key(|(native, _)| !native);
    links.extend(platform_links.into_iter().map(|(_, candidate)| candidate));
    links
}

fn attribute_link(node: &XmlNode) -> Option<DownloadCandidate> {
    let url = node.text.trim();
    let sha256 = node.attr("SHA256")?.trim();
    if url.is_empty() || sha256.is_empty() {
        return None;
    }
    Some(DownloadCandidate {
        url: url.to_string(),
        sha256: sha256.to_string(),
    })
}

#[derive(Debug, Default)]
struct XmlNode {
    name: String,
    attrs: Vec<(String, String)>,
    text: String,
    children: Vec<XmlNode>,
}

impl XmlNode {
    fn from_start(e: &quick_xml::events::BytesStart<'_>) -> Self {
        let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
        let attrs = e
            .attributes()
            .flatten()
            .filter_map(|attr| {
                let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
                let value = attr.unescape_value().ok()?.into_owned();
                Some((key, value))
            })
            .collect();
        Self {
            name,
            attrs,
            ..Self::default()
        }
    }

    fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|child| child.name == name)
    }

    fn child_text(&self, name: &str) -> String {
        self.child(name)
            .map(|child| child.text.trim().to_string())
            .unwrap_or_default()
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

fn parse_tree(raw: &str) -> Option<XmlNode> {
    if raw.trim().is_empty() {
        return None;
    }

    let mut reader = Reader::from_str(raw);
    reader.trim_text(true);
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(XmlNode::from_start(&e)),
            Ok(Event::Empty(e)) => {
                let node = XmlNode::from_start(&e);
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            Ok(Event::Text(e)) => {
                if let (Some(node), Ok(text)) = (stack.last_mut(), e.unescape()) {
                    node.text.push_str(&text);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(node) = stack.last_mut() {
                    node.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                let node = stack.pop()?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(node),
                    None => root = Some(node),
                }
            }
            Ok(Event::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return None;
    }
    root
}
