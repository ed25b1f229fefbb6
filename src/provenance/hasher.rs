//! PS-010: BLAKE3 hashing for resource state, files and directories.

use crate::core::error::{Error, Result};
use crate::core::types::ResourceNode;
use std::io::Read;
use std::path::{Path, PathBuf};

const STREAM_BUF_SIZE: usize = 65536;

/// Hash a file's contents. Returns `"blake3:{hex}"`.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .map_err(|e| Error::State(format!("cannot open {}: {}", path.display(), e)))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; STREAM_BUF_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Hash a set of files under `base`. Paths are relative to `base` and are
/// included in the digest, so renames change the hash. Order-independent.
pub fn hash_files(base: &Path, relative: &[String]) -> Result<String> {
    let entries: Vec<(String, PathBuf)> = relative
        .iter()
        .map(|rel| (rel.clone(), base.join(rel)))
        .collect();
    hash_named_files(&entries)
}

/// Hash `(name, path)` pairs; the name stands in for the path in the digest.
pub fn hash_named_files(entries: &[(String, PathBuf)]) -> Result<String> {
    let mut sorted: Vec<&(String, PathBuf)> = entries.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let mut hasher = blake3::Hasher::new();
    for (name, path) in sorted {
        let hash = hash_file(path)?;
        hasher.update(name.as_bytes());
        hasher.update(b"\0");
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Hash a directory (sorted walk, relative paths included in hash).
/// Skips symlinks and `.git`.
pub fn hash_directory(path: &Path) -> Result<String> {
    fn walk(base: &Path, current: &Path, entries: &mut Vec<String>) -> Result<()> {
        let mut children: Vec<std::fs::DirEntry> =
            std::fs::read_dir(current)?.filter_map(|e| e.ok()).collect();
        children.sort_by_key(|e| e.file_name());

        for entry in children {
            let ft = entry.file_type()?;
            if ft.is_symlink() || entry.file_name() == ".git" {
                continue;
            }
            let path = entry.path();
            if ft.is_file() {
                let rel = path
                    .strip_prefix(base)
                    .map_err(|e| Error::State(format!("path prefix error: {}", e)))?;
                entries.push(rel.to_string_lossy().to_string());
            } else if ft.is_dir() {
                walk(base, &path, entries)?;
            }
        }
        Ok(())
    }

    let mut entries = Vec::new();
    walk(path, path, &mut entries)?;
    hash_files(path, &entries)
}

/// Compute a composite hash from multiple component hashes.
pub fn composite_hash(components: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for c in components {
        hasher.update(c.as_bytes());
        hasher.update(b"\0");
    }
    format!("blake3:{}", hasher.finalize().to_hex())
}

/// Hash the desired state of a node: kind, properties, rules and dependencies.
pub fn hash_node(node: &ResourceNode) -> String {
    let kind = node.kind.to_string();
    let properties = serde_json::to_string(&node.properties).unwrap_or_default();
    let rules: Vec<String> = node.rules.iter().map(ToString::to_string).collect();
    let rules = rules.join(",");
    let deps: Vec<&str> = node.depends_on.iter().map(String::as_str).collect();
    let deps = deps.join(",");
    composite_hash(&[&kind, &properties, &rules, &deps])
}
