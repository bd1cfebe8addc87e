//! BLAKE3 hashing for specs, files, and source snapshots.

use crate::core::error::Result;
use crate::core::types::ResourceSpec;
use std::io::Read;
use std::path::Path;

const STREAM_BUF_SIZE: usize = 65536;

/// Directory entries never included in a source snapshot.
const SNAPSHOT_IGNORED: &[&str] = &[".git", "__pycache__", ".runtarget", ".ipynb_checkpoints"];

fn with_path(path: &Path, e: std::io::Error) -> std::io::Error {
    std::io::Error::new(e.kind(), format!("{}: {}", path.display(), e))
}

/// Hash a file's contents. Returns `"blake3:{hex}"`.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| with_path(path, e))?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; STREAM_BUF_SIZE];
    loop {
        let n = file.read(&mut buf).map_err(|e| with_path(path, e))?;
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

/// Hash a directory (sorted walk, relative paths included in hash).
/// Skips symlinks and VCS/cache directories.
pub fn hash_directory(path: &Path) -> Result<String> {
    let mut entries: Vec<(String, String)> = Vec::new();

    fn walk(base: &Path, current: &Path, entries: &mut Vec<(String, String)>) -> Result<()> {
        let read_dir = std::fs::read_dir(current).map_err(|e| with_path(current, e))?;
        let mut children: Vec<std::fs::DirEntry> = read_dir.filter_map(|e| e.ok()).collect();
        children.sort_by_key(|e| e.file_name());

        for entry in children {
            let name = entry.file_name();
            if SNAPSHOT_IGNORED.iter().any(|i| name.as_os_str() == *i) {
                continue;
            }
            let ft = entry.file_type().map_err(|e| with_path(&entry.path(), e))?;
            if ft.is_symlink() {
                continue;
            }
            let path = entry.path();
            let rel = path
                .strip_prefix(base)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            if ft.is_file() {
                let hash = hash_file(&path)?;
                entries.push((rel, hash));
            } else if ft.is_dir() {
                walk(base, &path, entries)?;
            }
        }
        Ok(())
    }

    walk(path, path, &mut entries)?;

    let mut hasher = blake3::Hasher::new();
    for (rel, hash) in &entries {
        hasher.update(rel.as_bytes());
        hasher.update(b"\0");
        hasher.update(hash.as_bytes());
        hasher.update(b"\n");
    }
    Ok(format!("blake3:{}", hasher.finalize().to_hex()))
}

/// Drop the fields the registry ignores so they cannot affect the hash.
///
/// Environment variables are hashed in key order. User-managed environments
/// ignore every package list and resolve the interpreter to its default.
pub fn normalize(spec: &ResourceSpec) -> ResourceSpec {
    match spec {
        ResourceSpec::Environment(env) => {
            let mut env = env.clone();
            env.environment_variables.sort_keys();
            if env.user_managed_dependencies {
                env.channels.clear();
                env.packages.clear();
                env.pip_packages.clear();
                env.conda_file = None;
                env.pip_requirements = None;
                env.interpreter_path = Some(env.interpreter().to_string());
            }
            ResourceSpec::Environment(env)
        }
        other => other.clone(),
    }
}

/// Hash the canonical JSON rendering of a normalized spec.
pub fn spec_hash(spec: &ResourceSpec) -> Result<String> {
    let canonical = serde_json::to_string(&normalize(spec))?;
    Ok(hash_string(&canonical))
}
