//! Mapping of request paths to files under the served root.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use vc_core::{Error, Result};

use crate::streaming::guess_content_type;

/// A file that may be served, with the metadata response headers need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedAsset {
    pub path: PathBuf,
    pub content_type: &'static str,
    pub len: u64,
    pub modified: SystemTime,
    pub etag: String,
}

impl ServedAsset {
    fn from_metadata(path: PathBuf, meta: &std::fs::Metadata) -> Self {
        let modified = meta.modified().unwrap_or(UNIX_EPOCH);
        let nanos = modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        Self {
            content_type: guess_content_type(&path),
            etag: format!("\"{:x}-{:x}\"", meta.len(), nanos),
            len: meta.len(),
            modified,
            path,
        }
    }

    /// Manifests may be rewritten by a later transcode, so they are never
    /// range-served or cached by clients.
    pub fn is_manifest(&self) -> bool {
        self.path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("m3u8"))
    }
}

/// Resolves request paths against a canonical root and caches the results.
///
/// Cached entries are revalidated against the file's modification time and
/// length on every lookup, so a re-published stream is picked up at once.
#[derive(Debug, Clone)]
pub struct AssetResolver {
    root: Arc<PathBuf>,
    cache: Arc<DashMap<PathBuf, ServedAsset>>,
}

impl AssetResolver {
    /// The root must exist; it is canonicalized once here.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let canonical = root
            .canonicalize()
            .map_err(|_| Error::not_found("directory", root.display()))?;
        if !canonical.is_dir() {
            return Err(Error::invalid(format!("{} is not a directory", root.display())));
        }
        Ok(Self {
            root: Arc::new(canonical),
            cache: Arc::new(DashMap::new()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of cached assets.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    /// Resolve an already percent-decoded request path to a servable file.
    pub fn lookup(&self, requested: &str) -> Result<ServedAsset> {
        let path = resolve_under(&self.root, requested)?;
        let meta = std::fs::metadata(&path)?;

        if let Some(cached) = self.cache.get(&path) {
            if cached.len == meta.len() && Some(cached.modified) == meta.modified().ok() {
                return Ok(cached.clone());
            }
        }

        let asset = ServedAsset::from_metadata(path.clone(), &meta);
        self.cache.insert(path, asset.clone());
        Ok(asset)
    }
}

/// Join `requested` onto `root` and make sure the result stays inside it.
///
/// Only plain file-name components are accepted. The joined path is then
/// canonicalized so a symlink pointing outside the root is refused as well.
pub fn resolve_under(root: &Path, requested: &str) -> Result<PathBuf> {
    if requested.contains('\0') {
        return Err(Error::Forbidden(requested.escape_default().to_string()));
    }
    let relative = Path::new(requested);
    for component in relative.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::Forbidden(requested.to_string()));
            }
        }
    }

    let joined = root.join(relative);
    let canonical = match joined.canonicalize() {
        Ok(p) => p,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::not_found("file", requested));
        }
        Err(e) => return Err(e.into()),
    };

    if !canonical.starts_with(root) {
        return Err(Error::Forbidden(requested.to_string()));
    }
    if !canonical.is_file() {
        return Err(Error::not_found("file", requested));
    }
    Ok(canonical)
}
