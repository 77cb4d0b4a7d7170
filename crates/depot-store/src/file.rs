//! # Local File Store
//!
//! The leaf of the storage chain. Each descriptor id maps onto a path under
//! the store root, one directory level per `/`-separated id segment:
//!
//! ```text
//! {root}/nlp/File/local/lang=en/stopwords.txt
//! {root}/nlp/File/local/lang=en/stopwords.txt.meta
//! {root}/logs/File/local/events_/1700000000_1700259200
//! ```
//!
//! ## Atomicity
//!
//! Writes go to a temporary file in the target directory which is then
//! renamed over the destination, so readers see either the old bytes or the
//! new bytes, never a partial file.
//!
//! ## Ranged Artifacts
//!
//! A ranged id ends in `name_/start_end`, so every slice of one artifact
//! lands in the same `name_` directory. Range queries list that directory
//! and return the slices whose windows intersect the query.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use depot_core::{AnyDesc, TimeRange};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::NamedTempFile;

use crate::error::StoreError;
use crate::meta::MetaData;
use crate::store::{Slice, Store};

const META_SUFFIX: &str = ".meta";
const GZ_SUFFIX: &str = ".gz";

/// A descriptor-keyed store on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        if !root.exists() {
            fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
            tracing::info!(root = %root.display(), "created depot store directory");
        }
        Ok(Self { root })
    }

    /// The store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for a descriptor's bytes.
    pub fn path_for(&self, desc: &AnyDesc) -> Result<PathBuf, StoreError> {
        self.path_for_id(desc.id())
    }

    /// Path for the bytes stored under a raw id.
    pub fn path_for_id(&self, id: &str) -> Result<PathBuf, StoreError> {
        let mut path = self.root.clone();
        for segment in id.split('/') {
            if segment.is_empty() {
                return Err(StoreError::InvalidId(id.to_string()));
            }
            path.push(encode_segment(segment));
        }
        Ok(path)
    }

    /// The metadata record written alongside `id`, if there is one.
    pub fn record(&self, id: &str) -> Result<Option<MetaData>, StoreError> {
        read_meta(&Self::meta_path(&self.path_for_id(id)?))
    }

    /// Every metadata record under `tag`, or under the whole root.
    /// Unreadable records are logged and skipped.
    pub fn records(&self, tag: Option<&str>) -> Result<Vec<MetaData>, StoreError> {
        let dir = match tag {
            Some(tag) => self.root.join(encode_segment(tag)),
            None => self.root.clone(),
        };
        let mut out = Vec::new();
        walk_meta(&dir, &mut |meta| out.push(meta))?;
        out.sort_by(|a, b| a.desc.id().cmp(b.desc.id()));
        Ok(out)
    }

    fn meta_path(path: &Path) -> PathBuf {
        let mut s = path.as_os_str().to_os_string();
        s.push(META_SUFFIX);
        PathBuf::from(s)
    }

    fn read_bytes(path: &Path, compressed: bool) -> Result<Option<Vec<u8>>, StoreError> {
        let raw = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(path, e)),
        };
        if !compressed {
            return Ok(Some(raw));
        }
        let mut out = Vec::new();
        GzDecoder::new(raw.as_slice())
            .read_to_end(&mut out)
            .map_err(|e| StoreError::io(path, e))?;
        Ok(Some(out))
    }

    fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        let dir = path
            .parent()
            .ok_or_else(|| StoreError::InvalidId(path.display().to_string()))?;
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
        tmp.write_all(bytes).map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.as_file().sync_all().map_err(|e| StoreError::io(tmp.path(), e))?;
        tmp.persist(path).map_err(|e| StoreError::io(path, e.error))?;
        Ok(())
    }

    fn remove_file(path: &Path) -> Result<(), StoreError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(path, e)),
        }
    }

    /// Windows of every stored slice in `desc`'s slice directory.
    pub fn list_slices(&self, desc: &AnyDesc) -> Result<Vec<TimeRange>, StoreError> {
        Ok(self
            .slice_files(desc)?
            .into_iter()
            .map(|(range, _)| range)
            .collect())
    }

    fn slice_files(&self, desc: &AnyDesc) -> Result<Vec<(TimeRange, PathBuf)>, StoreError> {
        if desc.range().is_none() {
            return Ok(Vec::new());
        }
        let path = self.path_for(desc)?;
        let Some(dir) = path.parent() else {
            return Ok(Vec::new());
        };
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(dir, e)),
        };
        let mut slices = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(dir, e))?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if name.ends_with(META_SUFFIX) {
                continue;
            }
            let segment = if desc.is_compressed() {
                match name.strip_suffix(GZ_SUFFIX) {
                    Some(s) => s,
                    None => continue,
                }
            } else {
                name
            };
            if let Some(range) = TimeRange::parse_segment(segment) {
                slices.push((range, entry.path()));
            }
        }
        slices.sort_by_key(|(range, _)| (range.start(), range.end()));
        Ok(slices)
    }
}

impl Store for FileStore {
    fn get(&self, desc: &AnyDesc) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(desc)?;
        let bytes = Self::read_bytes(&path, desc.is_compressed())?;
        if bytes.is_some() {
            tracing::debug!(id = %desc, "loaded from local store");
        }
        Ok(bytes)
    }

    fn get_range(&self, desc: &AnyDesc) -> Result<Vec<Slice>, StoreError> {
        let Some(query) = desc.range() else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for (range, path) in self.slice_files(desc)? {
            if !range.intersects(query) {
                continue;
            }
            if let Some(bytes) = Self::read_bytes(&path, desc.is_compressed())? {
                out.push(Slice { range, bytes });
            }
        }
        tracing::debug!(id = %desc, slices = out.len(), "loaded ranged slices from local store");
        Ok(out)
    }

    fn put(&self, desc: &AnyDesc, bytes: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(desc)?;
        let stored = if desc.is_compressed() {
            let mut enc = GzEncoder::new(Vec::new(), Compression::default());
            enc.write_all(bytes).map_err(|e| StoreError::io(&path, e))?;
            enc.finish().map_err(|e| StoreError::io(&path, e))?
        } else {
            bytes.to_vec()
        };
        Self::write_atomic(&path, &stored)?;

        let meta = MetaData {
            desc: desc.clone(),
            path: path.clone(),
            size: stored.len() as u64,
            stored_at: Utc::now(),
        };
        let meta_path = Self::meta_path(&path);
        let json = serde_json::to_vec_pretty(&meta).map_err(|e| StoreError::Meta {
            path: meta_path.clone(),
            source: e,
        })?;
        Self::write_atomic(&meta_path, &json)?;
        tracing::debug!(id = %desc, size = stored.len(), "stored to local store");
        Ok(())
    }

    fn remove(&self, desc: &AnyDesc) -> Result<(), StoreError> {
        let path = self.path_for(desc)?;
        Self::remove_file(&path)?;
        Self::remove_file(&Self::meta_path(&path))?;
        tracing::debug!(id = %desc, "removed from local store");
        Ok(())
    }

    fn contains(&self, desc: &AnyDesc) -> Result<bool, StoreError> {
        Ok(self.path_for(desc)?.is_file())
    }

    fn metadata(&self, desc: &AnyDesc) -> Result<Option<MetaData>, StoreError> {
        let path = self.path_for(desc)?;
        if let Some(meta) = read_meta(&Self::meta_path(&path))? {
            return Ok(Some(meta));
        }
        // Bytes without a sidecar (copied in by hand): fall back on the
        // filesystem's own record.
        match fs::metadata(&path) {
            Ok(m) if m.is_file() => {
                let stored_at = m
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .map_err(|e| StoreError::io(&path, e))?;
                Ok(Some(MetaData {
                    desc: desc.clone(),
                    path,
                    size: m.len(),
                    stored_at,
                }))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    fn load_keys(&self, partial: &AnyDesc) -> Result<Vec<AnyDesc>, StoreError> {
        let kind = encode_segment(partial.kind());
        let tag_dirs: Vec<PathBuf> = match partial.tag() {
            Some(tag) => vec![self.root.join(encode_segment(tag))],
            None => match fs::read_dir(&self.root) {
                Ok(entries) => entries
                    .filter_map(Result::ok)
                    .map(|e| e.path())
                    .filter(|p| p.is_dir())
                    .collect(),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
                Err(e) => return Err(StoreError::io(&self.root, e)),
            },
        };
        let mut out = Vec::new();
        for tag_dir in tag_dirs {
            walk_meta(&tag_dir.join(&kind), &mut |meta| {
                if partial.partial_match(&meta.desc) {
                    out.push(meta.desc);
                }
            })?;
        }
        out.sort();
        out.dedup();
        Ok(out)
    }

    fn local_path(&self, desc: &AnyDesc) -> Option<PathBuf> {
        self.path_for(desc).ok()
    }
}

/// Visit every readable `.meta` record below `dir`.
fn walk_meta(dir: &Path, visit: &mut dyn FnMut(MetaData)) -> Result<(), StoreError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StoreError::io(dir, e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| StoreError::io(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| StoreError::io(&path, e))?;
        if file_type.is_dir() {
            walk_meta(&path, visit)?;
        } else if path.to_str().is_some_and(|p| p.ends_with(META_SUFFIX)) {
            match read_meta(&path) {
                Ok(Some(meta)) => visit(meta),
                Ok(None) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable metadata record"),
            }
        }
    }
    Ok(())
}

fn read_meta(path: &Path) -> Result<Option<MetaData>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StoreError::Meta {
            path: path.to_path_buf(),
            source: e,
        })
}

/// Make one id segment safe as a file name on common filesystems.
///
/// Injective: `%` is escaped too, and a segment ending in the sidecar
/// suffix has that dot escaped, so no data file is mistaken for the
/// metadata of another.
fn encode_segment(segment: &str) -> String {
    match segment {
        "." => return "%2E".to_string(),
        ".." => return "%2E%2E".to_string(),
        _ => {}
    }
    let mut out = String::with_capacity(segment.len());
    for c in segment.chars() {
        match c {
            '%' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => {
                out.push_str(&format!("%{:02X}", c as u32));
            }
            c if c.is_control() => {
                let mut buf = [0u8; 4];
                for b in c.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("%{b:02X}"));
                }
            }
            c => out.push(c),
        }
    }
    if out.to_ascii_lowercase().ends_with(META_SUFFIX) {
        let dot = out.len() - META_SUFFIX.len();
        out.replace_range(dot..dot + 1, "%2E");
    }
    out
}
