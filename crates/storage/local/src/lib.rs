//! Filesystem backend.
//!
//! Layout under the root:
//!
//! ```text
//! metadata/<owner>/<id>.json
//! data/<owner>/<id>
//! locks/<owner>.lock
//! ```
//!
//! Every file is replaced with a temp-file rename, so readers never see a
//! partial write. Mutations hold an exclusive per-owner lock file.

use std::{
    fs::{self, File},
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};

use fragments_core::{
    traits::{DataStore, FragmentListing, MetadataStore},
    Fragment, OwnerId,
};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LocalError {
    #[error("io error: {0}")]
    Io(String),
    #[error("serde error: {0}")]
    Serde(String),
    #[error("invalid storage key: {0}")]
    InvalidKey(String),
}

fn io(e: std::io::Error) -> LocalError {
    LocalError::Io(e.to_string())
}

const METADATA_DIR: &str = "metadata";
const DATA_DIR: &str = "data";
const LOCKS_DIR: &str = "locks";
const TMP_PREFIX: &str = ".tmp-";

/// Owner keys and fragment ids become path components; anything that could
/// escape its directory is never a valid key.
fn is_safe_component(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 128
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn safe_key(owner: &OwnerId, id: &str) -> bool {
    is_safe_component(owner.as_str()) && is_safe_component(id)
}

pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, LocalError> {
        let root = root.as_ref().to_path_buf();
        for dir in [METADATA_DIR, DATA_DIR, LOCKS_DIR] {
            fs::create_dir_all(root.join(dir)).map_err(io)?;
        }
        debug!(root = %root.display(), "local storage opened");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn metadata_dir(&self, owner: &OwnerId) -> PathBuf {
        self.root.join(METADATA_DIR).join(owner.as_str())
    }

    fn metadata_path(&self, owner: &OwnerId, id: &str) -> PathBuf {
        self.metadata_dir(owner).join(format!("{id}.json"))
    }

    fn data_path(&self, owner: &OwnerId, id: &str) -> PathBuf {
        self.root.join(DATA_DIR).join(owner.as_str()).join(id)
    }

    fn lock_path(&self, owner: &OwnerId) -> PathBuf {
        self.root.join(LOCKS_DIR).join(format!("{owner}.lock"))
    }

    /// Run `f` while holding the owner's exclusive lock.
    fn with_owner_lock<T>(
        &self,
        owner: &OwnerId,
        f: impl FnOnce() -> Result<T, LocalError>,
    ) -> Result<T, LocalError> {
        let lockf = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path(owner))
            .map_err(io)?;
        fs4::FileExt::lock_exclusive(&lockf).map_err(io)?;
        let res = f();
        let _ = fs4::FileExt::unlock(&lockf);
        res
    }

    fn replace(&self, owner: &OwnerId, id: &str, path: &Path, bytes: &[u8]) -> Result<(), LocalError> {
        if !safe_key(owner, id) {
            return Err(LocalError::InvalidKey(format!("{owner}/{id}")));
        }
        self.with_owner_lock(owner, || {
            let dir = path
                .parent()
                .ok_or_else(|| LocalError::InvalidKey(path.display().to_string()))?;
            fs::create_dir_all(dir).map_err(io)?;
            let tmp = dir.join(format!("{TMP_PREFIX}{id}-{}", uuid::Uuid::new_v4()));
            write_atomic(&tmp, path, bytes)
        })
    }

    fn remove(&self, owner: &OwnerId, id: &str, path: &Path) -> Result<bool, LocalError> {
        if !safe_key(owner, id) {
            return Ok(false);
        }
        self.with_owner_lock(owner, || match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io(e)),
        })
    }

    fn load_metadata(path: &Path) -> Result<Option<Fragment>, LocalError> {
        match fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| LocalError::Serde(format!("{}: {e}", path.display()))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io(e)),
        }
    }

    fn listed_ids(&self, owner: &OwnerId) -> Result<Vec<String>, LocalError> {
        if !is_safe_component(owner.as_str()) {
            return Ok(Vec::new());
        }
        let entries = match fs::read_dir(self.metadata_dir(owner)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io(e)),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io)?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(TMP_PREFIX) {
                continue;
            }
            match name.strip_suffix(".json") {
                Some(id) if is_safe_component(id) => ids.push(id.to_owned()),
                _ => warn!(owner = %owner, file = name, "skipping unexpected metadata file"),
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl MetadataStore for LocalStorage {
    type Error = LocalError;

    fn read_metadata(&self, owner: &OwnerId, id: &str) -> Result<Option<Fragment>, Self::Error> {
        if !safe_key(owner, id) {
            return Ok(None);
        }
        let found = Self::load_metadata(&self.metadata_path(owner, id))?;
        debug!(fragment_id = id, owner = %owner, hit = found.is_some(), "local metadata read");
        Ok(found)
    }

    fn write_metadata(&self, fragment: &Fragment) -> Result<(), Self::Error> {
        let owner = fragment.owner_id();
        let bytes =
            serde_json::to_vec_pretty(fragment).map_err(|e| LocalError::Serde(e.to_string()))?;
        let path = self.metadata_path(owner, fragment.id());
        self.replace(owner, fragment.id(), &path, &bytes)?;
        debug!(fragment_id = fragment.id(), owner = %owner, "local metadata committed");
        Ok(())
    }

    fn list_metadata(&self, owner: &OwnerId, expand: bool) -> Result<FragmentListing, Self::Error> {
        let ids = self.listed_ids(owner)?;
        debug!(owner = %owner, count = ids.len(), expand, "local metadata listed");
        if !expand {
            return Ok(FragmentListing::Ids(ids));
        }
        let mut frags = Vec::with_capacity(ids.len());
        for id in ids {
            // Removed between the directory scan and the read.
            if let Some(f) = Self::load_metadata(&self.metadata_path(owner, &id))? {
                frags.push(f);
            }
        }
        Ok(FragmentListing::Expanded(frags))
    }

    fn delete_metadata(&self, owner: &OwnerId, id: &str) -> Result<bool, Self::Error> {
        let removed = self.remove(owner, id, &self.metadata_path(owner, id))?;
        debug!(fragment_id = id, owner = %owner, removed, "local metadata delete");
        Ok(removed)
    }
}

impl DataStore for LocalStorage {
    type Error = LocalError;

    fn read_data(&self, owner: &OwnerId, id: &str) -> Result<Option<Vec<u8>>, Self::Error> {
        if !safe_key(owner, id) {
            return Ok(None);
        }
        match fs::read(self.data_path(owner, id)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io(e)),
        }
    }

    fn write_data(&self, owner: &OwnerId, id: &str, data: &[u8]) -> Result<(), Self::Error> {
        self.replace(owner, id, &self.data_path(owner, id), data)?;
        debug!(fragment_id = id, owner = %owner, bytes = data.len(), "local data committed");
        Ok(())
    }

    fn delete_data(&self, owner: &OwnerId, id: &str) -> Result<bool, Self::Error> {
        self.remove(owner, id, &self.data_path(owner, id))
    }
}

fn write_atomic(tmp: &Path, final_path: &Path, data: &[u8]) -> Result<(), LocalError> {
    {
        let mut f = File::create(tmp).map_err(io)?;
        f.write_all(data).map_err(io)?;
        f.sync_all().map_err(io)?;
    }
    if let Err(e) = fs::rename(tmp, final_path) {
        let _ = fs::remove_file(tmp);
        return Err(io(e));
    }
    // fsync directory
    if let Some(dir) = final_path.parent() {
        let dir_file = File::open(dir).map_err(io)?;
        dir_file.sync_all().map_err(io)?;
    }
    Ok(())
}
