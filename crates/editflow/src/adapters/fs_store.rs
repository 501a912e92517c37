//! Object store on the local filesystem.

use std::fs;
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use super::{AdapterError, ObjectStore};

const SERVICE: &str = "fs-store";
const FILE_SCHEME: &str = "file://";

/// Stores objects as files under `root`. Keys are relative paths.
///
/// Writes land in a temporary sibling first and are renamed into place, so a
/// reader never sees a half-written object and repeated puts under one key
/// simply replace it.
pub struct FsObjectStore {
    root: PathBuf,
    public_base_url: Option<String>,
}

impl FsObjectStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            public_base_url: None,
        }
    }

    /// Hand out `{base}/{key}` references instead of `file://` paths.
    pub fn with_public_base_url(mut self, base: impl Into<String>) -> Self {
        let base = base.into();
        self.public_base_url = Some(base.trim_end_matches('/').to_string());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, AdapterError> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn reference_for(&self, key: &str, path: &Path) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}/{}", base, key),
            None => format!("{}{}", FILE_SCHEME, path.display()),
        }
    }

    fn path_from_reference(&self, reference: &str) -> Result<PathBuf, AdapterError> {
        if let Some(base) = &self.public_base_url {
            if let Some(key) = reference
                .strip_prefix(base.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
            {
                return self.path_for(key);
            }
        }
        if let Some(path) = reference.strip_prefix(FILE_SCHEME) {
            let path = PathBuf::from(path);
            let relative = path.strip_prefix(&self.root).map_err(|_| {
                AdapterError::permanent(
                    SERVICE,
                    format!("reference outside the store root: {}", reference),
                )
            })?;
            return self.path_for(&relative.to_string_lossy());
        }
        Err(AdapterError::permanent(
            SERVICE,
            format!("unrecognized object reference: {}", reference),
        ))
    }
}

impl ObjectStore for FsObjectStore {
    fn put(&self, key: &str, bytes: &[u8]) -> Result<String, AdapterError> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error("create directory", parent, e))?;
        }

        let tmp = path.with_file_name(format!(
            ".{}.{}.tmp",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            uuid::Uuid::new_v4()
        ));
        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&tmp, &path)
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp);
            return Err(io_error("write", &path, e));
        }

        log::debug!("Stored {} bytes at {}", bytes.len(), path.display());
        Ok(self.reference_for(key, &path))
    }

    fn get(&self, reference: &str) -> Result<Vec<u8>, AdapterError> {
        let path = self.path_from_reference(reference)?;
        fs::read(&path).map_err(|e| io_error("read", &path, e))
    }

    fn head(&self, key: &str) -> Result<Option<String>, AdapterError> {
        let path = self.path_for(key)?;
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(Some(self.reference_for(key, &path))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("stat", &path, e)),
        }
    }
}

/// Keys must be non-empty relative paths without `..` segments.
fn validate_key(key: &str) -> Result<(), AdapterError> {
    let path = Path::new(key);
    let valid = !key.is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
    if valid {
        Ok(())
    } else {
        Err(AdapterError::permanent(
            SERVICE,
            format!("invalid object key: '{}'", key),
        ))
    }
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> AdapterError {
    let message = format!("failed to {} '{}': {}", action, path.display(), e);
    match e.kind() {
        IoErrorKind::NotFound | IoErrorKind::PermissionDenied | IoErrorKind::InvalidInput => {
            AdapterError::permanent(SERVICE, message)
        }
        _ => AdapterError::transient(SERVICE, message),
    }
}
