//! File-based storage adapter for persistent storage.

use crate::adapter::{document_id, Document, StorageAdapter};
use crate::error::{StorageError, StorageResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const FILE_EXTENSION: &str = "json";

/// A file-based storage adapter.
///
/// Each `(namespace, collection)` pair is stored as one JSON array at
/// `<root>/<namespace>/<collection>.json`. Data survives process restarts.
///
/// # Durability
///
/// Every mutation rewrites the collection file through a temporary file that
/// is synced and then renamed over the original, so a crash leaves either the
/// old or the new contents on disk.
///
/// # Thread Safety
///
/// This adapter is thread-safe. An internal lock serializes file access.
///
/// # Example
///
/// ```no_run
/// use lodestore_storage::FileAdapter;
/// use std::path::Path;
///
/// let adapter = FileAdapter::open(Path::new("/var/lib/myapp/cache")).unwrap();
/// assert_eq!(adapter.root(), Path::new("/var/lib/myapp/cache"));
/// ```
#[derive(Debug)]
pub struct FileAdapter {
    root: PathBuf,
    io: Mutex<()>,
}

impl FileAdapter {
    /// Opens a file adapter rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: &Path) -> StorageResult<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            io: Mutex::new(()),
        })
    }

    /// Returns the root directory of the adapter.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lists the collections stored in a namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace directory cannot be read.
    pub fn collection_names(&self, namespace: &str) -> StorageResult<Vec<String>> {
        let dir = self.namespace_dir(namespace)?;
        let _guard = self.io.lock();
        list_collections(&dir)
    }

    fn namespace_dir(&self, namespace: &str) -> StorageResult<PathBuf> {
        validate_name(namespace)?;
        Ok(self.root.join(namespace))
    }

    fn collection_path(&self, namespace: &str, collection: &str) -> StorageResult<PathBuf> {
        validate_name(collection)?;
        Ok(self
            .namespace_dir(namespace)?
            .join(format!("{collection}.{FILE_EXTENSION}")))
    }
}

fn validate_name(name: &str) -> StorageResult<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if invalid {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

fn read_collection(path: &Path) -> StorageResult<BTreeMap<String, Document>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };

    let value: Value = serde_json::from_slice(&bytes)?;
    let Value::Array(items) = value else {
        return Err(StorageError::Corrupted(format!(
            "{} does not contain a JSON array",
            path.display()
        )));
    };

    let mut docs = BTreeMap::new();
    for item in items {
        let Value::Object(doc) = item else {
            return Err(StorageError::Corrupted(format!(
                "{} contains a non-object entry",
                path.display()
            )));
        };
        let id = document_id(&doc)
            .ok_or_else(|| {
                StorageError::Corrupted(format!("{} contains a document without _id", path.display()))
            })?
            .to_string();
        docs.insert(id, doc);
    }
    Ok(docs)
}

fn write_collection(path: &Path, docs: &BTreeMap<String, Document>) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let items: Vec<&Document> = docs.values().collect();
    let bytes = serde_json::to_vec(&items)?;

    let tmp = path.with_extension(format!("{FILE_EXTENSION}.tmp"));
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    tracing::debug!(path = %path.display(), documents = items.len(), "wrote collection");
    Ok(())
}

fn remove_file(path: &Path) -> StorageResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn list_collections(dir: &Path) -> StorageResult<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut names = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(FILE_EXTENSION) {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
            names.push(stem.to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[async_trait]
impl StorageAdapter for FileAdapter {
    async fn count(&self, namespace: &str, collection: &str) -> StorageResult<usize> {
        let path = self.collection_path(namespace, collection)?;
        let _guard = self.io.lock();
        Ok(read_collection(&path)?.len())
    }

    async fn find(&self, namespace: &str, collection: &str) -> StorageResult<Vec<Document>> {
        let path = self.collection_path(namespace, collection)?;
        let _guard = self.io.lock();
        Ok(read_collection(&path)?.into_values().collect())
    }

    async fn find_by_id(
        &self,
        namespace: &str,
        collection: &str,
        id: &str,
    ) -> StorageResult<Option<Document>> {
        let path = self.collection_path(namespace, collection)?;
        let _guard = self.io.lock();
        Ok(read_collection(&path)?.remove(id))
    }

    async fn save(
        &self,
        namespace: &str,
        collection: &str,
        docs: Vec<Document>,
    ) -> StorageResult<Vec<Document>> {
        let path = self.collection_path(namespace, collection)?;
        if docs.iter().any(|doc| document_id(doc).is_none()) {
            return Err(StorageError::MissingId {
                collection: collection.to_string(),
            });
        }
        if docs.is_empty() {
            return Ok(docs);
        }

        let _guard = self.io.lock();
        let mut existing = read_collection(&path)?;
        for doc in &docs {
            if let Some(id) = document_id(doc) {
                existing.insert(id.to_string(), doc.clone());
            }
        }
        write_collection(&path, &existing)?;
        Ok(docs)
    }

    async fn remove_by_id(
        &self,
        namespace: &str,
        collection: &str,
        id: &str,
    ) -> StorageResult<usize> {
        let path = self.collection_path(namespace, collection)?;
        let _guard = self.io.lock();
        let mut existing = read_collection(&path)?;
        if existing.remove(id).is_none() {
            return Ok(0);
        }
        write_collection(&path, &existing)?;
        Ok(1)
    }

    async fn clear(&self, namespace: &str, collection: &str) -> StorageResult<usize> {
        let path = self.collection_path(namespace, collection)?;
        let _guard = self.io.lock();
        let count = read_collection(&path)?.len();
        remove_file(&path)?;
        Ok(count)
    }

    async fn clear_all(&self, namespace: &str, exclude: &[String]) -> StorageResult<()> {
        let dir = self.namespace_dir(namespace)?;
        let _guard = self.io.lock();
        for name in list_collections(&dir)? {
            if exclude.contains(&name) {
                continue;
            }
            remove_file(&dir.join(format!("{name}.{FILE_EXTENSION}")))?;
        }
        Ok(())
    }
}
