//! File-based backing store for persistent pulse files.

use crate::backend::{BackingStore, NodeId, RowIndex, SegmentData, SegmentInfo, SegmentLayout};
use crate::error::{StorageError, StorageResult};
use crate::image::{decode_image, encode_image};
use crate::memory::{InMemoryStore, Tree};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// A file-based backing store.
///
/// The whole tree is held in memory while the file is open and written back
/// as one checksummed image by [`BackingStore::sync`]. The image is written
/// to a sibling temporary file and renamed over the original, so a crash
/// mid-sync leaves the previous image intact.
///
/// # Locking
///
/// An exclusive advisory lock on `<file>.lock` is held for the lifetime of
/// the store; a second open of the same file fails with
/// [`StorageError::Locked`].
///
/// # Example
///
/// ```no_run
/// use pulse_storage::{BackingStore, FileStore};
/// use std::path::Path;
///
/// let mut store = FileStore::open(Path::new("shot_1234.pulse")).unwrap();
/// let node = store.find_or_create_node("equilibrium/time").unwrap();
/// store.write_record(node, Some(b"bytes")).unwrap();
/// store.sync().unwrap(); // Ensure data is durable
/// ```
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    inner: InMemoryStore,
    dirty: bool,
    _lock: File,
}

impl FileStore {
    /// Opens the pulse file at `path`, creating an empty one if it does not
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is locked, unreadable or corrupted.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let lock = Self::acquire_lock(path)?;
        let tree = if path.exists() {
            decode_image(&fs::read(path)?)?
        } else {
            Tree::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            inner: InMemoryStore::from_tree(tree),
            dirty: false,
            _lock: lock,
        })
    }

    /// Opens an existing pulse file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist, is locked, or is
    /// corrupted.
    pub fn open_existing(path: &Path) -> StorageResult<Self> {
        if !path.exists() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("pulse file does not exist: {}", path.display()),
            )));
        }
        Self::open(path)
    }

    /// Creates a new, empty pulse file, replacing any existing one.
    ///
    /// Parent directories are created if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is locked or cannot be written.
    pub fn create(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock = Self::acquire_lock(path)?;
        let mut store = Self {
            path: path.to_path_buf(),
            inner: InMemoryStore::new(),
            dirty: true,
            _lock: lock,
        };
        store.sync()?;
        Ok(store)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether there are changes not yet written by `sync`.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn acquire_lock(path: &Path) -> StorageResult<File> {
        let lock_path = Self::sibling(path, "lock");
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        // Try to acquire exclusive lock (non-blocking)
        if lock.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked(path.display().to_string()));
        }
        Ok(lock)
    }

    fn sibling(path: &Path, extension: &str) -> PathBuf {
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".");
        name.push(extension);
        path.with_file_name(name)
    }

    fn touch(&mut self) -> &mut InMemoryStore {
        self.dirty = true;
        &mut self.inner
    }
}

impl BackingStore for FileStore {
    fn find_or_create_node(&mut self, path: &str) -> StorageResult<NodeId> {
        if let Some(id) = self.inner.find_node(path)? {
            return Ok(id);
        }
        self.touch().find_or_create_node(path)
    }

    fn find_node(&self, path: &str) -> StorageResult<Option<NodeId>> {
        self.inner.find_node(path)
    }

    fn data_nodes_under(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.data_nodes_under(prefix)
    }

    fn read_record(&self, node: NodeId) -> StorageResult<Option<Vec<u8>>> {
        self.inner.read_record(node)
    }

    fn write_record(&mut self, node: NodeId, bytes: Option<&[u8]>) -> StorageResult<()> {
        self.touch().write_record(node, bytes)
    }

    fn segment_count(&self, node: NodeId) -> StorageResult<usize> {
        self.inner.segment_count(node)
    }

    fn segment_limits(&self, node: NodeId, index: usize) -> StorageResult<(f64, f64)> {
        self.inner.segment_limits(node, index)
    }

    fn segment_info(&self, node: NodeId, index: usize) -> StorageResult<SegmentInfo> {
        self.inner.segment_info(node, index)
    }

    fn begin_segment(
        &mut self,
        node: NodeId,
        start: f64,
        end: f64,
        layout: SegmentLayout,
    ) -> StorageResult<()> {
        self.touch().begin_segment(node, start, end, layout)
    }

    fn put_segment_rows(&mut self, node: NodeId, at: RowIndex, rows: &[u8]) -> StorageResult<()> {
        self.touch().put_segment_rows(node, at, rows)
    }

    fn read_segment(&self, node: NodeId, index: usize) -> StorageResult<SegmentData> {
        self.inner.read_segment(node, index)
    }

    fn drop_last_segment(&mut self, node: NodeId) -> StorageResult<()> {
        self.touch().drop_last_segment(node)
    }

    fn update_segment(
        &mut self,
        node: NodeId,
        index: usize,
        start: f64,
        end: f64,
        descriptor: Option<Vec<u8>>,
    ) -> StorageResult<()> {
        self.touch()
            .update_segment(node, index, start, end, descriptor)
    }

    fn delete_node(&mut self, path: &str) -> StorageResult<()> {
        self.touch().delete_node(path)
    }

    fn sync(&mut self) -> StorageResult<()> {
        if !self.dirty {
            return Ok(());
        }
        let image = self.inner.with_tree(encode_image)?;
        let tmp_path = Self::sibling(&self.path, "tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&image)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_create_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shot.pulse");

        {
            let mut store = FileStore::create(&path).unwrap();
            let node = store.find_or_create_node("ids/field").unwrap();
            store.write_record(node, Some(b"persisted")).unwrap();
            store
                .begin_segment(
                    node,
                    0.0,
                    1.0,
                    SegmentLayout {
                        row_size: 1,
                        capacity: 2,
                        descriptor: vec![],
                    },
                )
                .unwrap();
            store.put_segment_rows(node, RowIndex::Append, &[5]).unwrap();
            store.sync().unwrap();
        }

        let store = FileStore::open_existing(&path).unwrap();
        let node = store.find_node("ids/field").unwrap().unwrap();
        assert_eq!(store.read_record(node).unwrap(), Some(b"persisted".to_vec()));
        let segment = store.read_segment(node, 0).unwrap();
        assert_eq!(segment.used_bytes(), &[5]);
        assert_eq!(segment.info.capacity, 2);
    }

    #[test]
    fn file_unsynced_changes_are_lost() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shot.pulse");
        FileStore::create(&path).unwrap();

        {
            let mut store = FileStore::open(&path).unwrap();
            store.find_or_create_node("scratch").unwrap();
            assert!(store.is_dirty());
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.find_node("scratch").unwrap(), None);
    }

    #[test]
    fn file_second_open_is_locked() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shot.pulse");
        let _first = FileStore::create(&path).unwrap();
        assert!(matches!(
            FileStore::open(&path),
            Err(StorageError::Locked(_))
        ));
    }

    #[test]
    fn file_open_existing_requires_file() {
        let dir = tempdir().unwrap();
        let result = FileStore::open_existing(&dir.path().join("missing.pulse"));
        assert!(matches!(result, Err(StorageError::Io(_))));
    }

    #[test]
    fn file_corrupted_image_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shot.pulse");
        fs::write(&path, b"definitely not an image").unwrap();
        assert!(matches!(
            FileStore::open(&path),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn file_create_makes_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a/b/shot.pulse");
        let store = FileStore::create(&path).unwrap();
        assert!(path.exists());
        assert!(!store.is_dirty());
    }
}
