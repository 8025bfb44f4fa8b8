use std::fs;
use std::io::*;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::*;

/// A [Persistence] which keeps one file per key in a given root directory.
///
/// Keys are normally hex digests, but they go through the same path cleanup as any other relative path and are
/// rejected if they would land outside the root.  The root is created on first store and removed entirely by
/// [Persistence::clear].
#[derive(Debug)]
pub struct FilesystemPersistence {
    root_path: PathBuf,
}

fn conv_path(path: impl AsRef<Path>) -> Result<relative_path::RelativePathBuf> {
    relative_path::RelativePathBuf::from_path(path)
        .map_err(|_| Error::new(ErrorKind::Other, "Invalid path"))
}

fn ignore_not_found(res: Result<()>) -> Result<()> {
    match res {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

impl FilesystemPersistence {
    pub fn new(root_path: &Path) -> FilesystemPersistence {
        FilesystemPersistence {
            root_path: root_path.to_path_buf(),
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Where the bytes for `key` live.
    pub fn path_for(&self, key: &ResourceKey) -> Result<PathBuf> {
        // On Windows, canonicalize is currently very broken when relative path segments appear in the middle of a
        // path, and stdlib doesn't help us out. Go via `RelativePathBuf` to clean it up.
        let absolute = conv_path(key.as_str())?.to_logical_path(&self.root_path);
        if !absolute.starts_with(&self.root_path) || absolute == self.root_path {
            return Err(Error::new(
                ErrorKind::Other,
                "key maps outside the persistence root directory",
            ));
        }
        Ok(absolute)
    }

    /// Remove every entry last written more than `max_age` ago, returning how many were removed.
    pub fn delete_entries_older_than(&self, max_age: Duration) -> Result<usize> {
        let entries = match fs::read_dir(&self.root_path) {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let now = SystemTime::now();
        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let meta = entry.metadata()?;
            if !meta.is_file() {
                continue;
            }
            let age = now
                .duration_since(meta.modified()?)
                .unwrap_or(Duration::from_secs(0));
            if age > max_age {
                ignore_not_found(fs::remove_file(entry.path()))?;
                removed += 1;
            }
        }

        log::debug!(
            "Expired {} entries from {}",
            removed,
            self.root_path.display()
        );
        Ok(removed)
    }
}

impl Persistence for FilesystemPersistence {
    fn exists(&self, key: &ResourceKey) -> bool {
        self.path_for(key).map(|p| p.is_file()).unwrap_or(false)
    }

    fn load(&self, key: &ResourceKey) -> Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn store(&self, key: &ResourceKey, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.root_path)?;

        // Write next to the destination and rename over it, so readers only ever see complete files.
        let mut tmp = tempfile::NamedTempFile::new_in(&self.root_path)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    fn invalidate(&self, key: &ResourceKey) -> Result<()> {
        ignore_not_found(fs::remove_file(self.path_for(key)?))
    }

    fn clear(&self) -> Result<()> {
        ignore_not_found(fs::remove_dir_all(&self.root_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_load_invalidate() {
        let tmp_dir = tempfile::tempdir().unwrap();

        // Under a not yet existing directory, so that store has to create it.
        let root = tmp_dir.path().join("images");
        let persistence = FilesystemPersistence::new(&root);
        let key = ResourceKey::from_uri("http://example.com/a.png");

        assert!(!persistence.exists(&key));
        assert_eq!(persistence.load(&key).unwrap(), None);
        persistence.invalidate(&key).expect("Missing keys are fine");

        persistence.store(&key, b"abcd").unwrap();
        assert!(persistence.exists(&key));
        assert_eq!(persistence.load(&key).unwrap().as_deref(), Some(&b"abcd"[..]));
        assert_eq!(
            std::fs::read(root.join(key.as_str())).unwrap(),
            b"abcd".to_vec()
        );

        // Storing again replaces the bytes.
        persistence.store(&key, b"efg").unwrap();
        assert_eq!(persistence.load(&key).unwrap().as_deref(), Some(&b"efg"[..]));

        persistence.invalidate(&key).unwrap();
        assert!(!persistence.exists(&key));

        // No temporary files left behind.
        assert_eq!(std::fs::read_dir(&root).unwrap().count(), 0);
    }

    #[test]
    fn test_clear() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let root = tmp_dir.path().join("images");
        let persistence = FilesystemPersistence::new(&root);

        persistence.clear().expect("Clearing a missing root is fine");

        let a = ResourceKey::from_uri("a");
        let b = ResourceKey::from_uri("b");
        persistence.store(&a, b"a").unwrap();
        persistence.store(&b, b"b").unwrap();

        // Something outside the root must survive.
        std::fs::write(tmp_dir.path().join("outside"), "x").unwrap();

        persistence.clear().unwrap();
        assert!(!persistence.exists(&a));
        assert!(!persistence.exists(&b));
        assert!(!root.exists());
        assert!(tmp_dir.path().join("outside").exists());

        // Usable again afterwards.
        persistence.store(&a, b"a").unwrap();
        assert!(persistence.exists(&a));
    }

    #[test]
    fn test_delete_entries_older_than() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let persistence = FilesystemPersistence::new(tmp_dir.path());
        assert_eq!(
            FilesystemPersistence::new(&tmp_dir.path().join("missing"))
                .delete_entries_older_than(Duration::from_secs(0))
                .unwrap(),
            0
        );

        let a = ResourceKey::from_uri("a");
        persistence.store(&a, b"a").unwrap();

        // Nothing is a day old.
        assert_eq!(
            persistence
                .delete_entries_older_than(Duration::from_secs(86400))
                .unwrap(),
            0
        );
        assert!(persistence.exists(&a));

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(
            persistence
                .delete_entries_older_than(Duration::from_millis(1))
                .unwrap(),
            1
        );
        assert!(!persistence.exists(&a));
    }
}
