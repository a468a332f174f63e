/*!
This module contains utilities for managing file names used by the engine.

Files are rooted at `<base_dir>/<namespace>/` as provided to
[`Engine::open`](crate::Engine::open).

Files (and their name formats) used by the engine are as follows:

- Namespace lock file: `./LOCK`
- Write-ahead log segments: `./wal/[0-9]{5}.seg`
- Persistent store: `./store.db`
*/

use std::path::{Path, PathBuf};

/// The name of the namespace lock file.
pub(crate) const LOCK_FILE: &str = "LOCK";

/// The directory name that write-ahead log segments are stored in.
pub(crate) const WAL_DIR: &str = "wal";

/// Suffix for write-ahead log segment files.
pub(crate) const SEGMENT_EXT: &str = "seg";

/// The directory name of the persistent store.
pub(crate) const STORE_DIR: &str = "store.db";

/// Various utilities for managing the file and folder names that RillDB uses.
#[derive(Debug)]
pub(crate) struct FileNameHandler {
    namespace_path: PathBuf,
}

/// Crate-only methods
impl FileNameHandler {
    /// Create a new instance of the [`FileNameHandler`] rooted at the namespace directory.
    pub(crate) fn new(base_dir: &Path, namespace: &str) -> Self {
        let mut namespace_path = PathBuf::from(base_dir);
        namespace_path.push(namespace);

        FileNameHandler { namespace_path }
    }

    /// Get the path to the namespace directory as a [`PathBuf`].
    pub(crate) fn namespace_path(&self) -> PathBuf {
        self.namespace_path.clone()
    }

    /// Resolve the path to the lock file.
    pub(crate) fn lock_file_path(&self) -> PathBuf {
        let mut buf = self.namespace_path();
        buf.push(LOCK_FILE);

        buf
    }

    /// Resolve the path to the write-ahead log directory.
    pub(crate) fn wal_dir(&self) -> PathBuf {
        let mut buf = self.namespace_path();
        buf.push(WAL_DIR);

        buf
    }

    /// Resolve the path to the persistent store directory.
    pub(crate) fn store_path(&self) -> PathBuf {
        let mut buf = self.namespace_path();
        buf.push(STORE_DIR);

        buf
    }
}

/// Resolve the path of a specific segment file inside a WAL directory.
pub(crate) fn segment_file_path(wal_dir: &Path, segment_id: u32) -> PathBuf {
    let mut buf = PathBuf::from(wal_dir);
    buf.push(format!("{segment_id:05}"));
    buf.set_extension(SEGMENT_EXT);

    buf
}

/// Parse a segment id from a segment file path. Returns [`None`] for non-segment files.
pub(crate) fn parse_segment_id(path: &Path) -> Option<u32> {
    if path.extension().and_then(|ext| ext.to_str()) != Some(SEGMENT_EXT) {
        return None;
    }

    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.parse::<u32>().ok())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn resolves_namespace_relative_paths() {
        let handler = FileNameHandler::new(Path::new("/tmp/rill"), "orders");

        assert_eq!(handler.lock_file_path(), PathBuf::from("/tmp/rill/orders/LOCK"));
        assert_eq!(handler.wal_dir(), PathBuf::from("/tmp/rill/orders/wal"));
        assert_eq!(handler.store_path(), PathBuf::from("/tmp/rill/orders/store.db"));
    }

    #[test]
    fn segment_names_round_trip() {
        let dir = PathBuf::from("/tmp/rill/orders/wal");
        let path = segment_file_path(&dir, 42);

        assert_eq!(path, PathBuf::from("/tmp/rill/orders/wal/00042.seg"));
        assert_eq!(parse_segment_id(&path), Some(42));
        assert_eq!(parse_segment_id(Path::new("/tmp/whatever.txt")), None);
    }
}
