pub mod fixtures;

use tempfile::TempDir;
use tessera_storage::FilesystemChunkStore;

/// A chunk store rooted in a fresh temporary directory.
pub async fn temp_store() -> (TempDir, FilesystemChunkStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FilesystemChunkStore::new(dir.path().join("temp"), dir.path().join("static"))
        .await
        .expect("store");
    (dir, store)
}
