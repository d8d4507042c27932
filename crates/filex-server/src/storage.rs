//! Flat namespace of stored objects on the server's filesystem.
//!
//! Uploads are written to a staging file under `<root>/.staging` and
//! renamed over the object only once the whole payload has arrived, so a
//! failed upload never touches an existing object.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs::{File, OpenOptions};
use tracing::{debug, warn};

/// Staging directory name, relative to the storage root.
const STAGING_DIR: &str = ".staging";

static NEXT_STAGING_ID: AtomicU64 = AtomicU64::new(1);

/// Errors produced by the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid object name: {0}")]
    InvalidName(String),
}

/// Stored objects live as plain files directly under `root`.
///
/// Concurrent writers of the same name are not serialized: whichever
/// commits last wins.
#[derive(Debug, Clone)]
pub struct Storage {
    root: PathBuf,
    allow_unsafe_names: bool,
}

impl Storage {
    /// Opens the storage directory, creating it if needed.
    ///
    /// Staging files left behind by an earlier run are removed.
    pub async fn open(
        root: impl Into<PathBuf>,
        allow_unsafe_names: bool,
    ) -> Result<Self, StorageError> {
        let root = root.into();
        let staging = root.join(STAGING_DIR);
        tokio::fs::create_dir_all(&staging).await?;

        let mut leftovers = tokio::fs::read_dir(&staging).await?;
        while let Some(entry) = leftovers.next_entry().await? {
            let path = entry.path();
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!(path = %path.display(), "removed stale staging file"),
                Err(e) => warn!(path = %path.display(), "failed to remove stale staging file: {e}"),
            }
        }

        debug!(root = %root.display(), allow_unsafe_names, "storage ready");
        Ok(Self {
            root,
            allow_unsafe_names,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps an object name to its path under the root.
    ///
    /// Unless unsafe names are allowed, anything other than a single plain
    /// file name is rejected.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, StorageError> {
        if !self.allow_unsafe_names {
            validate_object_name(name)?;
        }
        Ok(self.root.join(name))
    }

    /// Starts an upload of `name` into a fresh staging file.
    ///
    /// The object itself is untouched until [`commit`](Self::commit).
    pub async fn begin_upload(&self, name: &str) -> Result<Upload, StorageError> {
        let target = self.resolve(name)?;
        let id = NEXT_STAGING_ID.fetch_add(1, Ordering::Relaxed);
        let staging = self
            .root
            .join(STAGING_DIR)
            .join(format!("{}-{id}.part", std::process::id()));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staging)
            .await?;
        debug!(staging = %staging.display(), target = %target.display(), "upload staged");
        Ok(Upload {
            file,
            staging,
            target,
        })
    }

    /// Moves a fully received upload over its object.
    ///
    /// On failure the staging file is removed and the object is left as
    /// it was.
    pub async fn commit(&self, upload: Upload) -> Result<PathBuf, StorageError> {
        let Upload {
            file,
            staging,
            target,
        } = upload;
        drop(file);
        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            remove_staging(&staging).await;
            return Err(e.into());
        }
        Ok(target)
    }

    /// Throws away an upload that did not complete.
    pub async fn abandon(&self, upload: Upload) {
        let Upload { file, staging, .. } = upload;
        drop(file);
        remove_staging(&staging).await;
    }

    /// Opens the object `name` for reading.
    ///
    /// Returns `None` if no regular file by that name exists.
    pub async fn open_object(&self, name: &str) -> Result<Option<File>, StorageError> {
        let path = self.resolve(name)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(Some(File::open(&path).await?)),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Names of all stored objects, sorted.
    ///
    /// Only regular files count as objects; directories, including the
    /// staging directory, are skipped.
    pub async fn list(&self) -> Result<Vec<String>, StorageError> {
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// An upload in progress: payload bytes go to a staging file until the
/// upload is committed or abandoned.
#[derive(Debug)]
pub struct Upload {
    file: File,
    staging: PathBuf,
    target: PathBuf,
}

impl Upload {
    /// The staging file that receives the payload.
    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// Where the object will land on commit.
    pub fn target(&self) -> &Path {
        &self.target
    }
}

async fn remove_staging(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), "failed to remove staging file: {e}");
    }
}

/// Validates that `name` is a single plain file name.
///
/// Rejects:
/// - Empty names
/// - Absolute paths (Unix `/` or Windows `C:\`)
/// - Anything with more than one component, including `a/b`
/// - `.` and `..`
/// - Windows drive or UNC prefixes
pub fn validate_object_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty() {
        return Err(StorageError::InvalidName("empty name".into()));
    }

    if name.contains(['/', '\\']) {
        return Err(StorageError::InvalidName(format!(
            "path separators not allowed: {name}"
        )));
    }

    if name.len() >= 2 && name.as_bytes()[1] == b':' {
        return Err(StorageError::InvalidName(format!(
            "drive prefix not allowed: {name}"
        )));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(StorageError::InvalidName(format!(
            "not a plain file name: {name}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_name() {
        assert!(validate_object_name("").is_err());
    }

    #[test]
    fn rejects_parent_traversal() {
        assert!(validate_object_name("..").is_err());
        assert!(validate_object_name("../secret").is_err());
        assert!(validate_object_name("a/../../etc").is_err());
    }

    #[test]
    fn rejects_absolute_and_nested() {
        assert!(validate_object_name("/etc/passwd").is_err());
        assert!(validate_object_name("sub/file.txt").is_err());
        assert!(validate_object_name("sub\\file.txt").is_err());
    }

    #[test]
    fn rejects_windows_prefixes() {
        assert!(validate_object_name("C:evil").is_err());
        assert!(validate_object_name("\\\\server\\share").is_err());
    }

    #[test]
    fn rejects_current_dir() {
        assert!(validate_object_name(".").is_err());
    }

    #[test]
    fn accepts_plain_names() {
        assert!(validate_object_name("report.txt").is_ok());
        assert!(validate_object_name(".hidden").is_ok());
        assert!(validate_object_name("archive.tar.gz").is_ok());
        assert!(validate_object_name("..dots").is_ok());
    }

    #[tokio::test]
    async fn open_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("uploads");
        let storage = Storage::open(&root, false).await.unwrap();
        assert!(root.is_dir());
        assert_eq!(storage.root(), root);
    }

    #[tokio::test]
    async fn list_is_sorted_and_stable() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path(), false).await.unwrap();
        assert!(storage.list().await.unwrap().is_empty());
        std::fs::create_dir(dir.path().join("subdir")).unwrap();

        std::fs::write(dir.path().join("b.bin"), b"b").unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();

        let first = storage.list().await.unwrap();
        let second = storage.list().await.unwrap();
        assert_eq!(first, vec!["a.txt", "b.bin"]);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn open_object_missing_or_directory() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path(), false).await.unwrap();
        std::fs::create_dir(dir.path().join("folder")).unwrap();

        assert!(storage.open_object("missing.txt").await.unwrap().is_none());
        assert!(storage.open_object("folder").await.unwrap().is_none());
    }

    fn staging_entries(root: &Path) -> usize {
        std::fs::read_dir(root.join(STAGING_DIR)).unwrap().count()
    }

    #[tokio::test]
    async fn commit_moves_upload_into_place() {
        use tokio::io::AsyncWriteExt;

        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path(), false).await.unwrap();

        let mut upload = storage.begin_upload("report.txt").await.unwrap();
        upload.file_mut().write_all(b"contents").await.unwrap();
        upload.file_mut().flush().await.unwrap();
        assert!(!dir.path().join("report.txt").exists());
        assert!(storage.list().await.unwrap().is_empty());

        let path = storage.commit(upload).await.unwrap();
        assert_eq!(path, dir.path().join("report.txt"));
        assert_eq!(std::fs::read(&path).unwrap(), b"contents");
        assert_eq!(staging_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn abandoned_upload_keeps_previous_object() {
        use tokio::io::AsyncWriteExt;

        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path(), false).await.unwrap();
        std::fs::write(dir.path().join("report.txt"), b"good version").unwrap();

        let mut upload = storage.begin_upload("report.txt").await.unwrap();
        upload.file_mut().write_all(b"half").await.unwrap();
        storage.abandon(upload).await;

        assert_eq!(
            std::fs::read(dir.path().join("report.txt")).unwrap(),
            b"good version"
        );
        assert_eq!(staging_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn concurrent_uploads_use_separate_staging_files() {
        use tokio::io::AsyncWriteExt;

        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path(), false).await.unwrap();

        let mut first = storage.begin_upload("shared.txt").await.unwrap();
        let mut second = storage.begin_upload("shared.txt").await.unwrap();
        first.file_mut().write_all(b"first").await.unwrap();
        first.file_mut().flush().await.unwrap();
        second.file_mut().write_all(b"second").await.unwrap();
        second.file_mut().flush().await.unwrap();

        storage.commit(first).await.unwrap();
        storage.abandon(second).await;
        assert_eq!(std::fs::read(dir.path().join("shared.txt")).unwrap(), b"first");
    }

    #[tokio::test]
    async fn open_clears_stale_staging_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(STAGING_DIR)).unwrap();
        std::fs::write(dir.path().join(STAGING_DIR).join("1-1.part"), b"junk").unwrap();

        Storage::open(dir.path(), false).await.unwrap();
        assert_eq!(staging_entries(dir.path()), 0);
    }

    #[tokio::test]
    async fn hardening_rejects_before_touching_disk() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path().join("uploads"), false)
            .await
            .unwrap();

        let result = storage.begin_upload("../escape.txt").await;
        assert!(matches!(result, Err(StorageError::InvalidName(_))));
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn unsafe_names_pass_through_when_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path().join("uploads"), true)
            .await
            .unwrap();

        let path = storage.resolve("../outside.txt").unwrap();
        assert_eq!(path, dir.path().join("uploads").join("../outside.txt"));
    }
}
