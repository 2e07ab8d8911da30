//! Filesystem artifact store keyed by user identifier.
//!
//! Layout under the store root:
//!
//! ```text
//! cookies/{user}.txt      security-question cache
//! timetables/{user}.json  scraped timetable
//! timetables/{user}.ics   calendar file
//! html/{user}.html        rendered timetable view
//! tmp/{user}/{run_id}/    per-run scratch space
//! ```
//!
//! Every write goes to a uniquely named temporary file in the destination
//! directory and is then renamed into place, so concurrent writers for the
//! same key resolve to last-write-wins and readers never observe a torn
//! file. The store performs no locking of its own; run serialization lives
//! in `pipeline::UserRunGuard`.

mod stale;

pub use stale::StaleArtifact;

use crate::core::{ArtifactKind, UserIdentifier};
use crate::errors::CalflowError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::debug;
use uuid::Uuid;

/// Name of the scratch directory under the store root.
const SCRATCH_DIR: &str = "tmp";

/// An artifact opened for reading.
#[derive(Debug)]
pub struct StoredArtifact {
    /// Resolved path of the artifact.
    pub path: PathBuf,
    /// Open file handle positioned at the start.
    pub file: File,
    /// File size in bytes at open time.
    pub len: u64,
}

/// Maps `(UserIdentifier, ArtifactKind)` to files under a fixed root.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Creates a store rooted at `root` without touching the filesystem.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates a store and makes sure every kind directory exists.
    ///
    /// A relative `root` is resolved against the current directory here, so
    /// workers running elsewhere still find the store.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, CalflowError> {
        let store = Self::new(std::path::absolute(root.into())?);
        for kind in ArtifactKind::ALL {
            fs::create_dir_all(store.kind_dir(kind)).await?;
        }
        fs::create_dir_all(store.scratch_root()).await?;
        Ok(store)
    }

    /// Returns the store root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding all artifacts of `kind`.
    #[must_use]
    pub fn kind_dir(&self, kind: ArtifactKind) -> PathBuf {
        self.root.join(kind.directory())
    }

    /// Root of all per-run scratch directories.
    #[must_use]
    pub fn scratch_root(&self) -> PathBuf {
        self.root.join(SCRATCH_DIR)
    }

    /// Resolves the location of an artifact. Pure; performs no I/O.
    #[must_use]
    pub fn resolve_path(&self, user: &UserIdentifier, kind: ArtifactKind) -> PathBuf {
        self.kind_dir(kind).join(kind.file_name(user.as_str()))
    }

    /// Scratch directory for one run, derived from user and run id.
    #[must_use]
    pub fn scratch_path(&self, user: &UserIdentifier, run_id: Uuid) -> PathBuf {
        self.scratch_root()
            .join(user.as_str())
            .join(run_id.as_simple().to_string())
    }

    /// Creates (if needed) and returns the scratch directory for one run.
    pub async fn create_scratch_dir(
        &self,
        user: &UserIdentifier,
        run_id: Uuid,
    ) -> Result<PathBuf, CalflowError> {
        let dir = self.scratch_path(user, run_id);
        fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    /// Removes a run's scratch directory. Missing directories are ignored.
    pub async fn remove_scratch_dir(
        &self,
        user: &UserIdentifier,
        run_id: Uuid,
    ) -> Result<(), CalflowError> {
        let dir = self.scratch_path(user, run_id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        }

        // Drop the per-user parent too once its last run is gone.
        if let Some(parent) = dir.parent() {
            let _ = fs::remove_dir(parent).await;
        }
        Ok(())
    }

    /// Returns true if the artifact exists.
    pub async fn exists(&self, user: &UserIdentifier, kind: ArtifactKind) -> bool {
        fs::try_exists(self.resolve_path(user, kind))
            .await
            .unwrap_or(false)
    }

    /// Writes `bytes` as the artifact, replacing any previous content.
    pub async fn write(
        &self,
        user: &UserIdentifier,
        kind: ArtifactKind,
        bytes: &[u8],
    ) -> Result<PathBuf, CalflowError> {
        let mut reader = bytes;
        self.write_stream(user, kind, &mut reader).await
    }

    /// Streams `reader` into the artifact, replacing any previous content.
    pub async fn write_stream<R>(
        &self,
        user: &UserIdentifier,
        kind: ArtifactKind,
        reader: &mut R,
    ) -> Result<PathBuf, CalflowError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let target = self.resolve_path(user, kind);
        let dir = self.kind_dir(kind);
        fs::create_dir_all(&dir).await?;

        let temp = TempFile::new(dir.join(format!(
            ".{}.{}.tmp",
            kind.file_name(user.as_str()),
            Uuid::new_v4().as_simple()
        )));

        let mut file = File::create(temp.path()).await?;
        tokio::io::copy(reader, &mut file).await?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);
        temp.persist(&target).await?;

        debug!(user = %user, kind = %kind, path = %target.display(), "artifact written");
        Ok(target)
    }

    /// Copies a file produced in a scratch directory into the store.
    ///
    /// The source is left in place so later stages of the same run can
    /// still read it.
    pub async fn promote(
        &self,
        source: &Path,
        user: &UserIdentifier,
        kind: ArtifactKind,
    ) -> Result<PathBuf, CalflowError> {
        let mut file = File::open(source).await?;
        self.write_stream(user, kind, &mut file).await
    }

    /// Opens an artifact for reading.
    ///
    /// Fails with `ArtifactNotFound` if nothing is stored for the key.
    pub async fn open_for_read(
        &self,
        user: &UserIdentifier,
        kind: ArtifactKind,
    ) -> Result<StoredArtifact, CalflowError> {
        let path = self.resolve_path(user, kind);
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CalflowError::ArtifactNotFound {
                    user: user.to_string(),
                    kind,
                })
            }
            Err(e) => return Err(e.into()),
        };

        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(CalflowError::ArtifactNotFound {
                user: user.to_string(),
                kind,
            });
        }

        Ok(StoredArtifact {
            path,
            file,
            len: metadata.len(),
        })
    }

    /// Reads an artifact fully into memory.
    pub async fn read(
        &self,
        user: &UserIdentifier,
        kind: ArtifactKind,
    ) -> Result<Vec<u8>, CalflowError> {
        use tokio::io::AsyncReadExt;

        let mut stored = self.open_for_read(user, kind).await?;
        let mut buf = Vec::with_capacity(usize::try_from(stored.len).unwrap_or(0));
        stored.file.read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

/// Temporary file that is removed unless it was renamed into place.
///
/// Removal happens on drop, so an abandoned write leaves nothing behind.
struct TempFile {
    path: PathBuf,
    persisted: bool,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            persisted: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(mut self, target: &Path) -> std::io::Result<()> {
        fs::rename(&self.path, target).await?;
        self.persisted = true;
        Ok(())
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.persisted {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != ErrorKind::NotFound {
                    debug!(path = %self.path.display(), error = %e, "could not remove temp file");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn user(raw: &str) -> UserIdentifier {
        UserIdentifier::parse(raw).unwrap()
    }

    #[test]
    fn test_resolve_path_is_pure() {
        let store = ArtifactStore::new("/srv/calflow");
        assert_eq!(
            store.resolve_path(&user("12345"), ArtifactKind::CalendarFile),
            PathBuf::from("/srv/calflow/timetables/12345.ics")
        );
        assert_eq!(
            store.resolve_path(&user("12345"), ArtifactKind::SecurityQuestion),
            PathBuf::from("/srv/calflow/cookies/12345.txt")
        );
        assert_eq!(
            store.resolve_path(&user("12345"), ArtifactKind::TimetableView),
            PathBuf::from("/srv/calflow/html/12345.html")
        );
    }

    #[test]
    fn test_scratch_path_is_scoped_by_run() {
        let store = ArtifactStore::new("/srv/calflow");
        let a = store.scratch_path(&user("12345"), Uuid::now_v7());
        let b = store.scratch_path(&user("12345"), Uuid::now_v7());
        assert_ne!(a, b);
        assert!(a.starts_with("/srv/calflow/tmp/12345"));
    }

    #[tokio::test]
    async fn test_open_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path().join("data")).await.unwrap();

        for name in ["cookies", "timetables", "html", "tmp"] {
            assert!(store.root().join(name).is_dir(), "{name} missing");
        }
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let id = user("12345");

        store.write(&id, ArtifactKind::Timetable, b"{}").await.unwrap();
        assert!(store.exists(&id, ArtifactKind::Timetable).await);
        assert_eq!(store.read(&id, ArtifactKind::Timetable).await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_overwrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let id = user("12345");

        store.write(&id, ArtifactKind::CalendarFile, b"first").await.unwrap();
        store.write(&id, ArtifactKind::CalendarFile, b"second").await.unwrap();

        assert_eq!(store.read(&id, ArtifactKind::CalendarFile).await.unwrap(), b"second");
        let entries: Vec<_> = std::fs::read_dir(store.kind_dir(ArtifactKind::CalendarFile))
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(entries, vec!["12345.ics".to_string()]);
    }

    #[tokio::test]
    async fn test_open_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());

        let err = store
            .open_for_read(&user("12345"), ArtifactKind::CalendarFile)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CalflowError::ArtifactNotFound { kind: ArtifactKind::CalendarFile, .. }
        ));
    }

    #[tokio::test]
    async fn test_promote_copies_from_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();
        let id = user("12345");
        let run = Uuid::now_v7();

        let scratch = store.create_scratch_dir(&id, run).await.unwrap();
        let produced = scratch.join("12345.json");
        tokio::fs::write(&produced, b"[1,2,3]").await.unwrap();

        let path = store.promote(&produced, &id, ArtifactKind::Timetable).await.unwrap();
        assert_eq!(path, store.resolve_path(&id, ArtifactKind::Timetable));
        assert!(produced.exists());

        store.remove_scratch_dir(&id, run).await.unwrap();
        assert!(!scratch.exists());
        assert_eq!(store.read(&id, ArtifactKind::Timetable).await.unwrap(), b"[1,2,3]");
    }

    #[tokio::test]
    async fn test_concurrent_writers_never_tear() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(dir.path());
        let id = user("12345");
        let a = vec![b'a'; 256 * 1024];
        let b = vec![b'b'; 256 * 1024];

        let (ra, rb) = tokio::join!(
            store.write(&id, ArtifactKind::CalendarFile, &a),
            store.write(&id, ArtifactKind::CalendarFile, &b),
        );
        ra.unwrap();
        rb.unwrap();

        let stored = store.read(&id, ArtifactKind::CalendarFile).await.unwrap();
        assert!(stored == a || stored == b, "artifact is a mix of two writes");
    }

    #[tokio::test]
    async fn test_abandoned_write_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).await.unwrap();

        // The writer half stays open, so the copy never finishes.
        let (_writer, mut reader) = tokio::io::duplex(64);
        let id = user("12345");
        let write = store.write_stream(&id, ArtifactKind::Timetable, &mut reader);
        let outcome = tokio::time::timeout(Duration::from_millis(100), write).await;
        assert!(outcome.is_err());

        let leftovers = std::fs::read_dir(store.kind_dir(ArtifactKind::Timetable))
            .unwrap()
            .count();
        assert_eq!(leftovers, 0);
    }
}
